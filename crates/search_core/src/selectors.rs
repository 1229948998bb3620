//! Read-only projections from a machine snapshot to the values views render.

use shared::{
    domain::{EntityDetail, ResultItem},
    error::FetchError,
};

use crate::machine::{PageStatus, SearchSnapshot, SearchType};

pub fn results(snapshot: &SearchSnapshot) -> &[ResultItem] {
    &snapshot.context.search_results
}

pub fn loading(snapshot: &SearchSnapshot) -> bool {
    snapshot.context.loading
}

pub fn error(snapshot: &SearchSnapshot) -> Option<&FetchError> {
    snapshot.context.error.as_ref()
}

pub fn search_term(snapshot: &SearchSnapshot) -> Option<&str> {
    snapshot.context.search_term.as_deref()
}

pub fn page_num(snapshot: &SearchSnapshot) -> u32 {
    snapshot.context.page
}

pub fn page_status(snapshot: &SearchSnapshot) -> PageStatus {
    snapshot.context.page_status
}

pub fn search_type(snapshot: &SearchSnapshot) -> SearchType {
    snapshot.context.search_type
}

pub fn total_results(snapshot: &SearchSnapshot) -> Option<u64> {
    snapshot.context.total_results
}

pub fn entity_detail(snapshot: &SearchSnapshot) -> Option<&EntityDetail> {
    snapshot.context.entity_detail.as_ref()
}

/// True while the backend reports more hits than have been loaded. Unknown totals count as exhausted.
pub fn has_more(snapshot: &SearchSnapshot) -> bool {
    snapshot
        .context
        .total_results
        .is_some_and(|total| (snapshot.context.search_results.len() as u64) < total)
}

pub fn state_value(snapshot: &SearchSnapshot) -> &'static str {
    snapshot.state.value()
}
