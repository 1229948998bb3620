//! Search state machine: `idle -> searching.pending -> searching.success -> idle`, or
//! `searching.pending -> error -> idle` on RESET.
//!
//! The machine is a plain value. `send` applies one event and returns the
//! effects the owner has to run; it never performs I/O itself.

use std::fmt;

use serde::Serialize;
use shared::{
    domain::{ActiveFilter, EntityDetail, PageResult, ResultItem, SearchScope, SortOrder},
    error::FetchError,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageStatus {
    Up,
    Down,
    #[default]
    NoChange,
}

impl PageStatus {
    pub fn between(requested: u32, previous: u32) -> Self {
        match requested.cmp(&previous) {
            std::cmp::Ordering::Greater => PageStatus::Up,
            std::cmp::Ordering::Less => PageStatus::Down,
            std::cmp::Ordering::Equal => PageStatus::NoChange,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchType {
    Append,
    #[default]
    Replace,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchContext {
    pub search_term: Option<String>,
    pub page: u32,
    pub prev_page: u32,
    pub search_results: Vec<ResultItem>,
    pub total_results: Option<u64>,
    pub entity_detail: Option<EntityDetail>,
    pub error: Option<FetchError>,
    pub loading: bool,
    pub page_status: PageStatus,
    pub search_type: SearchType,
    pub scope: SearchScope,
    pub active_filters: Vec<ActiveFilter>,
    pub sort: Option<SortOrder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestToken(pub u64);

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Searching {
    Pending,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchState {
    #[default]
    Idle,
    Searching(Searching),
    Error,
}

impl SearchState {
    pub fn value(self) -> &'static str {
        match self {
            SearchState::Idle => "idle",
            SearchState::Searching(Searching::Pending) => "searching.pending",
            SearchState::Searching(Searching::Success) => "searching.success",
            SearchState::Error => "error",
        }
    }

    /// Matches the state value or any parent of it, so `"searching"` matches
    /// `"searching.pending"`.
    pub fn matches(self, value: &str) -> bool {
        let own = self.value();
        own == value
            || own
                .strip_prefix(value)
                .is_some_and(|rest| rest.starts_with('.'))
    }
}

/// Payload of RUN_SEARCH. Unset fields keep what the context already has.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunSearch {
    pub search_term: Option<String>,
    /// Accepted for parity with the UI trigger; a fresh search always starts at page 0.
    pub page: Option<u32>,
    pub scope: Option<SearchScope>,
    pub filters: Option<Vec<ActiveFilter>>,
    pub sort: Option<SortOrder>,
}

impl RunSearch {
    pub fn term(search_term: impl Into<String>) -> Self {
        Self {
            search_term: Some(search_term.into()),
            ..Self::default()
        }
    }
}

/// Seeds an idle machine with already-known results, e.g. server-rendered ones.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Hydrate {
    pub search_term: Option<String>,
    pub results: Vec<ResultItem>,
    pub page: Option<u32>,
    pub total_results: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    RunSearch(RunSearch),
    RunPage { page: Option<u32> },
    Reset,
    Hydrate(Hydrate),
    FetchResolved {
        token: RequestToken,
        result: PageResult,
    },
    FetchRejected {
        token: RequestToken,
        error: FetchError,
    },
}

impl SearchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SearchEvent::RunSearch(_) => "RUN_SEARCH",
            SearchEvent::RunPage { .. } => "RUN_PAGE",
            SearchEvent::Reset => "RESET",
            SearchEvent::Hydrate(_) => "HYDRATE",
            SearchEvent::FetchResolved { .. } => "FETCH_RESOLVED",
            SearchEvent::FetchRejected { .. } => "FETCH_REJECTED",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Fetch {
        token: RequestToken,
        context: SearchContext,
    },
    Cancel {
        token: RequestToken,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchSnapshot {
    pub state: SearchState,
    pub context: SearchContext,
}

impl SearchSnapshot {
    pub fn matches(&self, value: &str) -> bool {
        self.state.matches(value)
    }
}

#[derive(Debug, Default)]
pub struct SearchMachine {
    state: SearchState,
    context: SearchContext,
    last_token: u64,
    in_flight: Option<RequestToken>,
}

impl SearchMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(context: SearchContext) -> Self {
        Self {
            context,
            ..Self::default()
        }
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn context(&self) -> &SearchContext {
        &self.context
    }

    pub fn in_flight(&self) -> Option<RequestToken> {
        self.in_flight
    }

    pub fn snapshot(&self) -> SearchSnapshot {
        SearchSnapshot {
            state: self.state,
            context: self.context.clone(),
        }
    }

    pub fn send(&mut self, event: SearchEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        let name = event.name();

        match (self.state, event) {
            (SearchState::Idle, SearchEvent::RunSearch(run)) => {
                self.exit_idle();
                self.assign_run_search(run);
                self.enter_pending(&mut effects);
            }
            (SearchState::Idle, SearchEvent::RunPage { page }) => {
                self.exit_idle();
                self.assign_run_page(page);
                self.enter_pending(&mut effects);
            }
            (SearchState::Idle, SearchEvent::Hydrate(hydrate)) => self.assign_hydrate(hydrate),
            (SearchState::Searching(Searching::Pending), SearchEvent::RunSearch(run)) => {
                self.exit_pending();
                self.cancel_in_flight(&mut effects);
                self.assign_run_search(run);
                self.enter_pending(&mut effects);
            }
            (SearchState::Searching(Searching::Pending), SearchEvent::Reset) => {
                self.exit_pending();
                self.cancel_in_flight(&mut effects);
                self.context.loading = false;
                self.enter_idle();
            }
            (
                SearchState::Searching(Searching::Pending),
                SearchEvent::FetchResolved { token, result },
            ) if self.in_flight == Some(token) => {
                self.exit_pending();
                self.in_flight = None;
                self.assign_results(token, result);
                self.enter_success(token);
            }
            (
                SearchState::Searching(Searching::Pending),
                SearchEvent::FetchRejected { token, error },
            ) if self.in_flight == Some(token) => {
                self.exit_pending();
                self.in_flight = None;
                warn!(%token, %error, "search fetch rejected");
                self.context.loading = false;
                self.context.error = Some(error);
                self.enter_error(token);
            }
            (_, SearchEvent::FetchResolved { token, .. })
            | (_, SearchEvent::FetchRejected { token, .. }) => {
                debug!(%token, state = self.state.value(), "discarding stale fetch completion");
            }
            (SearchState::Error, SearchEvent::Reset) => self.enter_idle(),
            (state, _) => {
                debug!(state = state.value(), event = name, "event ignored in current state");
            }
        }

        effects
    }

    fn assign_run_search(&mut self, run: RunSearch) {
        let RunSearch {
            search_term,
            page,
            scope,
            filters,
            sort,
        } = run;

        self.context.search_type = SearchType::Replace;
        let targets_entity = scope
            .as_ref()
            .is_some_and(|scope| scope.entity_id().is_some());
        match search_term.filter(|term| !term.is_empty()) {
            Some(term) => {
                // A bare term leaves any entity page.
                if scope.is_none() {
                    self.context.scope = SearchScope::FreeText;
                }
                self.context.search_term = Some(term);
            }
            None if targets_entity => self.context.search_term = None,
            None => {}
        }
        if let Some(page) = page {
            debug!(page, "ignoring page hint on RUN_SEARCH; fresh searches start at page 0");
        }
        self.context.page = 0;
        if let Some(scope) = scope {
            self.context.scope = scope;
        }
        if let Some(filters) = filters {
            self.context.active_filters = filters;
        }
        if sort.is_some() {
            self.context.sort = sort;
        }
    }

    fn assign_run_page(&mut self, page: Option<u32>) {
        self.context.search_type = SearchType::Append;
        self.context.prev_page = self.context.page;
        self.context.page = page.unwrap_or_else(|| self.context.page.saturating_add(1));
        self.context.page_status = PageStatus::between(self.context.page, self.context.prev_page);
    }

    fn assign_hydrate(&mut self, hydrate: Hydrate) {
        if let Some(term) = hydrate.search_term {
            self.context.search_term = Some(term);
        }
        if let Some(page) = hydrate.page {
            self.context.prev_page = self.context.page;
            self.context.page = page;
        }
        self.context.total_results = hydrate.total_results;
        self.context.search_results = hydrate.results;
        debug!(
            results = self.context.search_results.len(),
            page = self.context.page,
            "search context hydrated"
        );
    }

    fn assign_results(&mut self, token: RequestToken, result: PageResult) {
        let PageResult {
            page,
            total_results,
            entity_detail,
        } = result;

        self.context.page_status = PageStatus::NoChange;
        self.context.loading = false;
        self.context.error = None;
        let received = page.len();
        match self.context.search_type {
            SearchType::Append => {
                self.context.search_results.extend(page);
                if total_results.is_some() {
                    self.context.total_results = total_results;
                }
                if entity_detail.is_some() {
                    self.context.entity_detail = entity_detail;
                }
            }
            SearchType::Replace => {
                self.context.search_results = page;
                self.context.total_results = total_results;
                self.context.entity_detail = entity_detail;
            }
        }
        info!(
            %token,
            received,
            results = self.context.search_results.len(),
            page = self.context.page,
            "search results merged"
        );
    }

    fn cancel_in_flight(&mut self, effects: &mut Vec<Effect>) {
        if let Some(token) = self.in_flight.take() {
            debug!(%token, "superseding in-flight search");
            effects.push(Effect::Cancel { token });
        }
    }

    fn next_token(&mut self) -> RequestToken {
        self.last_token += 1;
        RequestToken(self.last_token)
    }

    fn enter_idle(&mut self) {
        self.state = SearchState::Idle;
        debug!(state = "idle", "state entry");
    }

    fn exit_idle(&mut self) {
        debug!(state = "idle", "state exit");
    }

    fn enter_pending(&mut self, effects: &mut Vec<Effect>) {
        let token = self.next_token();
        self.state = SearchState::Searching(Searching::Pending);
        self.context.loading = true;
        self.in_flight = Some(token);
        debug!(state = "searching.pending", %token, "state entry");
        effects.push(Effect::Fetch {
            token,
            context: self.context.clone(),
        });
    }

    fn exit_pending(&self) {
        match self.in_flight {
            Some(token) => debug!(state = "searching.pending", %token, "state exit"),
            None => debug!(state = "searching.pending", "state exit"),
        }
    }

    fn enter_success(&mut self, token: RequestToken) {
        self.state = SearchState::Searching(Searching::Success);
        debug!(state = "searching.success", %token, "state entry");
        // Transient: always falls straight through to idle.
        debug!(state = "searching.success", %token, "state exit");
        self.enter_idle();
    }

    fn enter_error(&mut self, token: RequestToken) {
        self.state = SearchState::Error;
        debug!(state = "error", %token, "state entry");
    }
}

#[cfg(test)]
#[path = "tests/machine_tests.rs"]
mod tests;
