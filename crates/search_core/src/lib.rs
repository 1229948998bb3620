//! Storefront search controller: query building, fetch execution, the search
//! state machine, selectors, and the provider that ties them to a UI.

pub mod executor;
pub mod machine;
pub mod provider;
pub mod query;
pub mod selectors;

pub use executor::{FetchExecutor, GraphQlExecutor, UnavailableExecutor};
pub use machine::{
    Effect, Hydrate, PageStatus, RequestToken, RunSearch, SearchContext, SearchEvent,
    SearchMachine, SearchSnapshot, SearchState, SearchType, Searching,
};
pub use provider::{ProviderError, ProviderOptions, SearchProvider};
pub use query::{build_query, QueryConfig, QueryPlan};
