use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use search_core::{
    build_query, selectors, Effect, FetchExecutor, GraphQlExecutor, QueryConfig, RunSearch,
    SearchEvent, SearchMachine, SearchProvider, SearchSnapshot, UnavailableExecutor,
};
use shared::{
    domain::{ActiveFilter, EntityKind, PageResult, SearchScope, SortOrder},
    protocol::GraphQlRequest,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, parse_endpoint, Settings};

#[derive(Parser, Debug)]
#[command(name = "search_cli", about = "Drive storefront searches from the terminal")]
struct Cli {
    /// Settings file; defaults to ./search.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// GraphQL endpoint, overriding settings and environment.
    #[arg(long)]
    endpoint: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a search against the backend and print the merged results.
    Search(SearchArgs),
    /// Print the GraphQL requests a search would issue, without sending them.
    Plan(SearchArgs),
}

#[derive(Args, Debug)]
struct SearchArgs {
    term: Option<String>,
    #[arg(long, requires = "entity_id")]
    entity: Option<EntityKind>,
    #[arg(long, requires = "entity")]
    entity_id: Option<String>,
    /// field=value; repeat to combine.
    #[arg(long = "filter")]
    filters: Vec<ActiveFilter>,
    /// field:asc or field:desc.
    #[arg(long)]
    sort: Option<SortOrder>,
    /// Number of pages to load, appending each to the previous.
    #[arg(long, default_value_t = 1)]
    pages: u32,
    #[arg(long)]
    json: bool,
}

impl SearchArgs {
    fn run_search(&self) -> RunSearch {
        let scope = match (self.entity, &self.entity_id) {
            (Some(kind), Some(id)) => Some(SearchScope::entity(kind, id.clone())),
            _ => None,
        };
        RunSearch {
            search_term: self.term.clone(),
            page: None,
            scope,
            filters: (!self.filters.is_empty()).then(|| self.filters.clone()),
            sort: self.sort.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(endpoint) = cli.endpoint.as_deref() {
        settings.endpoint = Some(parse_endpoint(endpoint)?);
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Search(args) => search(&settings, &args).await,
        Command::Plan(args) => plan(&settings, &args),
    }
}

fn executor_for(settings: &Settings) -> Result<Arc<dyn FetchExecutor>> {
    match settings.endpoint.clone() {
        Some(endpoint) => {
            info!(%endpoint, "searching");
            let executor =
                GraphQlExecutor::new(endpoint, settings.query_config(), settings.request_timeout())
                    .context("failed to build HTTP client")?;
            Ok(Arc::new(executor))
        }
        None => {
            warn!("no search endpoint configured; pass --endpoint or set SEARCH_ENDPOINT");
            Ok(Arc::new(UnavailableExecutor))
        }
    }
}

async fn search(settings: &Settings, args: &SearchArgs) -> Result<()> {
    let provider = SearchProvider::mount(executor_for(settings)?, settings.provider_options());

    provider.run_search_with(args.run_search())?;
    let mut snapshot = provider.wait_until_settled().await?;
    for _ in 1..args.pages.max(1) {
        if selectors::error(&snapshot).is_some() || !selectors::has_more(&snapshot) {
            break;
        }
        provider.run_page(None)?;
        snapshot = provider.wait_until_settled().await?;
    }
    provider.unmount().await;

    report(&snapshot, args.json)?;
    if let Some(err) = selectors::error(&snapshot) {
        bail!("search failed: {err}");
    }
    Ok(())
}

fn plan(settings: &Settings, args: &SearchArgs) -> Result<()> {
    let pages = plan_requests(&settings.query_config(), args.run_search(), args.pages);
    for requests in pages {
        println!("{}", serde_json::to_string_pretty(&requests)?);
    }
    Ok(())
}

/// Requests the machine would issue for the first `pages` pages, assuming every fetch succeeds.
fn plan_requests(config: &QueryConfig, run: RunSearch, pages: u32) -> Vec<Vec<GraphQlRequest>> {
    let mut machine = SearchMachine::new();
    let mut effects = machine.send(SearchEvent::RunSearch(run));
    let mut planned = Vec::new();

    for page in 0..pages.max(1) {
        let Some((token, context)) = effects.into_iter().find_map(|effect| match effect {
            Effect::Fetch { token, context } => Some((token, context)),
            Effect::Cancel { .. } => None,
        }) else {
            warn!(page, "machine issued no fetch");
            break;
        };

        let plan = build_query(config, &context);
        let mut requests = vec![plan.request()];
        requests.extend(plan.companion);
        planned.push(requests);

        machine.send(SearchEvent::FetchResolved {
            token,
            result: PageResult::default(),
        });
        effects = machine.send(SearchEvent::RunPage { page: None });
    }
    planned
}

fn report(snapshot: &SearchSnapshot, json: bool) -> Result<()> {
    let results = selectors::results(snapshot);
    if json {
        let body = serde_json::json!({
            "searchTerm": selectors::search_term(snapshot),
            "page": selectors::page_num(snapshot),
            "totalResults": selectors::total_results(snapshot),
            "results": results,
            "entityDetail": selectors::entity_detail(snapshot),
            "error": selectors::error(snapshot),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let term = selectors::search_term(snapshot).unwrap_or("everything");
    let count = selectors::total_results(snapshot).unwrap_or(results.len() as u64);
    if count == 0 {
        println!("no wines matching \"{term}\"");
    } else {
        let plural = if count == 1 { "" } else { "s" };
        println!("found {count} wine{plural} matching \"{term}\"");
    }
    for item in results {
        println!("  {}  {}", item.id, item.name.as_deref().unwrap_or("-"));
    }
    if selectors::has_more(snapshot) {
        println!("(more available; pass --pages to load further pages)");
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
