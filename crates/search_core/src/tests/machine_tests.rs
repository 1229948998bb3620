use super::*;
use proptest::prelude::*;
use shared::domain::{EntityKind, ResultItem};

fn item(id: &str) -> ResultItem {
    ResultItem::new(id, format!("wine {id}"))
}

fn items(ids: &[&str]) -> Vec<ResultItem> {
    ids.iter().map(|id| item(id)).collect()
}

fn fetch_token(effects: &[Effect]) -> RequestToken {
    effects
        .iter()
        .find_map(|effect| match effect {
            Effect::Fetch { token, .. } => Some(*token),
            Effect::Cancel { .. } => None,
        })
        .expect("fetch effect")
}

fn resolve(machine: &mut SearchMachine, token: RequestToken, page: Vec<ResultItem>) -> Vec<Effect> {
    machine.send(SearchEvent::FetchResolved {
        token,
        result: PageResult::from_items(page),
    })
}

fn context_with(page: u32, results: Vec<ResultItem>) -> SearchContext {
    SearchContext {
        page,
        prev_page: page,
        search_results: results,
        search_term: Some("cabernet".to_string()),
        ..SearchContext::default()
    }
}

#[test]
fn run_search_from_idle_enters_pending_with_replace_semantics() {
    let mut machine = SearchMachine::with_context(context_with(3, items(&["a"])));

    let effects = machine.send(SearchEvent::RunSearch(RunSearch::term("malbec")));

    assert_eq!(machine.state(), SearchState::Searching(Searching::Pending));
    assert_eq!(machine.context().page, 0);
    assert_eq!(machine.context().search_type, SearchType::Replace);
    assert_eq!(machine.context().search_term.as_deref(), Some("malbec"));
    assert!(machine.context().loading);
    assert_eq!(effects.len(), 1);
    match &effects[0] {
        Effect::Fetch { context, .. } => {
            assert_eq!(context.search_term.as_deref(), Some("malbec"));
            assert!(context.loading);
        }
        other => panic!("unexpected effect {other:?}"),
    }
}

#[test]
fn run_search_without_term_keeps_prior_term() {
    let mut machine = SearchMachine::with_context(context_with(1, Vec::new()));

    machine.send(SearchEvent::RunSearch(RunSearch::default()));

    assert_eq!(machine.context().search_term.as_deref(), Some("cabernet"));
}

#[test]
fn run_search_with_empty_term_keeps_prior_term() {
    let mut machine = SearchMachine::with_context(context_with(1, Vec::new()));

    machine.send(SearchEvent::RunSearch(RunSearch::term("")));

    assert_eq!(machine.context().search_term.as_deref(), Some("cabernet"));
}

#[test]
fn run_search_for_entity_without_term_clears_term() {
    let mut machine = SearchMachine::with_context(context_with(1, Vec::new()));

    machine.send(SearchEvent::RunSearch(RunSearch {
        scope: Some(SearchScope::entity(EntityKind::Producer, "p-1")),
        ..RunSearch::default()
    }));

    assert_eq!(machine.context().search_term, None);
    assert_eq!(
        machine.context().scope,
        SearchScope::entity(EntityKind::Producer, "p-1")
    );
}

#[test]
fn term_search_after_entity_search_returns_to_free_text() {
    let mut machine = SearchMachine::new();
    let token = fetch_token(&machine.send(SearchEvent::RunSearch(RunSearch {
        scope: Some(SearchScope::entity(EntityKind::Producer, "p-1")),
        ..RunSearch::default()
    })));
    resolve(&mut machine, token, items(&["p-wine"]));

    let effects = machine.send(SearchEvent::RunSearch(RunSearch::term("malbec")));

    match effects.as_slice() {
        [Effect::Fetch { context, .. }] => {
            assert_eq!(context.scope, SearchScope::FreeText);
            assert_eq!(context.search_term.as_deref(), Some("malbec"));
        }
        other => panic!("unexpected effects {other:?}"),
    }
    assert_eq!(machine.context().scope, SearchScope::FreeText);
}

#[test]
fn rerun_without_term_stays_on_entity_page() {
    let entity = SearchScope::entity(EntityKind::Region, "r-9");
    let mut machine = SearchMachine::with_context(SearchContext {
        scope: entity.clone(),
        ..SearchContext::default()
    });

    machine.send(SearchEvent::RunSearch(RunSearch::default()));

    assert_eq!(machine.context().scope, entity);
}

#[test]
fn term_with_explicit_entity_scope_keeps_that_scope() {
    let entity = SearchScope::entity(EntityKind::Varietal, "v-2");
    let mut machine = SearchMachine::new();

    machine.send(SearchEvent::RunSearch(RunSearch {
        search_term: Some("old vines".into()),
        scope: Some(entity.clone()),
        ..RunSearch::default()
    }));

    assert_eq!(machine.context().scope, entity);
    assert_eq!(machine.context().search_term.as_deref(), Some("old vines"));
}

#[test]
fn run_search_ignores_page_hint() {
    let mut machine = SearchMachine::with_context(context_with(4, Vec::new()));

    machine.send(SearchEvent::RunSearch(RunSearch {
        search_term: Some("syrah".into()),
        page: Some(7),
        ..RunSearch::default()
    }));

    assert_eq!(machine.context().page, 0);
}

#[test]
fn run_page_without_page_from_zero_goes_up_to_one() {
    let mut machine = SearchMachine::with_context(context_with(0, Vec::new()));

    machine.send(SearchEvent::RunPage { page: None });

    assert_eq!(machine.context().page, 1);
    assert_eq!(machine.context().prev_page, 0);
    assert_eq!(machine.context().page_status, PageStatus::Up);
    assert_eq!(machine.context().search_type, SearchType::Append);
}

#[test]
fn run_page_with_explicit_lower_page_goes_down() {
    let mut machine = SearchMachine::with_context(context_with(5, Vec::new()));

    machine.send(SearchEvent::RunPage { page: Some(2) });

    assert_eq!(machine.context().page, 2);
    assert_eq!(machine.context().prev_page, 5);
    assert_eq!(machine.context().page_status, PageStatus::Down);
}

#[test]
fn run_page_with_same_page_reports_no_change() {
    let mut machine = SearchMachine::with_context(context_with(2, Vec::new()));

    machine.send(SearchEvent::RunPage { page: Some(2) });

    assert_eq!(machine.context().page_status, PageStatus::NoChange);
}

#[test]
fn explicit_page_zero_is_honoured() {
    let mut machine = SearchMachine::with_context(context_with(3, Vec::new()));

    machine.send(SearchEvent::RunPage { page: Some(0) });

    assert_eq!(machine.context().page, 0);
    assert_eq!(machine.context().page_status, PageStatus::Down);
}

#[test]
fn replace_search_overwrites_results_and_returns_to_idle() {
    let mut machine = SearchMachine::with_context(context_with(0, items(&["a", "b"])));

    let effects = machine.send(SearchEvent::RunSearch(RunSearch::term("malbec")));
    let token = fetch_token(&effects);
    let effects = resolve(&mut machine, token, items(&["c", "d"]));

    assert!(effects.is_empty());
    assert_eq!(machine.state(), SearchState::Idle);
    assert_eq!(machine.context().search_results, items(&["c", "d"]));
    assert!(!machine.context().loading);
    assert_eq!(machine.in_flight(), None);
}

#[test]
fn append_page_concatenates_after_existing_results() {
    let mut machine = SearchMachine::with_context(context_with(2, items(&["a", "b"])));

    let effects = machine.send(SearchEvent::RunPage { page: None });
    let token = fetch_token(&effects);
    resolve(&mut machine, token, items(&["c", "d"]));

    assert_eq!(machine.context().search_results, items(&["a", "b", "c", "d"]));
    assert_eq!(machine.context().page, 3);
    assert_eq!(machine.context().page_status, PageStatus::NoChange);
    assert_eq!(machine.state(), SearchState::Idle);
}

#[test]
fn append_keeps_total_when_page_has_none() {
    let mut machine = SearchMachine::with_context(SearchContext {
        total_results: Some(40),
        ..context_with(0, items(&["a"]))
    });

    let token = fetch_token(&machine.send(SearchEvent::RunPage { page: None }));
    resolve(&mut machine, token, items(&["b"]));

    assert_eq!(machine.context().total_results, Some(40));
}

#[test]
fn rejected_fetch_records_error_and_enters_error_state() {
    let mut machine = SearchMachine::with_context(context_with(0, items(&["a"])));

    let token = fetch_token(&machine.send(SearchEvent::RunSearch(RunSearch::term("rioja"))));
    machine.send(SearchEvent::FetchRejected {
        token,
        error: FetchError::transport("connection refused"),
    });

    assert_eq!(machine.state(), SearchState::Error);
    assert!(!machine.context().loading);
    assert_eq!(
        machine.context().error,
        Some(FetchError::transport("connection refused"))
    );
    assert_eq!(machine.context().search_results, items(&["a"]));
}

#[test]
fn reset_from_error_returns_to_idle_and_keeps_error() {
    let mut machine = SearchMachine::new();
    let token = fetch_token(&machine.send(SearchEvent::RunSearch(RunSearch::term("rioja"))));
    machine.send(SearchEvent::FetchRejected {
        token,
        error: FetchError::status(502),
    });

    machine.send(SearchEvent::Reset);

    assert_eq!(machine.state(), SearchState::Idle);
    assert_eq!(machine.context().error, Some(FetchError::status(502)));
}

#[test]
fn next_success_clears_previous_error() {
    let mut machine = SearchMachine::new();
    let token = fetch_token(&machine.send(SearchEvent::RunSearch(RunSearch::term("rioja"))));
    machine.send(SearchEvent::FetchRejected {
        token,
        error: FetchError::status(500),
    });
    machine.send(SearchEvent::Reset);

    let token = fetch_token(&machine.send(SearchEvent::RunSearch(RunSearch::term("rioja"))));
    resolve(&mut machine, token, items(&["r"]));

    assert_eq!(machine.context().error, None);
}

#[test]
fn run_events_are_ignored_in_error_state() {
    let mut machine = SearchMachine::new();
    let token = fetch_token(&machine.send(SearchEvent::RunSearch(RunSearch::term("rioja"))));
    machine.send(SearchEvent::FetchRejected {
        token,
        error: FetchError::status(500),
    });

    assert!(machine
        .send(SearchEvent::RunSearch(RunSearch::term("again")))
        .is_empty());
    assert!(machine.send(SearchEvent::RunPage { page: None }).is_empty());
    assert_eq!(machine.state(), SearchState::Error);
    assert_eq!(machine.context().search_term.as_deref(), Some("rioja"));
}

#[test]
fn run_search_while_pending_supersedes_in_flight_request() {
    let mut machine = SearchMachine::new();
    let first = fetch_token(&machine.send(SearchEvent::RunSearch(RunSearch::term("merlot"))));

    let effects = machine.send(SearchEvent::RunSearch(RunSearch::term("malbec")));
    let second = fetch_token(&effects);

    assert!(effects.contains(&Effect::Cancel { token: first }));
    assert_ne!(first, second);
    assert_eq!(machine.in_flight(), Some(second));

    resolve(&mut machine, first, items(&["stale"]));
    assert_eq!(machine.state(), SearchState::Searching(Searching::Pending));
    assert!(machine.context().search_results.is_empty());

    resolve(&mut machine, second, items(&["fresh"]));
    assert_eq!(machine.context().search_results, items(&["fresh"]));
    assert_eq!(machine.context().search_term.as_deref(), Some("malbec"));
}

#[test]
fn run_page_while_pending_is_ignored() {
    let mut machine = SearchMachine::new();
    machine.send(SearchEvent::RunSearch(RunSearch::term("merlot")));

    let effects = machine.send(SearchEvent::RunPage { page: None });

    assert!(effects.is_empty());
    assert_eq!(machine.context().page, 0);
    assert_eq!(machine.context().search_type, SearchType::Replace);
}

#[test]
fn reset_while_pending_cancels_and_discards_late_result() {
    let mut machine = SearchMachine::with_context(context_with(0, items(&["a"])));
    let token = fetch_token(&machine.send(SearchEvent::RunSearch(RunSearch::term("merlot"))));

    let effects = machine.send(SearchEvent::Reset);
    assert_eq!(effects, vec![Effect::Cancel { token }]);
    assert_eq!(machine.state(), SearchState::Idle);
    assert!(!machine.context().loading);

    resolve(&mut machine, token, items(&["late"]));
    assert_eq!(machine.context().search_results, items(&["a"]));
    assert_eq!(machine.state(), SearchState::Idle);
}

#[test]
fn hydrate_seeds_idle_context_without_fetching() {
    let mut machine = SearchMachine::new();

    let effects = machine.send(SearchEvent::Hydrate(Hydrate {
        search_term: Some("pinot".into()),
        results: items(&["p1", "p2"]),
        page: Some(1),
        total_results: Some(12),
    }));

    assert!(effects.is_empty());
    assert_eq!(machine.state(), SearchState::Idle);
    assert_eq!(machine.context().search_term.as_deref(), Some("pinot"));
    assert_eq!(machine.context().search_results, items(&["p1", "p2"]));
    assert_eq!(machine.context().page, 1);
    assert_eq!(machine.context().total_results, Some(12));
}

#[test]
fn state_matches_parent_values() {
    let pending = SearchState::Searching(Searching::Pending);
    assert!(pending.matches("searching"));
    assert!(pending.matches("searching.pending"));
    assert!(!pending.matches("search"));
    assert!(!SearchState::Idle.matches("searching"));
}

#[test]
fn tokens_increase_across_requests() {
    let mut machine = SearchMachine::new();
    let first = fetch_token(&machine.send(SearchEvent::RunSearch(RunSearch::term("a"))));
    resolve(&mut machine, first, Vec::new());
    let second = fetch_token(&machine.send(SearchEvent::RunPage { page: None }));

    assert!(second > first);
}

#[derive(Clone, Default)]
struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().expect("log buffer").clone();
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn with_captured_logs(run: impl FnOnce()) -> Vec<String> {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .without_time()
        .finish();
    tracing::subscriber::with_default(subscriber, run);
    logs.lines()
}

fn logged(lines: &[String], state: &str, transition: &str, token: &str) -> bool {
    lines.iter().any(|line| {
        line.contains(transition)
            && line.contains(&format!("state=\"{state}\""))
            && line.contains(&format!("token={token}"))
    })
}

#[test]
fn pending_transitions_log_the_request_token() {
    let lines = with_captured_logs(|| {
        let mut machine = SearchMachine::new();
        let first = fetch_token(&machine.send(SearchEvent::RunSearch(RunSearch::term("cava"))));
        resolve(&mut machine, first, items(&["c1"]));
        let second = fetch_token(&machine.send(SearchEvent::RunPage { page: None }));
        machine.send(SearchEvent::FetchRejected {
            token: second,
            error: FetchError::status(500),
        });
    });

    assert!(logged(&lines, "searching.pending", "state entry", "#1"));
    assert!(logged(&lines, "searching.pending", "state exit", "#1"));
    assert!(logged(&lines, "searching.success", "state entry", "#1"));
    assert!(logged(&lines, "searching.success", "state exit", "#1"));
    assert!(logged(&lines, "searching.pending", "state exit", "#2"));
    assert!(logged(&lines, "error", "state entry", "#2"));
}

#[test]
fn superseded_pending_exit_logs_the_old_token() {
    let lines = with_captured_logs(|| {
        let mut machine = SearchMachine::new();
        machine.send(SearchEvent::RunSearch(RunSearch::term("merlot")));
        machine.send(SearchEvent::RunSearch(RunSearch::term("malbec")));
    });

    assert!(logged(&lines, "searching.pending", "state exit", "#1"));
    assert!(logged(&lines, "searching.pending", "state entry", "#2"));
}

fn arb_context() -> impl Strategy<Value = SearchContext> {
    (0u32..1_000, 0u32..1_000, proptest::collection::vec("[a-z]{1,6}", 0..6)).prop_map(
        |(page, prev_page, ids)| SearchContext {
            page,
            prev_page,
            search_results: ids.iter().map(|id| item(id)).collect(),
            ..SearchContext::default()
        },
    )
}

proptest! {
    #[test]
    fn run_search_always_resets_to_replace_page_zero(context in arb_context()) {
        let mut machine = SearchMachine::with_context(context);
        machine.send(SearchEvent::RunSearch(RunSearch::default()));
        prop_assert_eq!(machine.context().page, 0);
        prop_assert_eq!(machine.context().search_type, SearchType::Replace);
    }

    #[test]
    fn run_page_without_page_increments_by_one(context in arb_context()) {
        let before = context.page;
        let mut machine = SearchMachine::with_context(context);
        machine.send(SearchEvent::RunPage { page: None });
        prop_assert_eq!(machine.context().page, before + 1);
        prop_assert_eq!(machine.context().search_type, SearchType::Append);
        prop_assert_eq!(machine.context().page_status, PageStatus::Up);
    }

    #[test]
    fn page_status_follows_requested_versus_previous(context in arb_context(), requested in 0u32..1_000) {
        let previous = context.page;
        let mut machine = SearchMachine::with_context(context);
        machine.send(SearchEvent::RunPage { page: Some(requested) });
        let expected = if requested > previous {
            PageStatus::Up
        } else if requested < previous {
            PageStatus::Down
        } else {
            PageStatus::NoChange
        };
        prop_assert_eq!(machine.context().page_status, expected);
    }

    #[test]
    fn append_preserves_prior_items_first(
        context in arb_context(),
        incoming in proptest::collection::vec("[a-z]{1,6}", 0..6),
    ) {
        let prior = context.search_results.clone();
        let mut machine = SearchMachine::with_context(context);
        let token = fetch_token(&machine.send(SearchEvent::RunPage { page: None }));
        let incoming: Vec<ResultItem> = incoming.iter().map(|id| item(id)).collect();
        resolve(&mut machine, token, incoming.clone());

        let mut expected = prior;
        expected.extend(incoming);
        prop_assert_eq!(&machine.context().search_results, &expected);
    }

    #[test]
    fn replace_discards_prior_items(
        context in arb_context(),
        incoming in proptest::collection::vec("[a-z]{1,6}", 0..6),
    ) {
        let mut machine = SearchMachine::with_context(context);
        let token = fetch_token(&machine.send(SearchEvent::RunSearch(RunSearch::term("x"))));
        let incoming: Vec<ResultItem> = incoming.iter().map(|id| item(id)).collect();
        resolve(&mut machine, token, incoming.clone());
        prop_assert_eq!(&machine.context().search_results, &incoming);
    }
}
