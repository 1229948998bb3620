//! Provider: owns one machine for its lifetime, runs its effects on the tokio
//! runtime and publishes snapshots for views to select from.

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use futures::FutureExt;
use shared::error::FetchError;
use thiserror::Error;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinHandle,
};
use tracing::{debug, error, warn};

use crate::{
    executor::FetchExecutor,
    machine::{
        Effect, Hydrate, RequestToken, RunSearch, SearchEvent, SearchMachine, SearchSnapshot,
        SearchState,
    },
};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOptions {
    pub queue_capacity: usize,
    /// Send RESET on the tick after the machine lands in `error`.
    pub auto_reset: bool,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            auto_reset: true,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("search provider is unmounted")]
    Unmounted,
    #[error("search command queue is full; retry")]
    QueueFull,
}

pub struct SearchProvider {
    commands: mpsc::Sender<SearchEvent>,
    snapshots: watch::Receiver<SearchSnapshot>,
    applied: watch::Receiver<u64>,
    sent: AtomicU64,
    driver: Option<JoinHandle<()>>,
}

impl SearchProvider {
    /// Spawns the driver on the current tokio runtime.
    pub fn mount(executor: Arc<dyn FetchExecutor>, options: ProviderOptions) -> Self {
        Self::mount_with_machine(executor, options, SearchMachine::new())
    }

    pub fn mount_with_machine(
        executor: Arc<dyn FetchExecutor>,
        options: ProviderOptions,
        machine: SearchMachine,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(options.queue_capacity.max(1));
        let (completions, completion_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshots) = watch::channel(machine.snapshot());
        let (applied_tx, applied) = watch::channel(0);

        let driver = Driver {
            machine,
            executor,
            auto_reset: options.auto_reset,
            completions,
            in_flight: HashMap::new(),
            snapshots: snapshot_tx,
            applied: applied_tx,
        };
        let driver = tokio::spawn(driver.run(command_rx, completion_rx));
        debug!("search provider mounted");

        Self {
            commands,
            snapshots,
            applied,
            sent: AtomicU64::new(0),
            driver: Some(driver),
        }
    }

    pub fn run_search(
        &self,
        search_term: Option<String>,
        page: Option<u32>,
    ) -> Result<(), ProviderError> {
        self.run_search_with(RunSearch {
            search_term,
            page,
            ..RunSearch::default()
        })
    }

    pub fn run_search_with(&self, run: RunSearch) -> Result<(), ProviderError> {
        self.dispatch(SearchEvent::RunSearch(run))
    }

    pub fn run_page(&self, page: Option<u32>) -> Result<(), ProviderError> {
        self.dispatch(SearchEvent::RunPage { page })
    }

    pub fn reset(&self) -> Result<(), ProviderError> {
        self.dispatch(SearchEvent::Reset)
    }

    pub fn hydrate(&self, hydrate: Hydrate) -> Result<(), ProviderError> {
        self.dispatch(SearchEvent::Hydrate(hydrate))
    }

    pub fn snapshot(&self) -> SearchSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn select<T>(&self, selector: impl FnOnce(&SearchSnapshot) -> T) -> T {
        selector(&*self.snapshots.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchSnapshot> {
        self.snapshots.clone()
    }

    /// Waits until every trigger sent so far has been applied and no fetch is pending.
    pub async fn wait_until_settled(&self) -> Result<SearchSnapshot, ProviderError> {
        let target = self.sent.load(Ordering::Acquire);
        let mut applied = self.applied.clone();
        applied
            .wait_for(|count| *count >= target)
            .await
            .map_err(|_| ProviderError::Unmounted)?;

        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(|snapshot| !snapshot.matches("searching"))
            .await
            .map_err(|_| ProviderError::Unmounted)?;
        Ok(snapshot.clone())
    }

    pub async fn unmount(mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
            let _ = driver.await;
        }
        debug!("search provider unmounted");
    }

    fn dispatch(&self, event: SearchEvent) -> Result<(), ProviderError> {
        let name = event.name();
        match self.commands.try_send(event) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::AcqRel);
                debug!(event = name, "queued search event");
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(ProviderError::QueueFull),
            Err(TrySendError::Closed(_)) => Err(ProviderError::Unmounted),
        }
    }
}

impl Drop for SearchProvider {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

struct Driver {
    machine: SearchMachine,
    executor: Arc<dyn FetchExecutor>,
    auto_reset: bool,
    completions: mpsc::UnboundedSender<SearchEvent>,
    in_flight: HashMap<RequestToken, JoinHandle<()>>,
    snapshots: watch::Sender<SearchSnapshot>,
    applied: watch::Sender<u64>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SearchEvent>,
        mut completions: mpsc::UnboundedReceiver<SearchEvent>,
    ) {
        let mut applied = 0u64;
        loop {
            tokio::select! {
                biased;
                Some(event) = completions.recv() => self.apply(event),
                command = commands.recv() => match command {
                    Some(event) => {
                        self.apply(event);
                        applied += 1;
                        self.applied.send_replace(applied);
                    }
                    None => break,
                },
            }
        }
    }

    fn apply(&mut self, event: SearchEvent) {
        if let SearchEvent::FetchResolved { token, .. } | SearchEvent::FetchRejected { token, .. } =
            &event
        {
            self.in_flight.remove(token);
        }

        let was_error = self.machine.state() == SearchState::Error;
        let effects = self.machine.send(event);
        for effect in effects {
            self.run_effect(effect);
        }
        self.snapshots.send_replace(self.machine.snapshot());

        if self.auto_reset && !was_error && self.machine.state() == SearchState::Error {
            // Queued rather than applied inline so subscribers observe `error` first.
            if self.completions.send(SearchEvent::Reset).is_err() {
                error!("search provider could not queue auto-reset");
            }
        }
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Fetch { token, context } => {
                let executor = Arc::clone(&self.executor);
                let completions = self.completions.clone();
                let task = tokio::spawn(async move {
                    let outcome = AssertUnwindSafe(executor.fetch(&context))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            Err(FetchError::unavailable("fetch executor panicked"))
                        });
                    let event = match outcome {
                        Ok(result) => SearchEvent::FetchResolved { token, result },
                        Err(error) => SearchEvent::FetchRejected { token, error },
                    };
                    let _ = completions.send(event);
                });
                self.in_flight.insert(token, task);
            }
            Effect::Cancel { token } => {
                if let Some(task) = self.in_flight.remove(&token) {
                    debug!(%token, "aborting superseded fetch");
                    task.abort();
                }
            }
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        for (token, task) in self.in_flight.drain() {
            warn!(%token, "aborting in-flight fetch on unmount");
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/provider_tests.rs"]
mod tests;
