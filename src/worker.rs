//! Lifecycle state machine and event dispatch.
//!
//! [`Worker`] is the only piece a host talks to: it receives lifecycle,
//! fetch and message events, tracks the worker state, and forwards each
//! event to the [`CacheReconciler`].
//!
//! ```text
//! Uninstalled ─install─▶ Installing ─ok─▶ Installed ─skip-waiting / activate─▶ Activating
//!                            └─err─▶ Failed                                         │
//!                                                                          Active ◀─┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::http::{Request, Response};
use crate::reconciler::{ActivationReport, CacheReconciler, FetchOutcome};
use crate::stats::SyncStats;
use crate::storage::CacheStorage;

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Registered but not yet installed.
    Uninstalled,
    /// Core set is being fetched.
    Installing,
    /// Installed, waiting to take over.
    Installed,
    /// Reconciling partitions.
    Activating,
    /// Serving fetches.
    Active,
    /// Install failed; this worker will never activate.
    Failed,
}

impl WorkerState {
    /// Returns true if fetch events are intercepted in this state.
    #[must_use]
    pub const fn can_intercept_fetch(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninstalled => write!(f, "uninstalled"),
            Self::Installing => write!(f, "installing"),
            Self::Installed => write!(f, "installed"),
            Self::Activating => write!(f, "activating"),
            Self::Active => write!(f, "active"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Commands a controlling page can post to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Activate an installed worker immediately.
    SkipWaiting,
    /// Fetch every resource not yet cached.
    DownloadOffline,
}

impl Command {
    /// Parses a posted message. Anything unrecognized yields `None`.
    #[must_use]
    pub fn parse(message: &str) -> Option<Self> {
        match message {
            "skipWaiting" => Some(Self::SkipWaiting),
            "downloadOffline" => Some(Self::DownloadOffline),
            _ => None,
        }
    }
}

/// Events delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Install,
    Activate,
    Fetch(Request),
    Message(String),
}

/// What handling an event produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Install finished. Carries the activation report when skip-waiting
    /// promoted the worker straight to active.
    Installed {
        stats: SyncStats,
        activation: Option<ActivationReport>,
    },
    /// Activation finished.
    Activated(ActivationReport),
    /// The host should perform the request itself.
    Passthrough,
    /// Respond to the intercepted request with this.
    Respond(Response),
    /// Offline download finished.
    Downloaded(SyncStats),
    /// Message accepted with nothing further to report.
    Handled,
    /// Message not recognized.
    Ignored,
}

/// A cache worker bound to one resource table version.
pub struct Worker<S: CacheStorage, F: Fetcher> {
    reconciler: CacheReconciler<S, F>,
    state: Mutex<WorkerState>,
    skip_waiting: AtomicBool,
    controlling: AtomicBool,
}

impl<S: CacheStorage, F: Fetcher> Worker<S, F> {
    /// Creates a freshly registered worker that skips waiting: a successful
    /// install activates it straight away.
    #[must_use]
    pub fn new(reconciler: CacheReconciler<S, F>) -> Self {
        Self::with_state(reconciler, WorkerState::Uninstalled)
    }

    /// Creates a worker resuming from a known state, e.g. one that already
    /// activated in an earlier process.
    #[must_use]
    pub fn with_state(reconciler: CacheReconciler<S, F>, state: WorkerState) -> Self {
        Self {
            reconciler,
            state: Mutex::new(state),
            skip_waiting: AtomicBool::new(true),
            controlling: AtomicBool::new(state == WorkerState::Active),
        }
    }

    /// Makes a successful install stop at Installed. The worker then waits
    /// for an activate event or a `skipWaiting` message.
    #[must_use]
    pub fn waiting(mut self) -> Self {
        *self.skip_waiting.get_mut() = false;
        self
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true once the worker has claimed its clients.
    #[must_use]
    pub fn is_controlling(&self) -> bool {
        self.controlling.load(Ordering::Acquire)
    }

    /// Returns the reconciler this worker drives.
    #[must_use]
    pub const fn reconciler(&self) -> &CacheReconciler<S, F> {
        &self.reconciler
    }

    fn set_state(&self, next: WorkerState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        log::info!("Worker state: {} -> {next}", *state);
        *state = next;
    }

    /// Moves from `expected` to `next`, or fails without changing state.
    fn transition(&self, expected: WorkerState, next: WorkerState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != expected {
            return Err(Error::InvalidState {
                expected: expected.to_string(),
                actual: state.to_string(),
            });
        }
        log::info!("Worker state: {} -> {next}", *state);
        *state = next;
        Ok(())
    }

    /// Handles one event.
    ///
    /// # Errors
    ///
    /// Returns an error when install fails, when an event arrives in a state
    /// that cannot accept it, or when an intercepted fetch or offline download
    /// fails.
    pub async fn dispatch(&self, event: Event) -> Result<EventOutcome> {
        match event {
            Event::Install => self.install().await,
            Event::Activate => Ok(EventOutcome::Activated(self.activate().await?)),
            Event::Fetch(request) => self.fetch(&request).await,
            Event::Message(message) => self.message(&message).await,
        }
    }

    async fn install(&self) -> Result<EventOutcome> {
        self.transition(WorkerState::Uninstalled, WorkerState::Installing)?;

        let stats = match self.reconciler.install().await {
            Ok(stats) => stats,
            Err(e) => {
                log::error!("Install failed: {e}");
                self.set_state(WorkerState::Failed);
                return Err(e);
            }
        };
        self.set_state(WorkerState::Installed);

        let activation = if self.skip_waiting.load(Ordering::Acquire) {
            Some(self.activate().await?)
        } else {
            None
        };
        Ok(EventOutcome::Installed { stats, activation })
    }

    async fn activate(&self) -> Result<ActivationReport> {
        self.transition(WorkerState::Installed, WorkerState::Activating)?;
        let report = self.reconciler.activate().await;
        self.set_state(WorkerState::Active);
        if report.claims_clients() {
            self.claim_clients();
        }
        Ok(report)
    }

    fn claim_clients(&self) {
        if !self.controlling.swap(true, Ordering::AcqRel) {
            log::info!("Claimed clients");
        }
    }

    async fn fetch(&self, request: &Request) -> Result<EventOutcome> {
        if !self.state().can_intercept_fetch() {
            return Ok(EventOutcome::Passthrough);
        }
        match self.reconciler.handle_fetch(request).await? {
            FetchOutcome::Passthrough => Ok(EventOutcome::Passthrough),
            FetchOutcome::Respond(response) => Ok(EventOutcome::Respond(response)),
        }
    }

    async fn message(&self, message: &str) -> Result<EventOutcome> {
        match Command::parse(message) {
            Some(Command::SkipWaiting) => {
                self.skip_waiting.store(true, Ordering::Release);
                if self.state() == WorkerState::Installed {
                    return Ok(EventOutcome::Activated(self.activate().await?));
                }
                Ok(EventOutcome::Handled)
            }
            Some(Command::DownloadOffline) => Ok(EventOutcome::Downloaded(
                self.reconciler.download_offline().await?,
            )),
            None => {
                log::debug!("Ignoring unrecognized message: {message:?}");
                Ok(EventOutcome::Ignored)
            }
        }
    }
}
