//! Server lifecycle: one cancellation root plus the set of live session tasks.
//!
//! Shutdown runs in two steps. [`ShutdownCoordinator::begin`] cancels the
//! root so the listener stops accepting, `/ws` answers 503 and every session
//! and retry timer observes cancellation. [`ShutdownCoordinator::drain`] then
//! waits for the listener task and all tracked sessions under one deadline.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;
use tracing::{info, warn};

/// What was still running when [`ShutdownCoordinator::drain`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrainOutcome {
    /// The HTTP listener task finished.
    pub listener_stopped: bool,
    /// Sessions that had not finished teardown by the deadline.
    pub sessions_left: usize,
}

impl DrainOutcome {
    /// Nothing was left behind.
    pub fn is_clean(&self) -> bool {
        self.listener_stopped && self.sessions_left == 0
    }
}

/// Owns the root cancellation token and tracks session tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    root: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Fresh coordinator with nothing tracked.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Whether [`begin`](Self::begin) has run.
    pub fn is_shutting_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Wrap a session future so [`drain`](Self::drain) waits for it.
    pub fn track_session<F: Future>(&self, session: F) -> TrackedFuture<F> {
        self.sessions.track_future(session)
    }

    /// Session futures that have not completed yet.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Cancel the root and stop accepting new sessions. Idempotent.
    pub fn begin(&self) {
        if !self.root.is_cancelled() {
            info!(sessions = self.active_sessions(), "shutdown started");
        }
        self.root.cancel();
        let _ = self.sessions.close();
    }

    /// Begin shutdown, then wait up to `deadline` for the listener and
    /// every tracked session.
    pub async fn drain(&self, listener: JoinHandle<()>, deadline: Duration) -> DrainOutcome {
        self.begin();

        let listener_done = async {
            if let Err(e) = listener.await {
                warn!(error = %e, "listener task failed");
            }
        };
        let both = async {
            tokio::join!(listener_done, self.sessions.wait());
        };
        let finished = tokio::time::timeout(deadline, both).await.is_ok();

        let outcome = DrainOutcome {
            listener_stopped: finished,
            sessions_left: self.active_sessions(),
        };
        if outcome.is_clean() {
            info!("shutdown drained");
        } else {
            warn!(
                sessions_left = outcome.sessions_left,
                deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                "shutdown deadline passed"
            );
        }
        outcome
    }
}
