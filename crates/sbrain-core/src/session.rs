use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::client::HttpClient;
use crate::error::ClientError;
use crate::logout::LogoutBroadcaster;
use crate::request::{Request, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Refreshing,
}

type Outcome = Result<(), ClientError>;

/// A caller parked behind the in-flight refresh.
struct PendingContinuation {
    request_id: Uuid,
    tx: oneshot::Sender<Outcome>,
}

impl PendingContinuation {
    fn settle(self, outcome: Outcome) {
        if self.tx.send(outcome).is_err() {
            tracing::debug!(request_id = %self.request_id, "queued caller went away before refresh settled");
        }
    }
}

struct RefreshState {
    phase: RefreshPhase,
    queue: VecDeque<PendingContinuation>,
    episodes: u64,
}

/// Single-flight session refresh gate.
///
/// The first eligible 401 starts a refresh; every 401 observed while it is outstanding
/// parks in a FIFO queue. When the refresh settles the phase returns to `Idle`, the
/// queue is drained exactly once, and each parked caller either replays its request
/// or receives the refresh error.
pub struct SessionCoordinator {
    state: Mutex<RefreshState>,
    refresh_path: String,
    logout: LogoutBroadcaster,
}

enum Gate<'a> {
    Wait(oneshot::Receiver<Outcome>),
    Lead(LeaderGuard<'a>),
}

/// Held by the caller that owns the refresh. Dropping it without `finish` (the
/// caller's future was cancelled) still returns the gate to `Idle`.
struct LeaderGuard<'a> {
    coordinator: &'a SessionCoordinator,
    armed: bool,
}

impl LeaderGuard<'_> {
    fn finish(mut self) -> VecDeque<PendingContinuation> {
        self.armed = false;
        self.coordinator.release()
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let waiters = self.coordinator.release();
        tracing::warn!(
            queued = waiters.len(),
            "session refresh dropped before settling"
        );
        for waiter in waiters {
            waiter.settle(Err(ClientError::RefreshCancelled));
        }
    }
}

impl SessionCoordinator {
    pub fn new(refresh_path: impl Into<String>, logout: LogoutBroadcaster) -> Self {
        Self {
            state: Mutex::new(RefreshState {
                phase: RefreshPhase::Idle,
                queue: VecDeque::new(),
                episodes: 0,
            }),
            refresh_path: refresh_path.into(),
            logout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> RefreshPhase {
        self.lock().phase
    }

    /// Callers currently parked behind the refresh.
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Refreshes started since construction.
    pub fn episodes(&self) -> u64 {
        self.lock().episodes
    }

    pub fn refresh_path(&self) -> &str {
        &self.refresh_path
    }

    fn enter(&self, request_id: Uuid) -> Gate<'_> {
        let mut state = self.lock();
        match state.phase {
            RefreshPhase::Refreshing => {
                let (tx, rx) = oneshot::channel();
                state
                    .queue
                    .push_back(PendingContinuation { request_id, tx });
                Gate::Wait(rx)
            }
            RefreshPhase::Idle => {
                state.phase = RefreshPhase::Refreshing;
                state.episodes += 1;
                Gate::Lead(LeaderGuard {
                    coordinator: self,
                    armed: true,
                })
            }
        }
    }

    fn release(&self) -> VecDeque<PendingContinuation> {
        let mut state = self.lock();
        state.phase = RefreshPhase::Idle;
        std::mem::take(&mut state.queue)
    }

    async fn refresh(&self, client: &HttpClient) -> Result<(), ClientError> {
        let resp = client.exchange(&Request::post(&self.refresh_path)).await?;
        if resp.is_success() {
            Ok(())
        } else {
            Err(ClientError::from_response(resp))
        }
    }

    /// Recover `req` from an eligible 401: join the in-flight refresh or start one,
    /// then replay the request once the session is valid again.
    pub(crate) async fn recover(
        &self,
        client: &HttpClient,
        mut req: Request,
    ) -> Result<Response, ClientError> {
        let leader = match self.enter(req.id()) {
            Gate::Wait(rx) => {
                tracing::debug!(request_id = %req.id(), path = %req.path, "refresh in flight; request queued");
                return match rx.await {
                    Ok(Ok(())) => client.send(req).await,
                    Ok(Err(err)) => Err(err),
                    Err(_) => Err(ClientError::RefreshCancelled),
                };
            }
            Gate::Lead(guard) => guard,
        };

        req.mark_retried();
        tracing::info!(request_id = %req.id(), path = %req.path, "access credential expired; refreshing session");
        let outcome = self.refresh(client).await;
        let waiters = leader.finish();

        match outcome {
            Ok(()) => {
                tracing::info!(queued = waiters.len(), "session refreshed; replaying requests");
                for waiter in waiters {
                    waiter.settle(Ok(()));
                }
                // Let the queued callers start their replays before ours.
                tokio::task::yield_now().await;
                client.send(req).await
            }
            Err(source) => {
                let err = ClientError::RefreshFailed(Box::new(source));
                for waiter in waiters {
                    waiter.settle(Err(err.clone()));
                }
                self.logout.announce(&err);
                Err(err)
            }
        }
    }
}
