//! Load driver: dispatches N requests through the selected strategy,
//! tracks per-request timing against the shared run clock, and
//! aggregates terminal outcomes into one [`RunResult`].

use std::time::{Duration, SystemTime};

use rama::{
    error::{ErrorContext as _, OpaqueError},
    graceful::ShutdownGuard,
    net::address::SocketAddress,
    rt::Executor,
    telemetry::tracing,
};
use tokio::{sync::mpsc, time::Instant};

use crate::{
    config::{RunConfig, Strategy},
    identity::IdentityPool,
};

use super::reporter::{FailureKind, Reporter, RequestOutcome, RequestResultEvent};

mod blocking;
mod nonblocking;

/// Terminal record of a single request, timestamped relative to run start.
#[derive(Debug, Clone)]
pub struct RequestResult {
    pub index: usize,
    pub identity: usize,
    pub dispatched_at: Duration,
    pub completed_at: Duration,
    pub status: Option<u16>,
    pub failure: Option<FailureKind>,
}

impl RequestResult {
    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }

    pub fn latency(&self) -> Duration {
        self.completed_at.saturating_sub(self.dispatched_at)
    }
}

#[derive(Debug)]
pub(crate) enum DriverEvent {
    Finished(RequestResult),
    /// Blocking strategy only: aborts the whole run instead of being
    /// recorded per request, so resource exhaustion stays observable.
    Fatal(OpaqueError),
}

/// Whether every request reached a terminal state before the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Complete,
    /// The deadline elapsed (or the drivers went away) with requests
    /// still pending. Distinct from "finished with failures".
    Incomplete,
}

/// Aggregate outcome of one load run.
#[derive(Debug)]
pub struct RunResult {
    pub status: RunStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
    /// Per-request terminal records, indexed by sequence number;
    /// `None` for requests still pending at the deadline.
    pub records: Vec<Option<RequestResult>>,
}

impl RunResult {
    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn terminal(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Dispatch `cfg.total_requests` requests against `target` and wait for
/// all of them to reach a terminal state, or for the run deadline.
pub async fn run_load(
    guard: ShutdownGuard,
    target: SocketAddress,
    cfg: &RunConfig,
    reporter: Box<dyn Reporter>,
) -> Result<RunResult, OpaqueError> {
    cfg.validate()?;

    let started = Instant::now();
    let deadline = started + cfg.timeout();
    let total = cfg.total_requests;

    let (event_tx, event_rx) = mpsc::channel(cfg.per_identity_cap.clamp(16, 4_096) * 8);

    let collector = guard.spawn_task_fn(move |guard| {
        collect_results(guard, total, deadline, started, reporter, event_rx)
    });

    match cfg.strategy {
        Strategy::NonBlocking => {
            let pool = IdentityPool::provision(
                Executor::graceful(guard.clone()),
                cfg.identity_count(),
                cfg.per_identity_cap,
            )?;
            let dispatcher = nonblocking::NonBlockingDispatcher::try_new(
                guard.clone(),
                pool,
                target,
                started,
                event_tx,
            )?;
            for index in 0..total {
                dispatcher.dispatch(index)?;
            }
        }
        Strategy::Blocking => {
            let dispatcher = blocking::BlockingDispatcher::new(
                cfg.per_identity_cap,
                target,
                started,
                event_tx,
            );
            for index in 0..total {
                dispatcher.dispatch(index)?;
            }
        }
    }

    collector.await.context("join result collector")?
}

/// Single owner of all terminal state: receives completion events,
/// applies each terminal transition exactly once, and feeds the reporter.
async fn collect_results(
    guard: ShutdownGuard,
    total: usize,
    deadline: Instant,
    started: Instant,
    mut reporter: Box<dyn Reporter>,
    mut event_rx: mpsc::Receiver<DriverEvent>,
) -> Result<RunResult, OpaqueError> {
    let mut records: Vec<Option<RequestResult>> = vec![None; total];
    let mut succeeded = 0usize;
    let mut failed = 0usize;

    let status = loop {
        if succeeded + failed == total {
            break RunStatus::Complete;
        }

        let event = tokio::select! {
            _ = guard.cancelled() => {
                tracing::error!("exit result collector early: guard shutdown");
                break RunStatus::Incomplete;
            }
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(
                    "run deadline elapsed with {}/{total} requests terminal",
                    succeeded + failed,
                );
                break RunStatus::Incomplete;
            }
            maybe_event = event_rx.recv() => {
                match maybe_event {
                    Some(event) => event,
                    None => {
                        tracing::warn!(
                            "event senders closed with {}/{total} requests terminal",
                            succeeded + failed,
                        );
                        break RunStatus::Incomplete;
                    }
                }
            }
        };

        let result = match event {
            DriverEvent::Fatal(err) => return Err(err),
            DriverEvent::Finished(result) => result,
        };

        let slot = records
            .get_mut(result.index)
            .context("request index out of range")?;
        if slot.is_some() {
            // terminal transitions are final: drop late duplicate signals
            tracing::debug!("ignore duplicate terminal signal for request {}", result.index);
            continue;
        }

        if result.is_ok() {
            succeeded += 1;
        } else {
            failed += 1;
        }

        reporter.on_result(&RequestResultEvent {
            ts: SystemTime::now(),
            elapsed: started.elapsed(),
            index: result.index,
            identity: result.identity,
            latency: result.latency(),
            outcome: RequestOutcome {
                ok: result.is_ok(),
                status: result.status,
                failure: result.failure,
            },
        });
        reporter.on_tick(started.elapsed());

        *slot = Some(result);
    };

    reporter.finish();

    Ok(RunResult {
        status,
        succeeded,
        failed,
        elapsed: started.elapsed(),
        records,
    })
}
