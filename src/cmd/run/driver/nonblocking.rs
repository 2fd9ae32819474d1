use std::sync::Arc;

use rama::{
    error::{ErrorContext as _, OpaqueError},
    graceful::ShutdownGuard,
    http::{BodyExtractExt as _, Uri, service::client::HttpClientExt as _},
    net::address::SocketAddress,
    telemetry::tracing,
};
use tokio::{sync::mpsc, time::Instant};

use crate::{
    cmd::{mock::RESPONSE_BODY, run::reporter::FailureKind},
    identity::IdentityPool,
};

use super::{DriverEvent, RequestResult};

/// Event driven dispatch: the control task issues every request back to
/// back without waiting; each request completes later through its
/// identity's pooled client connection. A transport error is a recorded
/// outcome, not a run abort.
pub(super) struct NonBlockingDispatcher {
    guard: ShutdownGuard,
    pool: Arc<IdentityPool>,
    uri: Uri,
    started: Instant,
    event_tx: mpsc::Sender<DriverEvent>,
}

impl NonBlockingDispatcher {
    pub(super) fn try_new(
        guard: ShutdownGuard,
        pool: IdentityPool,
        target: SocketAddress,
        started: Instant,
        event_tx: mpsc::Sender<DriverEvent>,
    ) -> Result<Self, OpaqueError> {
        let uri = format!("http://{target}/")
            .parse()
            .context("parse target uri")?;
        Ok(Self {
            guard,
            pool: Arc::new(pool),
            uri,
            started,
            event_tx,
        })
    }

    pub(super) fn dispatch(&self, index: usize) -> Result<(), OpaqueError> {
        let identity = self.pool.for_request(index)?;
        let uri = self.uri.clone();
        let started = self.started;
        let dispatched_at = started.elapsed();
        let event_tx = self.event_tx.clone();

        self.guard.spawn_task_fn(async move |guard| {
            let _permit = tokio::select! {
                _ = guard.cancelled() => {
                    tracing::error!("cancel wait for identity permit: guard shutdown");
                    return;
                }
                permit = identity.acquire_permit() => permit,
            };

            let (status, failure) = match identity.client().get(uri).send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if !(200..300).contains(&status) {
                        (Some(status), Some(FailureKind::HttpStatus))
                    } else {
                        match resp.try_into_string().await {
                            Ok(body) if body == RESPONSE_BODY => (Some(status), None),
                            Ok(body) => {
                                tracing::debug!(
                                    "request {index}: unexpected response body ({} bytes)",
                                    body.len(),
                                );
                                (Some(status), Some(FailureKind::Body))
                            }
                            Err(err) => {
                                tracing::debug!("request {index}: read response body: {err}");
                                (Some(status), Some(FailureKind::Transport))
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::debug!(
                        "request {index} via {}: transport error: {err}",
                        identity.local_addr(),
                    );
                    (None, Some(FailureKind::Transport))
                }
            };

            let result = RequestResult {
                index,
                identity: identity.index(),
                dispatched_at,
                completed_at: started.elapsed(),
                status,
                failure,
            };
            if let Err(err) = event_tx.send(DriverEvent::Finished(result)).await {
                tracing::debug!("failed to send request result: {err}");
            }
        });

        Ok(())
    }
}
