use std::{convert::Infallible, sync::Arc, time::Duration};

use rama::{
    Layer as _, Service,
    error::{ErrorContext as _, OpaqueError},
    graceful::ShutdownGuard,
    http::{
        HeaderValue, Request, Response,
        layer::{required_header::AddRequiredResponseHeadersLayer, trace::TraceLayer},
        server::HttpServer,
        service::web::response::IntoResponse,
    },
    net::socket::Interface,
    rt::Executor,
    tcp::server::TcpListener,
    telemetry::tracing,
};

use clap::Args;

use crate::{config::ResponderConfig, utils};

/// The fixed payload every request is answered with.
pub const RESPONSE_BODY: &str = "foo";

#[derive(Debug, Clone, Args)]
/// run the mock responder used as load target
pub struct MockCommand {
    #[clap(flatten)]
    config: ResponderConfig,

    /// network interface to bind to
    #[arg(
        long,
        short = 'b',
        value_name = "INTERFACE",
        default_value = "127.0.0.1:0"
    )]
    pub bind: Interface,
}

pub async fn exec(guard: ShutdownGuard, args: MockCommand) -> Result<(), OpaqueError> {
    let exec = Executor::graceful(guard);
    let tcp_listener = TcpListener::bind(args.bind.clone(), exec.clone())
        .await
        .map_err(OpaqueError::from_boxed)
        .context("bind mock responder")?;

    let http_svc = (
        TraceLayer::new_for_http(),
        AddRequiredResponseHeadersLayer::new()
            .with_server_header_value(HeaderValue::from_static(utils::env::project_name())),
    )
        .into_layer(Arc::new(Responder::new(args.config)));

    let http_server = HttpServer::auto(exec).service(Arc::new(http_svc));

    let server_addr = tcp_listener
        .local_addr()
        .context("get bound address for mock responder")?;
    tracing::info!("mock responder listening at {server_addr}");

    tcp_listener.serve(http_server).await;

    Ok(())
}

/// Responds to every request with [`RESPONSE_BODY`] after the configured
/// delay, to simulate sustained concurrent load without backend work.
#[derive(Debug)]
pub(crate) struct Responder {
    delay: f64,
    jitter: f64,
}

impl Responder {
    pub(crate) fn new(cfg: ResponderConfig) -> Self {
        Self {
            delay: cfg.delay.unwrap_or_default().max(0.),
            jitter: cfg.jitter.unwrap_or_default().max(0.),
        }
    }

    fn compute_delay(&self) -> Duration {
        if self.jitter == 0.0 {
            return Duration::from_secs_f64(self.delay);
        }

        let span = self.jitter * 2.0;
        let u: f64 = rand::random();
        let delta = (u * span) - self.jitter;

        Duration::from_secs_f64((self.delay + delta).max(0.0))
    }
}

impl Service<Request> for Responder {
    type Output = Response;
    type Error = Infallible;

    async fn serve(&self, _req: Request) -> Result<Self::Output, Self::Error> {
        let delay = self.compute_delay();
        if delay.as_nanos() > 0 {
            tokio::time::sleep(delay).await;
        }

        Ok(RESPONSE_BODY.into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_without_jitter_is_exact() {
        let responder = Responder::new(ResponderConfig {
            delay: Some(0.25),
            jitter: None,
        });
        assert_eq!(Duration::from_secs_f64(0.25), responder.compute_delay());
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let responder = Responder::new(ResponderConfig {
            delay: Some(1.0),
            jitter: Some(0.5),
        });
        for _ in 0..100 {
            let d = responder.compute_delay().as_secs_f64();
            assert!((0.5..=1.5).contains(&d), "delay {d} out of bounds");
        }
    }

    #[test]
    fn negative_config_values_are_clamped() {
        let responder = Responder::new(ResponderConfig {
            delay: Some(-1.),
            jitter: Some(-1.),
        });
        assert_eq!(Duration::ZERO, responder.compute_delay());
    }
}
