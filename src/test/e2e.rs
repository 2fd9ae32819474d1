use std::{sync::Arc, time::Duration};

use rama::{
    graceful::Shutdown,
    http::server::HttpServer,
    net::{address::SocketAddress, socket::Interface},
    rt::Executor,
    tcp::server::TcpListener,
};

use crate::{
    cmd::{
        mock::Responder,
        run::{
            driver::{RunStatus, run_load},
            reporter::{HumanReporter, Reporter},
        },
    },
    config::{ResponderConfig, RunConfig, Strategy},
};

async fn spawn_responder(shutdown: &Shutdown, delay: f64) -> SocketAddress {
    let guard = shutdown.guard();
    let exec = Executor::graceful(guard.clone());

    let interface: Interface = "127.0.0.1:0".parse().expect("parse loopback interface");
    let listener = TcpListener::bind(interface, exec.clone())
        .await
        .expect("bind responder listener");
    let addr = listener.local_addr().expect("get responder address");

    let responder = Arc::new(Responder::new(ResponderConfig {
        delay: Some(delay),
        jitter: None,
    }));
    let server = HttpServer::auto(exec).service(responder);

    guard.spawn_task(listener.serve(server));

    addr.into()
}

fn quiet_reporter() -> Box<dyn Reporter> {
    Box::new(HumanReporter::new(Duration::from_secs(3_600)))
}

fn run_cfg(total_requests: usize, per_identity_cap: usize, strategy: Strategy) -> RunConfig {
    RunConfig {
        total_requests,
        per_identity_cap,
        run_timeout: 30.,
        strategy,
    }
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_non_blocking_run_completes_against_responder() {
    let shutdown = Shutdown::default();
    let target = spawn_responder(&shutdown, 0.).await;

    // 100 requests at cap 25: 4 identities, all bound to distinct loopback addrs
    let cfg = run_cfg(100, 25, Strategy::NonBlocking);
    let result = run_load(shutdown.guard(), target, &cfg, quiet_reporter())
        .await
        .expect("run load");

    assert_eq!(RunStatus::Complete, result.status);
    assert_eq!(100, result.succeeded);
    assert_eq!(0, result.failed);
    assert!(
        result
            .records
            .iter()
            .all(|r| r.as_ref().is_some_and(|r| r.is_ok() && r.status == Some(200)))
    );
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_non_blocking_run_records_transport_failures_and_continues() {
    let shutdown = Shutdown::default();

    // nothing listens here: every request fails, none aborts the run
    let target: SocketAddress = "127.0.0.1:9".parse().expect("parse dead target");

    let cfg = run_cfg(10, 5, Strategy::NonBlocking);
    let result = run_load(shutdown.guard(), target, &cfg, quiet_reporter())
        .await
        .expect("run load");

    assert_eq!(RunStatus::Complete, result.status);
    assert_eq!(0, result.succeeded);
    assert_eq!(10, result.failed);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_identity_holds_its_full_cap_of_connections_at_once() {
    let shutdown = Shutdown::default();
    let target = spawn_responder(&shutdown, 1.).await;

    // one identity at cap 40 against a responder that holds every request
    // open for a second: the run only fits the deadline if the identity's
    // pool carries all 40 sockets simultaneously
    let cfg = RunConfig {
        total_requests: 40,
        per_identity_cap: 40,
        run_timeout: 3.,
        strategy: Strategy::NonBlocking,
    };
    let result = run_load(shutdown.guard(), target, &cfg, quiet_reporter())
        .await
        .expect("run load");

    assert_eq!(RunStatus::Complete, result.status);
    assert_eq!(40, result.succeeded);
    assert_eq!(0, result.failed);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_blocking_run_aborts_on_transport_error() {
    let shutdown = Shutdown::default();

    // nothing listens here: under the blocking strategy the first refused
    // connection is fatal for the whole run
    let target: SocketAddress = "127.0.0.1:9".parse().expect("parse dead target");

    let cfg = run_cfg(4, 2, Strategy::Blocking);
    let result = run_load(shutdown.guard(), target, &cfg, quiet_reporter()).await;

    assert!(result.is_err());
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_blocking_run_completes_against_responder() {
    let shutdown = Shutdown::default();
    let target = spawn_responder(&shutdown, 0.).await;

    let cfg = run_cfg(8, 4, Strategy::Blocking);
    let result = run_load(shutdown.guard(), target, &cfg, quiet_reporter())
        .await
        .expect("run load");

    assert_eq!(RunStatus::Complete, result.status);
    assert_eq!(8, result.succeeded);
    assert_eq!(0, result.failed);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_slow_responder_reports_run_incomplete() {
    let shutdown = Shutdown::default();
    let target = spawn_responder(&shutdown, 5.).await;

    let cfg = RunConfig {
        total_requests: 4,
        per_identity_cap: 4,
        run_timeout: 0.3,
        strategy: Strategy::NonBlocking,
    };
    let result = run_load(shutdown.guard(), target, &cfg, quiet_reporter())
        .await
        .expect("run load");

    assert_eq!(RunStatus::Incomplete, result.status);
    assert_eq!(0, result.terminal());
    assert!(result.records.iter().all(Option::is_none));
}
