//! Source identity pool.
//!
//! The OS caps how many simultaneous TCP connections a single source
//! address can hold against one target. The pool works around that
//! ceiling by partitioning the request range over multiple local
//! loopback addresses (`127.0.0.<identity>`), each with its own
//! pooled client context and in-flight cap.

use std::{net::Ipv4Addr, sync::Arc};

use rama::{
    Service as _,
    error::{ErrorContext as _, OpaqueError},
    http::{Request, Response, client::EasyHttpWebClient},
    net::client::pool::PoolConfig,
    rt::Executor,
    service::BoxService,
};
use tokio::sync::{Semaphore, SemaphorePermit};

mod transport;

use self::transport::new_bound_tcp_connector;

/// The addressable identity space: `127.0.0.1` through `127.0.0.254`.
pub const MAX_IDENTITY_COUNT: usize = 254;

/// Deterministic identity assignment: requests `0..cap-1` map to
/// identity 1, `cap..2cap-1` to identity 2, and so on.
pub fn assign_identity(request_index: usize, per_identity_cap: usize) -> usize {
    request_index / per_identity_cap.max(1) + 1
}

/// Number of identities needed to spread `total_requests` with at most
/// `per_identity_cap` requests each.
pub fn identity_count(total_requests: usize, per_identity_cap: usize) -> usize {
    total_requests.div_ceil(per_identity_cap.max(1))
}

/// The distinct local address owned by the given identity index.
pub fn identity_local_addr(identity: usize) -> Ipv4Addr {
    debug_assert!((1..=MAX_IDENTITY_COUNT).contains(&identity));
    Ipv4Addr::new(127, 0, 0, identity as u8)
}

pub fn validate_identity_count(count: usize) -> Result<(), OpaqueError> {
    if count > MAX_IDENTITY_COUNT {
        return Err(OpaqueError::from_display(format!(
            "{count} source identities required: exceeds the addressable space of {MAX_IDENTITY_COUNT}",
        )));
    }
    Ok(())
}

/// One provisioned source identity: a pooled client context bound to a
/// distinct local address, plus the in-flight permits for its cap.
#[derive(Debug)]
pub struct SourceIdentity {
    index: usize,
    local_addr: Ipv4Addr,
    client: BoxService<Request, Response, OpaqueError>,
    permits: Semaphore,
}

impl SourceIdentity {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn local_addr(&self) -> Ipv4Addr {
        self.local_addr
    }

    /// Cloned handle to this identity's pooled client context.
    pub fn client(&self) -> BoxService<Request, Response, OpaqueError> {
        self.client.clone()
    }

    /// Wait for one of this identity's in-flight slots.
    pub async fn acquire_permit(&self) -> SemaphorePermit<'_> {
        self.permits
            .acquire()
            .await
            .expect("identity semaphore is never closed")
    }
}

/// The full set of provisioned identities for one run.
///
/// Provisioned once at run start and read-only afterwards; dropping the
/// pool on any exit path releases all client contexts exactly once.
#[derive(Debug)]
pub struct IdentityPool {
    identities: Vec<Arc<SourceIdentity>>,
    per_identity_cap: usize,
}

impl IdentityPool {
    /// Provision one bound client context per identity in `[1, identity_count]`.
    ///
    /// Fails fast, before anything is dispatched, when the identity count
    /// exceeds the addressable space.
    pub fn provision(
        exec: Executor,
        identity_count: usize,
        per_identity_cap: usize,
    ) -> Result<Self, OpaqueError> {
        validate_identity_count(identity_count)?;
        if identity_count == 0 {
            return Err(OpaqueError::from_display(
                "at least one source identity is required",
            ));
        }
        if per_identity_cap == 0 {
            return Err(OpaqueError::from_display(
                "per identity cap must be at least 1",
            ));
        }

        let mut identities = Vec::with_capacity(identity_count);
        for index in 1..=identity_count {
            let local_addr = identity_local_addr(index);
            let client = new_identity_web_client(exec.clone(), local_addr, per_identity_cap)
                .with_context(|| {
                    format!("create web client for source identity {index} ({local_addr})")
                })?;
            identities.push(Arc::new(SourceIdentity {
                index,
                local_addr,
                client,
                permits: Semaphore::new(per_identity_cap),
            }));
        }

        Ok(Self {
            identities,
            per_identity_cap,
        })
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Resolve the identity assigned to the given request index.
    pub fn for_request(&self, request_index: usize) -> Result<Arc<SourceIdentity>, OpaqueError> {
        let identity = assign_identity(request_index, self.per_identity_cap);
        self.identities
            .get(identity - 1)
            .cloned()
            .with_context(|| {
                format!("request {request_index}: identity {identity} outside provisioned pool")
            })
    }
}

/// A pooled web client whose transport is pinned to the identity's
/// local address.
///
/// The pool must be able to hold the identity's full cap of sockets at
/// once, so its capacity is set explicitly instead of trusting the
/// default limits; connections are never recycled by idle age.
fn new_identity_web_client(
    exec: Executor,
    local_addr: Ipv4Addr,
    per_identity_cap: usize,
) -> Result<BoxService<Request, Response, OpaqueError>, OpaqueError> {
    let pool_config = PoolConfig::default().with_max_active(per_identity_cap);
    Ok(EasyHttpWebClient::connector_builder()
        .with_custom_transport_connector(new_bound_tcp_connector(exec, local_addr))
        .without_tls_proxy_support()
        .without_proxy_support()
        // the harness speaks plain HTTP/1.1 to its responder
        .without_tls_support()
        .with_default_http_connector()
        .try_with_connection_pool(pool_config)
        .context("create connection pool for identity web client")?
        .build_client()
        .boxed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_is_stable_and_contiguous() {
        let cap = 1_000;
        for request_index in 0..10_000 {
            assert_eq!(
                request_index / cap + 1,
                assign_identity(request_index, cap),
                "request {request_index}"
            );
        }

        assert_eq!(1, assign_identity(0, cap));
        assert_eq!(1, assign_identity(cap - 1, cap));
        assert_eq!(2, assign_identity(cap, cap));
        assert_eq!(2, assign_identity(2 * cap - 1, cap));
        assert_eq!(3, assign_identity(2 * cap, cap));
    }

    #[test]
    fn no_identity_receives_more_than_cap_requests() {
        let cap = 7;
        let total = 100;

        let mut per_identity = vec![0usize; identity_count(total, cap)];
        for request_index in 0..total {
            per_identity[assign_identity(request_index, cap) - 1] += 1;
        }

        assert!(per_identity.iter().all(|&n| n <= cap));
        assert_eq!(total, per_identity.iter().sum::<usize>());
    }

    #[test]
    fn hundred_thousand_requests_at_cap_thousand_need_hundred_identities() {
        assert_eq!(100, identity_count(100_000, 1_000));
    }

    #[test]
    fn identity_addresses_are_distinct_loopback() {
        let a = identity_local_addr(1);
        let b = identity_local_addr(254);
        assert!(a.is_loopback());
        assert!(b.is_loopback());
        assert_ne!(a, b);
        assert_eq!(Ipv4Addr::new(127, 0, 0, 42), identity_local_addr(42));
    }

    #[test]
    fn identity_count_beyond_address_space_is_rejected() {
        assert!(validate_identity_count(254).is_ok());
        assert!(validate_identity_count(255).is_err());
    }

    #[tokio::test]
    async fn provision_creates_one_client_per_identity() {
        let shutdown = rama::graceful::Shutdown::default();
        let exec = Executor::graceful(shutdown.guard());

        let pool = IdentityPool::provision(exec, 100, 1_000).expect("provision pool");
        assert!(!pool.is_empty());
        assert_eq!(100, pool.len());

        let first = pool.for_request(0).expect("identity for request 0");
        let last = pool.for_request(99_999).expect("identity for request 99999");
        assert_eq!(1, first.index());
        assert_eq!(100, last.index());
        assert!(pool.for_request(100_000).is_err());
    }

    #[tokio::test]
    async fn provision_fails_fast_beyond_address_space() {
        let shutdown = rama::graceful::Shutdown::default();
        let exec = Executor::graceful(shutdown.guard());

        assert!(IdentityPool::provision(exec, 255, 1_000).is_err());
    }
}
