use std::time::Duration;

use rama::error::OpaqueError;

use crate::identity;

/// Dispatch strategies of the load driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Strategy {
    /// A single control task issues every request back to back;
    /// completions arrive later through pooled event driven clients.
    NonBlocking,
    /// One dedicated OS thread per request, each with its own
    /// direct blocking socket. Resource exhaustion is the experiment.
    Blocking,
}

/// Load run configuration.
/// This models how many requests are produced and how they are spread
/// over the source identity pool.
#[derive(Debug, Clone, clap::Args)]
pub struct RunConfig {
    /// Total number of concurrent requests to dispatch.
    #[arg(long = "requests", short = 'n', value_name = "N", default_value_t = 100_000)]
    pub total_requests: usize,

    /// Maximum number of simultaneous in-flight requests per source identity.
    #[arg(long = "per-identity-cap", value_name = "N", default_value_t = 1_000)]
    pub per_identity_cap: usize,

    /// Run deadline; when it elapses the run is reported as incomplete.
    #[arg(long = "timeout", value_name = "SECONDS", default_value_t = 600.)]
    pub run_timeout: f64,

    /// Dispatch strategy to drive the run with.
    #[arg(long, value_enum, default_value = "non-blocking")]
    pub strategy: Strategy,
}

impl RunConfig {
    /// Number of source identities the run needs,
    /// one per `per_identity_cap` slice of the request range.
    pub fn identity_count(&self) -> usize {
        identity::identity_count(self.total_requests, self.per_identity_cap)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.run_timeout.max(0.))
    }

    /// Validate the configuration before anything is provisioned or dispatched.
    pub fn validate(&self) -> Result<(), OpaqueError> {
        if self.total_requests == 0 {
            return Err(OpaqueError::from_display(
                "total request count must be at least 1",
            ));
        }
        if self.per_identity_cap == 0 {
            return Err(OpaqueError::from_display(
                "per identity cap must be at least 1",
            ));
        }
        identity::validate_identity_count(self.identity_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(total_requests: usize, per_identity_cap: usize) -> RunConfig {
        RunConfig {
            total_requests,
            per_identity_cap,
            run_timeout: 600.,
            strategy: Strategy::NonBlocking,
        }
    }

    #[test]
    fn identity_count_is_ceil_of_total_over_cap() {
        assert_eq!(100, cfg(100_000, 1_000).identity_count());
        assert_eq!(101, cfg(100_001, 1_000).identity_count());
        assert_eq!(1, cfg(1, 1_000).identity_count());
    }

    #[test]
    fn validate_accepts_the_observed_experiment_shape() {
        assert!(cfg(100_000, 1_000).validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_requests_and_zero_cap() {
        assert!(cfg(0, 1_000).validate().is_err());
        assert!(cfg(100, 0).validate().is_err());
    }

    #[test]
    fn validate_rejects_identity_counts_beyond_the_loopback_space() {
        // 255 identities needed, one more than fits in 127.0.0.x
        assert!(cfg(255_000, 1_000).validate().is_err());
        assert!(cfg(254_000, 1_000).validate().is_ok());
    }
}
