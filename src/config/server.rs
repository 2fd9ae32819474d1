/// Mock responder behavior configuration.
/// This models backend processing cost without real backend work.
#[derive(Debug, Clone, clap::Args, Default)]
pub struct ResponderConfig {
    /// Base processing time before responding.
    #[arg(long, value_name = "SECONDS")]
    pub delay: Option<f64>,

    /// Random delay added to delay.
    /// Models IO waits and backend variability.
    #[arg(long, value_name = "SECONDS")]
    pub jitter: Option<f64>,
}
