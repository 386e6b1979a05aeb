use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::{error::ConfigError, think::ThinkTime};

/// Everything a replay run needs besides the dataset and the target.
///
/// Defaults match the command-line tool: 100 clients, 5 ms between
/// transactions, 5 ms of think time after every statement, no throughput
/// target and no time limit.
///
/// ```rust
/// use std::time::Duration;
/// use paceline::ReplayConfig;
///
/// let config = ReplayConfig::builder()
///     .clients(16)
///     .target_tps(500.0)
///     .duration(Some(Duration::from_secs(60)))
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct ReplayConfig {
    /// Number of concurrent workers, each with its own connection.
    #[builder(default = 100)]
    pub clients: usize,
    /// Share of the dataset (a prefix of the id space) workers draw from.
    #[builder(default = 1.0)]
    pub dataset_fraction: f64,
    /// Total time over which worker launches are spread.
    #[builder(default)]
    pub start_stagger: Duration,
    /// Initial inter-transaction delay; the controller moves it when a target is set.
    #[builder(default = Duration::from_millis(5))]
    pub transaction_delay: Duration,
    /// Stop after this long. `None` runs until interrupted.
    #[builder(default)]
    pub duration: Option<Duration>,
    /// Stop once this many transactions have completed.
    #[builder(default)]
    pub transaction_limit: Option<u64>,
    #[builder(default = Duration::from_secs(1))]
    pub report_interval: Duration,
    #[builder(default = ThinkTime::uniform(5, 5))]
    pub think_time: ThinkTime,
    /// Wanted transactions per second. Zero disables rate control.
    #[builder(default = 0.0)]
    pub target_tps: f64,
    #[builder(default = 1.6)]
    pub slow_start_factor: f64,
    #[builder(default = Duration::from_millis(500))]
    pub wait_event_interval: Duration,
    /// Seeds worker RNGs (worker `i` uses `seed + i`) for reproducible sampling.
    #[builder(default, setter(strip_option))]
    pub seed: Option<u64>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ReplayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clients == 0 {
            return Err(ConfigError::NoClients);
        }
        if !(self.dataset_fraction > 0.0 && self.dataset_fraction <= 1.0) {
            return Err(ConfigError::DatasetFraction(self.dataset_fraction));
        }
        if self.think_time.min > self.think_time.max {
            return Err(ConfigError::ThinkTimeRange {
                min: self.think_time.min,
                max: self.think_time.max,
            });
        }
        if !self.target_tps.is_finite() || self.target_tps < 0.0 {
            return Err(ConfigError::TargetTps(self.target_tps));
        }
        if !self.slow_start_factor.is_finite() || self.slow_start_factor <= 0.0 {
            return Err(ConfigError::SlowStartFactor(self.slow_start_factor));
        }
        if self.report_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("report interval"));
        }
        if self.wait_event_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("wait event interval"));
        }
        if self.transaction_limit == Some(0) {
            return Err(ConfigError::ZeroTransactionLimit);
        }
        Ok(())
    }

    /// Pause between two worker launches.
    pub fn launch_gap(&self) -> Duration {
        match u32::try_from(self.clients) {
            Ok(clients) if clients > 0 => self.start_stagger / clients,
            _ => Duration::ZERO,
        }
    }
}
