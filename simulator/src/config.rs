use crate::{backoff::RetryPolicy, defaults};
use serde::{Deserialize, Serialize};
use stakebook_execution::{
    CrashBucket, CrashDistribution, DistributionError, LedgerConfig, RoundConfig, WagerLimits,
    WithdrawalPolicy,
};
use stakebook_types::Amount;
use std::{net::IpAddr, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::Level;

/// Raw configuration as read from YAML. Every field has a default, so an empty
/// document is a valid configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Seed for crash points and sweeper draws. Random when absent.
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default = "default_withdrawal_cutoff_ms")]
    pub withdrawal_cutoff_ms: u64,
    #[serde(default = "default_max_commit_attempts")]
    pub max_commit_attempts: usize,
    #[serde(default = "default_starting_balance")]
    pub starting_balance: f64,

    #[serde(default)]
    pub round: RoundSection,
    #[serde(default)]
    pub sweeper: SweeperSection,
    #[serde(default)]
    pub http: HttpSection,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_min_stake")]
    pub min_stake: f64,
    #[serde(default = "default_max_stake")]
    pub max_stake: f64,
    #[serde(default = "default_min_auto_cash_out")]
    pub min_auto_cash_out: f64,
    #[serde(default = "default_max_auto_cash_out")]
    pub max_auto_cash_out: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundSection {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_growth_rate")]
    pub growth_rate: f64,
    #[serde(default = "default_jitter_min")]
    pub jitter_min: f64,
    #[serde(default = "default_jitter_max")]
    pub jitter_max: f64,
    /// Crash point buckets. The built-in distribution is used when empty.
    #[serde(default)]
    pub buckets: Vec<CrashBucket>,
    #[serde(default = "default_settlement_retry_attempts")]
    pub settlement_retry_attempts: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweeperSection {
    #[serde(default = "default_sweep_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_resolution_delay_ms")]
    pub resolution_delay_ms: u64,
    #[serde(default = "default_win_probability")]
    pub win_probability: f64,
    #[serde(default = "default_sweep_retry_attempts")]
    pub retry_attempts: usize,
    #[serde(default = "default_sweep_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_sweep_concurrency")]
    pub concurrency: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpSection {
    /// Requests per second per client IP. Rate limiting is off unless both this
    /// and `rate_limit_burst` are set.
    #[serde(default)]
    pub rate_limit_per_second: Option<u64>,
    #[serde(default)]
    pub rate_limit_burst: Option<u32>,
    #[serde(default = "default_http_body_limit_bytes")]
    pub body_limit_bytes: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("{field} must be a finite non-negative amount (got {value})")]
    InvalidAmount { field: &'static str, value: f64 },
    #[error("win_probability must be within [0, 1] (got {value})")]
    InvalidProbability { value: f64 },
    #[error("invalid limits: {0}")]
    InvalidLimits(&'static str),
    #[error("invalid round config: {0}")]
    InvalidRound(&'static str),
    #[error("invalid crash distribution: {0}")]
    InvalidDistribution(#[from] DistributionError),
}

#[derive(Clone, Debug)]
pub struct SweeperConfig {
    pub interval: Duration,
    pub resolution_delay_ms: u64,
    pub win_probability: f64,
    pub retry: RetryPolicy,
    pub concurrency: usize,
}

#[derive(Clone, Debug)]
pub struct HttpConfig {
    pub rate_limit: Option<(u64, u32)>,
    pub body_limit_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct ValidatedConfig {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: Level,
    pub seed: Option<u64>,
    pub ledger: LedgerConfig,
    pub round: RoundConfig,
    pub distribution: CrashDistribution,
    pub settlement_retry: RetryPolicy,
    pub sweeper: SweeperConfig,
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            seed: None,
            limits: LimitsConfig::default(),
            withdrawal_cutoff_ms: default_withdrawal_cutoff_ms(),
            max_commit_attempts: default_max_commit_attempts(),
            starting_balance: default_starting_balance(),
            round: RoundSection::default(),
            sweeper: SweeperSection::default(),
            http: HttpSection::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            min_stake: default_min_stake(),
            max_stake: default_max_stake(),
            min_auto_cash_out: default_min_auto_cash_out(),
            max_auto_cash_out: default_max_auto_cash_out(),
        }
    }
}

impl Default for RoundSection {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            growth_rate: default_growth_rate(),
            jitter_min: default_jitter_min(),
            jitter_max: default_jitter_max(),
            buckets: Vec::new(),
            settlement_retry_attempts: default_settlement_retry_attempts(),
        }
    }
}

impl Default for SweeperSection {
    fn default() -> Self {
        Self {
            interval_ms: default_sweep_interval_ms(),
            resolution_delay_ms: default_resolution_delay_ms(),
            win_probability: default_win_probability(),
            retry_attempts: default_sweep_retry_attempts(),
            retry_base_ms: default_sweep_retry_base_ms(),
            concurrency: default_sweep_concurrency(),
        }
    }
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            rate_limit_per_second: None,
            rate_limit_burst: None,
            body_limit_bytes: default_http_body_limit_bytes(),
        }
    }
}

impl Config {
    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        let limits = WagerLimits {
            min_stake: amount("limits.min_stake", self.limits.min_stake)?,
            max_stake: amount("limits.max_stake", self.limits.max_stake)?,
            min_target: self.limits.min_auto_cash_out,
            max_target: self.limits.max_auto_cash_out,
        };
        limits.validate().map_err(ConfigError::InvalidLimits)?;

        nonzero("max_commit_attempts", self.max_commit_attempts as u64)?;
        let ledger = LedgerConfig {
            limits,
            withdrawal: WithdrawalPolicy::new(self.withdrawal_cutoff_ms),
            max_commit_attempts: self.max_commit_attempts,
            starting_balance: amount("starting_balance", self.starting_balance)?,
        };

        let round = RoundConfig {
            tick_ms: self.round.tick_ms,
            growth_rate: self.round.growth_rate,
            jitter_min: self.round.jitter_min,
            jitter_max: self.round.jitter_max,
        };
        round.validate().map_err(ConfigError::InvalidRound)?;
        let distribution = if self.round.buckets.is_empty() {
            CrashDistribution::default()
        } else {
            CrashDistribution::new(self.round.buckets)?
        };

        nonzero("sweeper.interval_ms", self.sweeper.interval_ms)?;
        nonzero("sweeper.retry_attempts", self.sweeper.retry_attempts as u64)?;
        nonzero("sweeper.concurrency", self.sweeper.concurrency as u64)?;
        nonzero(
            "round.settlement_retry_attempts",
            self.round.settlement_retry_attempts as u64,
        )?;
        let win_probability = self.sweeper.win_probability;
        if !(0.0..=1.0).contains(&win_probability) {
            return Err(ConfigError::InvalidProbability {
                value: win_probability,
            });
        }
        let retry_base = Duration::from_millis(self.sweeper.retry_base_ms);
        let sweeper = SweeperConfig {
            interval: Duration::from_millis(self.sweeper.interval_ms),
            resolution_delay_ms: self.sweeper.resolution_delay_ms,
            win_probability,
            retry: RetryPolicy::new(self.sweeper.retry_attempts, retry_base),
            concurrency: self.sweeper.concurrency,
        };

        nonzero("http.body_limit_bytes", self.http.body_limit_bytes as u64)?;
        let rate_limit = match (self.http.rate_limit_per_second, self.http.rate_limit_burst) {
            (Some(per_second), Some(burst)) if per_second > 0 && burst > 0 => {
                Some((per_second, burst))
            }
            _ => None,
        };

        Ok(ValidatedConfig {
            host: self.host,
            port: self.port,
            log_level,
            seed: self.seed,
            ledger,
            round,
            distribution,
            settlement_retry: RetryPolicy::new(self.round.settlement_retry_attempts, retry_base),
            sweeper,
            http: HttpConfig {
                rate_limit,
                body_limit_bytes: self.http.body_limit_bytes,
            },
        })
    }
}

fn nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(())
}

fn amount(field: &'static str, value: f64) -> Result<Amount, ConfigError> {
    Amount::from_decimal(value).ok_or(ConfigError::InvalidAmount { field, value })
}

fn default_host() -> IpAddr {
    IpAddr::from_str(defaults::DEFAULT_HOST).unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

fn default_port() -> u16 {
    defaults::DEFAULT_PORT
}

fn default_log_level() -> String {
    defaults::DEFAULT_LOG_LEVEL.to_string()
}

fn default_min_stake() -> f64 {
    defaults::DEFAULT_MIN_STAKE
}

fn default_max_stake() -> f64 {
    defaults::DEFAULT_MAX_STAKE
}

fn default_min_auto_cash_out() -> f64 {
    defaults::DEFAULT_MIN_AUTO_CASH_OUT
}

fn default_max_auto_cash_out() -> f64 {
    defaults::DEFAULT_MAX_AUTO_CASH_OUT
}

fn default_withdrawal_cutoff_ms() -> u64 {
    defaults::DEFAULT_WITHDRAWAL_CUTOFF_MS
}

fn default_max_commit_attempts() -> usize {
    defaults::DEFAULT_MAX_COMMIT_ATTEMPTS
}

fn default_starting_balance() -> f64 {
    defaults::DEFAULT_STARTING_BALANCE
}

fn default_tick_ms() -> u64 {
    defaults::DEFAULT_TICK_MS
}

fn default_growth_rate() -> f64 {
    defaults::DEFAULT_GROWTH_RATE
}

fn default_jitter_min() -> f64 {
    defaults::DEFAULT_JITTER_MIN
}

fn default_jitter_max() -> f64 {
    defaults::DEFAULT_JITTER_MAX
}

fn default_settlement_retry_attempts() -> usize {
    defaults::DEFAULT_SETTLEMENT_RETRY_ATTEMPTS
}

fn default_sweep_interval_ms() -> u64 {
    defaults::DEFAULT_SWEEP_INTERVAL_MS
}

fn default_resolution_delay_ms() -> u64 {
    defaults::DEFAULT_RESOLUTION_DELAY_MS
}

fn default_win_probability() -> f64 {
    defaults::DEFAULT_WIN_PROBABILITY
}

fn default_sweep_retry_attempts() -> usize {
    defaults::DEFAULT_SWEEP_RETRY_ATTEMPTS
}

fn default_sweep_retry_base_ms() -> u64 {
    defaults::DEFAULT_SWEEP_RETRY_BASE_MS
}

fn default_sweep_concurrency() -> usize {
    defaults::DEFAULT_SWEEP_CONCURRENCY
}

fn default_http_body_limit_bytes() -> usize {
    defaults::DEFAULT_HTTP_BODY_LIMIT_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        let config = config.validate().unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.ledger, LedgerConfig::default());
        assert_eq!(config.round, RoundConfig::default());
        assert_eq!(config.distribution, CrashDistribution::default());
        assert_eq!(config.sweeper.interval, Duration::from_secs(30));
        assert_eq!(config.sweeper.win_probability, 0.40);
        assert_eq!(config.sweeper.retry.attempts, 3);
        assert!(config.http.rate_limit.is_none());
        assert_eq!(
            config.http.body_limit_bytes,
            defaults::DEFAULT_HTTP_BODY_LIMIT_BYTES
        );

        let config = Config::default().validate().unwrap();
        assert_eq!(
            config.http.body_limit_bytes,
            defaults::DEFAULT_HTTP_BODY_LIMIT_BYTES
        );
    }

    #[test]
    fn parses_nested_sections() {
        let yaml = r#"
port: 9000
log_level: debug
seed: 7
starting_balance: 100
limits:
  max_stake: 500
sweeper:
  interval_ms: 1000
  win_probability: 0.5
round:
  tick_ms: 50
  buckets:
    - { probability: 0.5, low: 1.0, high: 1.0 }
    - { probability: 0.5, low: 1.0, high: 3.0 }
http:
  rate_limit_per_second: 10
  rate_limit_burst: 20
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let config = config.validate().unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.ledger.starting_balance, Amount::units(100));
        assert_eq!(config.ledger.limits.max_stake, Amount::units(500));
        assert_eq!(config.ledger.limits.min_stake, Amount::units(1));
        assert_eq!(config.sweeper.interval, Duration::from_secs(1));
        assert_eq!(config.round.tick_ms, 50);
        assert_eq!(config.distribution.buckets().len(), 2);
        assert_eq!(config.http.rate_limit, Some((10, 20)));
    }

    #[test]
    fn rejects_invalid_values() {
        let config = Config {
            log_level: "loud".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel { .. })
        ));

        let mut config = Config::default();
        config.sweeper.win_probability = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidProbability { .. })
        ));

        let mut config = Config::default();
        config.sweeper.interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sweeper.interval_ms"), "{err}");

        let config: Config = serde_yaml::from_str("http:\n  body_limit_bytes: 0").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("http.body_limit_bytes"), "{err}");

        let mut config = Config::default();
        config.round.buckets = vec![CrashBucket {
            probability: 0.3,
            low: 1.0,
            high: 2.0,
        }];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDistribution(_))
        ));

        let mut config = Config::default();
        config.limits.min_stake = 50.0;
        config.limits.max_stake = 10.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLimits(_))));
    }
}
