use std::time::Duration;

/// Default base name of the shard lists.
pub const DEFAULT_QUEUE_NAME: &str = "cmdqueue";

/// Default blocking-pop timeout; also bounds shutdown latency.
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capacity of each worker's intake buffer.
pub const DEFAULT_INTAKE_CAPACITY: usize = 100;

/// Default lower bound of the re-queue backoff window.
pub const DEFAULT_BACKOFF_MIN: Duration = Duration::from_secs(2);

/// Default upper bound of the re-queue backoff window.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(7);

/// Errors from building or validating a [`WorkerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable {var} has an invalid value: {value:?}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("Invalid worker configuration: {0}")]
    Invalid(String),

    #[error("At least one queue address is required")]
    NoWorkers,
}

/// Per-worker configuration, applied identically to every worker.
///
/// Start from [`WorkerConfig::default`] (or [`WorkerConfig::from_env`]) and
/// layer overrides on top with the `with_*` builders.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Base name of the shard lists; the shard key is
    /// `lowercase(queue_name)_<worker index>`.
    pub queue_name: String,
    /// How long a single blocking pop waits for an element.
    pub queue_timeout: Duration,
    /// Capacity of the intake buffer in front of the enqueue loop.
    pub intake_capacity: usize,
    /// Backoff window used before re-queueing a command.
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    /// Move undecodable payloads to `<shard>_dead` instead of dropping them.
    pub dead_letter: bool,
    /// Label pairs attached to every log line of the worker.
    pub labels: Vec<(String, String)>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
            backoff_min: DEFAULT_BACKOFF_MIN,
            backoff_max: DEFAULT_BACKOFF_MAX,
            dead_letter: false,
            labels: Vec::new(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default     |
    /// |--------------------------|-------------|
    /// | `CMD_QUEUE`              | `cmdqueue`  |
    /// | `CMD_QUEUE_TIMEOUT_SECS` | `5`         |
    /// | `CMD_INTAKE_CAPACITY`    | `100`       |
    /// | `CMD_BACKOFF_MIN_MS`     | `2000`      |
    /// | `CMD_BACKOFF_MAX_MS`     | `7000`      |
    /// | `CMD_DEAD_LETTER`        | `false`     |
    /// | `WORKER_LABELS`          | (none)      |
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("CMD_QUEUE") {
            config.queue_name = name;
        }
        if let Some(secs) = parse_env::<u64>("CMD_QUEUE_TIMEOUT_SECS")? {
            config.queue_timeout = Duration::from_secs(secs);
        }
        if let Some(capacity) = parse_env::<usize>("CMD_INTAKE_CAPACITY")? {
            config.intake_capacity = capacity;
        }
        if let Some(ms) = parse_env::<u64>("CMD_BACKOFF_MIN_MS")? {
            config.backoff_min = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>("CMD_BACKOFF_MAX_MS")? {
            config.backoff_max = Duration::from_millis(ms);
        }
        if let Some(flag) = parse_env::<bool>("CMD_DEAD_LETTER")? {
            config.dead_letter = flag;
        }
        if let Ok(raw) = std::env::var("WORKER_LABELS") {
            config.labels = parse_labels(&raw).ok_or(ConfigError::InvalidEnv {
                var: "WORKER_LABELS",
                value: raw,
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    pub fn with_intake_capacity(mut self, capacity: usize) -> Self {
        self.intake_capacity = capacity;
        self
    }

    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_min = min;
        self.backoff_max = max;
        self
    }

    pub fn with_dead_letter(mut self, enabled: bool) -> Self {
        self.dead_letter = enabled;
        self
    }

    /// Add a log label. Later labels with the same key are kept alongside
    /// earlier ones.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_name.trim().is_empty() {
            return Err(ConfigError::Invalid("queue name must not be empty".into()));
        }
        if self.queue_timeout.is_zero() {
            // A zero BLPOP timeout blocks forever and would make shutdown hang.
            return Err(ConfigError::Invalid("queue timeout must be positive".into()));
        }
        if self.intake_capacity == 0 {
            return Err(ConfigError::Invalid("intake capacity must be positive".into()));
        }
        if self.backoff_min > self.backoff_max {
            return Err(ConfigError::Invalid(format!(
                "backoff min {:?} exceeds max {:?}",
                self.backoff_min, self.backoff_max
            )));
        }
        Ok(())
    }

    /// Labels rendered as `k=v,k=v` for the worker span.
    pub fn labels_display(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Default Redis address when `REDIS_ADDRS` is unset.
pub const DEFAULT_REDIS_ADDR: &str = "127.0.0.1:6379";

/// Process-level settings read by the `cmdpool-worker` binary.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    /// One worker is started per address.
    pub redis_addrs: Vec<String>,
    /// How long to wait for the loops to stop after a shutdown signal.
    pub shutdown_timeout: Duration,
    /// Per-request timeout for lifecycle webhooks.
    pub webhook_timeout: Duration,
}

impl DaemonConfig {
    /// Load daemon settings from environment variables with defaults.
    ///
    /// | Env Var                  | Default          |
    /// |--------------------------|------------------|
    /// | `REDIS_ADDRS`            | `127.0.0.1:6379` |
    /// | `SHUTDOWN_TIMEOUT_SECS`  | `10`             |
    /// | `WEBHOOK_TIMEOUT_SECS`   | `10`             |
    pub fn from_env() -> Result<Self, ConfigError> {
        let redis_addrs = match std::env::var("REDIS_ADDRS") {
            Ok(raw) => parse_addresses(&raw),
            Err(_) => vec![DEFAULT_REDIS_ADDR.to_string()],
        };
        if redis_addrs.is_empty() {
            return Err(ConfigError::NoWorkers);
        }

        let shutdown_timeout = parse_env::<u64>("SHUTDOWN_TIMEOUT_SECS")?.unwrap_or(10);
        let webhook_timeout = parse_env::<u64>("WEBHOOK_TIMEOUT_SECS")?.unwrap_or(10);

        Ok(Self {
            redis_addrs,
            shutdown_timeout: Duration::from_secs(shutdown_timeout),
            webhook_timeout: Duration::from_secs(webhook_timeout),
        })
    }
}

/// Split a comma separated address list, skipping blanks.
pub fn parse_addresses(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(String::from)
        .collect()
}

/// Shard list key for the worker at `index`.
pub fn shard_key(queue_name: &str, index: usize) -> String {
    format!("{}_{index}", queue_name.to_lowercase())
}

/// Reserved backup key derived from a shard key. Never written to.
pub fn backup_key(shard_key: &str) -> String {
    format!("_{shard_key}_backup_")
}

/// Key receiving undecodable payloads when dead-lettering is enabled.
pub fn dead_letter_key(shard_key: &str) -> String {
    format!("{shard_key}_dead")
}

/// Parse `k=v,k=v`. Empty input yields no labels.
pub fn parse_labels(raw: &str) -> Option<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let k = k.trim();
            (!k.is_empty()).then(|| (k.to_string(), v.trim().to_string()))
        })
        .collect()
}

fn parse_env<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_name, "cmdqueue");
        assert_eq!(config.queue_timeout, Duration::from_secs(5));
        assert_eq!(config.intake_capacity, 100);
    }

    #[test]
    fn overrides_layer_on_defaults() {
        let config = WorkerConfig::default()
            .with_queue_name("Jobs")
            .with_queue_timeout(Duration::from_secs(1))
            .with_label("env", "dev");

        assert_eq!(config.queue_name, "Jobs");
        assert_eq!(config.queue_timeout, Duration::from_secs(1));
        assert_eq!(config.intake_capacity, DEFAULT_INTAKE_CAPACITY);
        assert_eq!(config.labels_display(), "env=dev");
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert_matches!(
            WorkerConfig::default().with_queue_name(" ").validate(),
            Err(ConfigError::Invalid(_))
        );
        assert_matches!(
            WorkerConfig::default()
                .with_queue_timeout(Duration::ZERO)
                .validate(),
            Err(ConfigError::Invalid(_))
        );
        assert_matches!(
            WorkerConfig::default().with_intake_capacity(0).validate(),
            Err(ConfigError::Invalid(_))
        );
        assert_matches!(
            WorkerConfig::default()
                .with_backoff(Duration::from_secs(3), Duration::from_secs(1))
                .validate(),
            Err(ConfigError::Invalid(_))
        );
    }

    #[test]
    fn shard_keys_are_lowercase_and_indexed() {
        let key = shard_key("CmdQueue", 3);
        assert_eq!(key, "cmdqueue_3");
        assert_eq!(backup_key(&key), "_cmdqueue_3_backup_");
        assert_eq!(dead_letter_key(&key), "cmdqueue_3_dead");
    }

    #[test]
    fn addresses_split_on_commas() {
        assert_eq!(
            parse_addresses("redis-a:6379, redis-b:6379,,"),
            vec!["redis-a:6379".to_string(), "redis-b:6379".to_string()]
        );
        assert!(parse_addresses(" , ").is_empty());
    }

    #[test]
    fn labels_parse_pairs() {
        assert_eq!(
            parse_labels("env=prod, region = eu").unwrap(),
            vec![
                ("env".to_string(), "prod".to_string()),
                ("region".to_string(), "eu".to_string())
            ]
        );
        assert_eq!(parse_labels("").unwrap(), Vec::new());
        assert!(parse_labels("novalue").is_none());
        assert!(parse_labels("=x").is_none());
    }
}
