//! capgrid.toml configuration parser.
//!
//! Every field is optional. Missing values fall back to the defaults
//! below; [`CapgridConfig::settings`] resolves the raw file into a
//! [`Settings`] value with parsed durations.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

/// How long the right sizer sleeps between sweeps.
pub const DEFAULT_RIGHT_SIZER_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Scheduled copies older than this are dropped by the cleanup sweep.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// How often the scheduler's cleanup sweep runs.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Delay between placement attempts for a capacity-blocked copy.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Quiet period before a requested environment scaler run starts. Each new
/// request for the same environment restarts it.
pub const DEFAULT_SCALE_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// How often every environment gets a scaler run requested.
pub const DEFAULT_ENVIRONMENT_SCALER_INTERVAL: Duration = Duration::from_secs(10 * 60);

pub const DEFAULT_WAITER_ATTEMPTS: u32 = 30;
pub const DEFAULT_WAITER_DELAY: Duration = Duration::from_secs(5);

/// Host ports held by the orchestration agent itself on every node
/// (SSH, Docker daemon, agent and agent introspection).
pub const DEFAULT_AGENT_RESERVED_PORTS: [u16; 5] = [22, 2375, 2376, 51678, 51679];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapgridConfig {
    pub right_sizer: Option<RightSizerConfig>,
    pub scheduler: Option<SchedulerConfig>,
    pub environment_scaler: Option<EnvironmentScalerConfig>,
    pub waiter: Option<WaiterConfig>,
    pub agent: Option<AgentConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RightSizerConfig {
    /// Sweep interval, e.g. "60m".
    pub interval: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub retry_interval: Option<String>,
    pub task_timeout: Option<String>,
    pub cleanup_interval: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentScalerConfig {
    pub grace_period: Option<String>,
    pub interval: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaiterConfig {
    pub attempts: Option<u32>,
    pub delay: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    pub reserved_ports: Option<Vec<u16>>,
}

/// Resolved settings with every default applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub right_sizer_interval: Duration,
    pub retry_interval: Duration,
    pub task_timeout: Duration,
    pub cleanup_interval: Duration,
    pub scale_grace_period: Duration,
    pub environment_scaler_interval: Duration,
    pub waiter_attempts: u32,
    pub waiter_delay: Duration,
    pub agent_reserved_ports: Vec<u16>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            right_sizer_interval: DEFAULT_RIGHT_SIZER_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            scale_grace_period: DEFAULT_SCALE_GRACE_PERIOD,
            environment_scaler_interval: DEFAULT_ENVIRONMENT_SCALER_INTERVAL,
            waiter_attempts: DEFAULT_WAITER_ATTEMPTS,
            waiter_delay: DEFAULT_WAITER_DELAY,
            agent_reserved_ports: DEFAULT_AGENT_RESERVED_PORTS.to_vec(),
        }
    }
}

impl CapgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: CapgridConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Resolve the raw file into [`Settings`], applying defaults.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let defaults = Settings::default();

        let right_sizer = self.right_sizer.clone().unwrap_or_default();
        let scheduler = self.scheduler.clone().unwrap_or_default();
        let environment_scaler = self.environment_scaler.clone().unwrap_or_default();
        let waiter = self.waiter.clone().unwrap_or_default();
        let agent = self.agent.clone().unwrap_or_default();

        let settings = Settings {
            right_sizer_interval: duration_or(
                right_sizer.interval.as_deref(),
                defaults.right_sizer_interval,
            )?,
            retry_interval: duration_or(scheduler.retry_interval.as_deref(), defaults.retry_interval)?,
            task_timeout: duration_or(scheduler.task_timeout.as_deref(), defaults.task_timeout)?,
            cleanup_interval: duration_or(
                scheduler.cleanup_interval.as_deref(),
                defaults.cleanup_interval,
            )?,
            scale_grace_period: duration_or(
                environment_scaler.grace_period.as_deref(),
                defaults.scale_grace_period,
            )?,
            environment_scaler_interval: duration_or(
                environment_scaler.interval.as_deref(),
                defaults.environment_scaler_interval,
            )?,
            waiter_attempts: waiter.attempts.unwrap_or(defaults.waiter_attempts),
            waiter_delay: duration_or(waiter.delay.as_deref(), defaults.waiter_delay)?,
            agent_reserved_ports: agent
                .reserved_ports
                .unwrap_or(defaults.agent_reserved_ports),
        };

        if settings.right_sizer_interval.is_zero() {
            bail!("right_sizer.interval must be greater than zero");
        }
        if settings.environment_scaler_interval.is_zero() {
            bail!("environment_scaler.interval must be greater than zero");
        }
        if settings.waiter_attempts == 0 {
            bail!("waiter.attempts must be at least 1");
        }

        Ok(settings)
    }
}

fn duration_or(value: Option<&str>, default: Duration) -> anyhow::Result<Duration> {
    match value {
        Some(s) => parse_duration(s),
        None => Ok(default),
    }
}

/// Parse a duration string like "500ms", "30s", "5m" or "1h".
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    // Unit multiplier in milliseconds.
    let (digits, millis) = if let Some(v) = s.strip_suffix("ms") {
        (v, 1)
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1_000)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, 60_000)
    } else if let Some(v) = s.strip_suffix('h') {
        (v, 3_600_000)
    } else {
        bail!("duration {s:?} is missing a unit (ms, s, m, h)");
    };

    let n: u64 = digits
        .trim()
        .parse()
        .with_context(|| format!("invalid duration {s:?}"))?;
    Ok(Duration::from_millis(n.saturating_mul(millis)))
}
