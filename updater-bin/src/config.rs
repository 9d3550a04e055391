use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use updater_orchestrator::common::{LabelFilter, DEFAULT_TAG, DEFAULT_UPDATE_LABEL};
use updater_orchestrator::{
    ExactId, HostnamePrefix, NeverSelf, OrchestratorConfig, SelfMatcher,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{var} must be a whole number of seconds, got {value:?}")]
    InvalidSeconds { var: &'static str, value: String },
    #[error("{var} must be true or false, got {value:?}")]
    InvalidBool { var: &'static str, value: String },
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// How the updater recognises its own container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelfIdentity {
    HostnamePrefix(String),
    ExactId(String),
    Disabled,
}

impl SelfIdentity {
    pub fn matcher(&self) -> Arc<dyn SelfMatcher> {
        match self {
            SelfIdentity::HostnamePrefix(host) => Arc::new(HostnamePrefix(host.clone())),
            SelfIdentity::ExactId(id) => Arc::new(ExactId(id.clone())),
            SelfIdentity::Disabled => Arc::new(NeverSelf),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    pub orchestrator: OrchestratorConfig,
    pub self_identity: SelfIdentity,
    /// Repeat passes on this interval; a single pass when unset.
    pub interval: Option<Duration>,
}

impl UpdaterConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = OrchestratorConfig::default();

        let label = match lookup("UPDATER_LABEL") {
            Some(key) if key.trim().is_empty() => return Err(ConfigError::Empty("UPDATER_LABEL")),
            Some(key) => key.trim().to_string(),
            None => DEFAULT_UPDATE_LABEL.to_string(),
        };
        let tag = get("UPDATER_TAG").unwrap_or_else(|| DEFAULT_TAG.to_string());
        let stop_grace = seconds("UPDATER_STOP_GRACE_SECS", get("UPDATER_STOP_GRACE_SECS"))?
            .unwrap_or(defaults.stop_grace);
        let step_timeout = seconds("UPDATER_STEP_TIMEOUT_SECS", get("UPDATER_STEP_TIMEOUT_SECS"))?
            .unwrap_or(defaults.step_timeout);
        let interval = seconds("UPDATER_INTERVAL_SECS", get("UPDATER_INTERVAL_SECS"))?;

        let guard_disabled = boolean(
            "UPDATER_DISABLE_SELF_GUARD",
            get("UPDATER_DISABLE_SELF_GUARD"),
        )?
        .unwrap_or(false);
        let self_identity = if guard_disabled {
            SelfIdentity::Disabled
        } else if let Some(id) = get("UPDATER_SELF_ID") {
            SelfIdentity::ExactId(id)
        } else {
            SelfIdentity::HostnamePrefix(get("HOSTNAME").unwrap_or_else(read_hostname))
        };

        Ok(Self {
            orchestrator: OrchestratorConfig {
                label: LabelFilter::new(label),
                tag,
                stop_grace,
                step_timeout,
            },
            self_identity,
            interval: interval.filter(|d| !d.is_zero()),
        })
    }
}

fn seconds(var: &'static str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    value
        .map(|v| {
            v.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::InvalidSeconds { var, value: v })
        })
        .transpose()
}

fn boolean(var: &'static str, value: Option<String>) -> Result<Option<bool>, ConfigError> {
    value
        .map(|v| match v.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool { var, value: v }),
        })
        .transpose()
}

fn read_hostname() -> String {
    match std::fs::read_to_string("/etc/hostname") {
        Ok(name) => name.trim().to_string(),
        Err(e) => {
            warn!(error = %e, "No HOSTNAME and /etc/hostname unreadable; self guard inactive");
            String::new()
        }
    }
}
