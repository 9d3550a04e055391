use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::image::ImageReference;

/// Label key that opts a container into automatic updates.
pub const DEFAULT_UPDATE_LABEL: &str = "classinsights.update";

/// Label predicate used to select managed containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelFilter {
    pub key: String,
}

impl LabelFilter {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// True when `labels` carries the key with a truthy value.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        labels.get(&self.key).is_some_and(|value| is_truthy(value))
    }
}

impl Default for LabelFilter {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_LABEL)
    }
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// A container eligible for update, as returned by the runtime's list query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedContainer {
    pub id: String,
    /// Primary name without the engine's leading `/`.
    pub name: Option<String>,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    pub managed: bool,
}

impl ManagedContainer {
    pub fn image_reference(&self) -> ImageReference {
        ImageReference::parse(&self.image)
    }

    /// Short form of the runtime ID for log lines.
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HealthCheck {
    pub test: Option<Vec<String>>,
    /// Nanoseconds, as the engine reports them.
    pub interval: Option<i64>,
    pub timeout: Option<i64>,
    pub retries: Option<i64>,
    pub start_period: Option<i64>,
    pub start_interval: Option<i64>,
}

/// Configuration snapshot of a container, captured before it is removed.
///
/// `host_config` and `networks` are kept as the engine's own payloads so they
/// can be handed back on create without loss.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub exposed_ports: BTreeSet<String>,
    pub volumes: BTreeSet<String>,
    pub host_config: Option<serde_json::Value>,
    pub networks: BTreeMap<String, serde_json::Value>,
    pub cmd: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub shell: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub hostname: Option<String>,
    pub domainname: Option<String>,
    pub user: Option<String>,
    pub attach_stdin: Option<bool>,
    pub attach_stdout: Option<bool>,
    pub attach_stderr: Option<bool>,
    pub tty: Option<bool>,
    pub open_stdin: Option<bool>,
    pub stdin_once: Option<bool>,
    pub args_escaped: Option<bool>,
    pub network_disabled: Option<bool>,
    pub mac_address: Option<String>,
    pub on_build: Option<Vec<String>>,
    pub labels: BTreeMap<String, String>,
    pub healthcheck: Option<HealthCheck>,
    pub stop_signal: Option<String>,
    pub stop_timeout: Option<i64>,
    pub platform: Option<String>,
}

impl ContainerSpec {
    /// Copy of this spec pointing at `image`.
    pub fn with_image(&self, image: &ImageReference) -> Self {
        Self {
            image: image.to_string(),
            ..self.clone()
        }
    }
}

/// One progress message streamed while an image is pulled.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PullProgress {
    pub layer: Option<String>,
    pub status: Option<String>,
    pub progress: Option<String>,
}

impl std::fmt::Display for PullProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.layer, &self.status) {
            (Some(layer), Some(status)) => write!(f, "{layer}: {status}")?,
            (None, Some(status)) => write!(f, "{status}")?,
            (Some(layer), None) => write!(f, "{layer}")?,
            (None, None) => {}
        }
        if let Some(progress) = &self.progress {
            write!(f, " {progress}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_filter_truthiness() {
        let filter = LabelFilter::default();
        let mut labels = BTreeMap::new();
        assert!(!filter.matches(&labels));

        for value in ["true", "TRUE", "1", "yes", " on "] {
            labels.insert(DEFAULT_UPDATE_LABEL.to_string(), value.to_string());
            assert!(filter.matches(&labels), "{value} should be truthy");
        }
        for value in ["false", "0", "", "maybe"] {
            labels.insert(DEFAULT_UPDATE_LABEL.to_string(), value.to_string());
            assert!(!filter.matches(&labels), "{value} should not be truthy");
        }
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_spec_with_image_keeps_configuration() {
        let spec = ContainerSpec {
            name: "web".to_string(),
            image: "nginx".to_string(),
            env: vec!["A=1".to_string()],
            ..Default::default()
        };
        let updated = spec.with_image(&ImageReference::parse("nginx:latest"));
        assert_eq!(updated.image, "nginx:latest");
        assert_eq!(updated.name, "web");
        assert_eq!(updated.env, spec.env);
    }

    #[test]
    fn test_pull_progress_display() {
        let progress = PullProgress {
            layer: Some("a1b2".to_string()),
            status: Some("Downloading".to_string()),
            progress: Some("[==>   ]".to_string()),
        };
        assert_eq!(progress.to_string(), "a1b2: Downloading [==>   ]");
        let json = serde_json::to_string(&progress).unwrap();
        assert!(json.contains("Downloading"));
    }
}
