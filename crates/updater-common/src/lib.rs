// Re-export dependencies used in public interfaces of common types

use std::time::Duration;

use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
use thiserror::Error;

pub mod image;
pub mod model;

pub use image::{ImageReference, DEFAULT_TAG};
pub use model::{
    is_truthy, short_id, ContainerSpec, HealthCheck, LabelFilter, ManagedContainer, PullProgress,
    DEFAULT_UPDATE_LABEL,
};

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Cannot reach container engine: {0}")]
    Connection(String),

    #[error("No such object: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Engine API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Progress stream error: {0}")]
    Stream(String),

    #[error("Unexpected engine payload: {0}")]
    Payload(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal Error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Receives image pull progress as it streams in.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, image: &ImageReference, progress: &PullProgress);
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _image: &ImageReference, _progress: &PullProgress) {}
}

/// Container engine primitives the updater is built on.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Lists containers carrying the filter's label key.
    async fn list_containers(
        &self,
        filter: &LabelFilter,
        include_stopped: bool,
    ) -> Result<Vec<ManagedContainer>>;

    /// Pulls `image.repository` at `tag`, forwarding progress to `progress`.
    async fn pull_image(
        &self,
        image: &ImageReference,
        tag: &str,
        progress: &dyn ProgressSink,
    ) -> Result<()>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerSpec>;

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()>;

    async fn remove_container(&self, id: &str, force: bool, remove_volumes: bool) -> Result<()>;

    /// Creates a container from `spec` and returns its runtime ID.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RuntimeError::Api {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Engine API error (500): boom");
        assert_eq!(
            RuntimeError::NotFound("abc".to_string()).to_string(),
            "No such object: abc"
        );
    }

    #[test]
    fn test_spec_serialization() {
        let spec = ContainerSpec {
            name: "web".to_string(),
            image: "nginx:latest".to_string(),
            env: vec!["A=1".to_string()],
            exposed_ports: ["80/tcp".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("80/tcp"));
        let back: ContainerSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
