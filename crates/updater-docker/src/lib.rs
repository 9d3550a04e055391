use async_trait::async_trait;
use bollard::container::{
    CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError; // Alias bollard error
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use updater_common::{
    ContainerRuntime, ContainerSpec, ImageReference, LabelFilter, ManagedContainer,
    ProgressSink, PullProgress, Result as CommonResult, RuntimeError,
};

// Re-export dependencies potentially needed by consumers (like the binary)
pub use bollard;
pub use updater_common as common;

pub mod spec;
pub mod test_utils;

// --- Custom Error Type ---
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Docker API error: {0}")]
    DockerApi(#[from] BollardError),
    #[error("Image pull failed: {0}")]
    PullFailed(String),
    #[error("Unexpected engine payload: {0}")]
    Payload(String),
}

// Map engine errors onto the runtime-neutral error kinds
impl From<EngineError> for RuntimeError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::DockerApi(e) => match e {
                BollardError::DockerResponseServerError {
                    status_code,
                    message,
                } => match status_code {
                    404 => RuntimeError::NotFound(message),
                    409 => RuntimeError::Conflict(message),
                    _ => RuntimeError::Api {
                        status: status_code,
                        message,
                    },
                },
                BollardError::DockerStreamError { error } => RuntimeError::Stream(error),
                BollardError::IOError { err } => RuntimeError::Io(err),
                BollardError::SocketNotFoundError(path) => {
                    RuntimeError::Connection(format!("socket not found: {path}"))
                }
                BollardError::RequestTimeoutError => {
                    RuntimeError::Connection("request timed out".to_string())
                }
                other => RuntimeError::Internal(other.to_string()),
            },
            EngineError::PullFailed(msg) => RuntimeError::Stream(msg),
            EngineError::Payload(msg) => RuntimeError::Payload(msg),
        }
    }
}

// Define local Result using the crate's Error type
pub type Result<T> = std::result::Result<T, EngineError>;

// --- DockerRuntime Implementation ---

#[derive(Clone)]
pub struct DockerRuntime {
    docker_client: Arc<Docker>,
}

impl DockerRuntime {
    pub fn new(docker_client: Arc<Docker>) -> Self {
        Self { docker_client }
    }

    /// Connects using `DOCKER_HOST` or the platform's default socket.
    pub fn connect_with_defaults() -> CommonResult<Self> {
        let docker = Docker::connect_with_defaults()
            .map_err(|e| RuntimeError::Connection(e.to_string()))?;
        Ok(Self::new(Arc::new(docker)))
    }

    pub fn client(&self) -> Arc<Docker> {
        self.docker_client.clone()
    }

    /// Verifies that the engine is reachable.
    pub async fn ping(&self) -> CommonResult<()> {
        self.docker_client
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Connection(e.to_string()))
    }
}

fn managed_from_summary(
    summary: bollard::models::ContainerSummary,
    filter: &LabelFilter,
) -> Option<ManagedContainer> {
    let id = summary.id?;
    let labels: BTreeMap<String, String> = summary
        .labels
        .unwrap_or_default()
        .into_iter()
        .collect();
    let name = summary
        .names
        .and_then(|names| names.into_iter().next())
        .map(|n| n.trim_start_matches('/').to_string());
    Some(ManagedContainer {
        managed: filter.matches(&labels),
        id,
        name,
        image: summary.image.unwrap_or_default(),
        labels,
    })
}

// Negative values mean "wait forever" to the engine
fn stop_timeout_secs(grace: Duration) -> i64 {
    i64::try_from(grace.as_secs()).unwrap_or(i64::MAX)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    #[instrument(skip(self, filter), fields(label = %filter.key))]
    async fn list_containers(
        &self,
        filter: &LabelFilter,
        include_stopped: bool,
    ) -> CommonResult<Vec<ManagedContainer>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![filter.key.clone()]);
        let options = ListContainersOptions::<String> {
            all: include_stopped,
            filters,
            ..Default::default()
        };
        let summaries = self
            .docker_client
            .list_containers(Some(options))
            .await
            .map_err(EngineError::from)?;

        let containers: Vec<ManagedContainer> = summaries
            .into_iter()
            .filter_map(|s| managed_from_summary(s, filter))
            .collect();
        debug!(count = containers.len(), "Listed labeled containers");
        Ok(containers)
    }

    #[instrument(skip(self, image, progress), fields(repository = %image.repository))]
    async fn pull_image(
        &self,
        image: &ImageReference,
        tag: &str,
        progress: &dyn ProgressSink,
    ) -> CommonResult<()> {
        let options = CreateImageOptions {
            from_image: image.repository.clone(),
            tag: tag.to_string(),
            ..Default::default()
        };
        let target = image.with_tag(tag);
        let mut stream = Box::pin(self.docker_client.create_image(Some(options), None, None));

        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| match e {
                BollardError::DockerStreamError { error } => EngineError::PullFailed(error),
                other => EngineError::DockerApi(other),
            })?;
            progress.on_progress(
                &target,
                &PullProgress {
                    layer: info.id,
                    status: info.status,
                    progress: info.progress,
                },
            );
        }

        info!(image = %target, "Image pulled");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn inspect_container(&self, id: &str) -> CommonResult<ContainerSpec> {
        let inspect = self
            .docker_client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(EngineError::from)?;
        Ok(spec::spec_from_inspect(inspect)?)
    }

    #[instrument(skip(self))]
    async fn stop_container(&self, id: &str, grace: Duration) -> CommonResult<()> {
        let options = StopContainerOptions {
            t: stop_timeout_secs(grace),
        };
        match self.docker_client.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: container was not running
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!(%id, "Container already stopped");
                Ok(())
            }
            Err(e) => Err(EngineError::from(e).into()),
        }
    }

    #[instrument(skip(self))]
    async fn remove_container(&self, id: &str, force: bool, remove_volumes: bool) -> CommonResult<()> {
        let options = RemoveContainerOptions {
            force,
            v: remove_volumes,
            ..Default::default()
        };
        self.docker_client
            .remove_container(id, Some(options))
            .await
            .map_err(|e| RuntimeError::from(EngineError::from(e)))
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, image = %spec.image))]
    async fn create_container(&self, spec: &ContainerSpec) -> CommonResult<String> {
        let config = spec::config_from_spec(spec)?;
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: spec.platform.clone(),
        };
        let created = self
            .docker_client
            .create_container(Some(options), config)
            .await
            .map_err(EngineError::from)?;
        for warning in &created.warnings {
            warn!(name = %spec.name, %warning, "Engine warning on create");
        }
        Ok(created.id)
    }

    #[instrument(skip(self))]
    async fn start_container(&self, id: &str) -> CommonResult<()> {
        self.docker_client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| RuntimeError::from(EngineError::from(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::ContainerSummary;

    #[test]
    fn test_server_errors_map_to_runtime_kinds() {
        let not_found: RuntimeError = EngineError::DockerApi(BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container: abc".to_string(),
        })
        .into();
        assert!(matches!(not_found, RuntimeError::NotFound(ref m) if m.contains("abc")));

        let conflict: RuntimeError = EngineError::DockerApi(BollardError::DockerResponseServerError {
            status_code: 409,
            message: "name in use".to_string(),
        })
        .into();
        assert!(matches!(conflict, RuntimeError::Conflict(_)));

        let api: RuntimeError = EngineError::DockerApi(BollardError::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        })
        .into();
        assert!(matches!(api, RuntimeError::Api { status: 500, .. }));

        let pull: RuntimeError = EngineError::PullFailed("manifest unknown".to_string()).into();
        assert!(matches!(pull, RuntimeError::Stream(_)));
    }

    #[test]
    fn test_stop_grace_never_goes_negative() {
        assert_eq!(stop_timeout_secs(Duration::from_secs(10)), 10);
        assert_eq!(stop_timeout_secs(Duration::from_secs(u64::MAX)), i64::MAX);
        assert_eq!(stop_timeout_secs(Duration::from_secs(i64::MAX as u64 + 1)), i64::MAX);
    }

    #[test]
    fn test_summary_conversion_strips_name_and_marks_managed() {
        let filter = LabelFilter::default();
        let summary = ContainerSummary {
            id: Some("abc123".to_string()),
            names: Some(vec!["/web".to_string()]),
            image: Some("nginx:latest".to_string()),
            labels: Some(HashMap::from([(
                "classinsights.update".to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        };
        let container = managed_from_summary(summary, &filter).unwrap();
        assert_eq!(container.name.as_deref(), Some("web"));
        assert!(container.managed);

        let unlabeled = ContainerSummary {
            id: Some("def456".to_string()),
            ..Default::default()
        };
        assert!(!managed_from_summary(unlabeled, &filter).unwrap().managed);
        assert!(managed_from_summary(ContainerSummary::default(), &filter).is_none());
    }
}
