//! Replaces labeled containers with freshly pulled versions of themselves.
//!
//! Each container goes through pull → inspect → stop → remove → create →
//! start. The workflow is not transactional: once the old container is removed
//! (see [`UpdateStage::POINT_OF_NO_RETURN`]) a failure leaves the host without
//! it and is reported for manual intervention.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use updater_common::{
    ContainerRuntime, ImageReference, LabelFilter, ManagedContainer, ProgressSink, RuntimeError,
    DEFAULT_TAG,
};

pub use updater_common as common;

pub mod identity;
pub mod outcome;
pub mod progress;

pub use identity::{ExactId, HostnamePrefix, NeverSelf, SelfMatcher};
pub use outcome::{PassReport, StepError, UpdateFailure, UpdateOutcome, UpdateStage, UpdateStep};
pub use progress::TracingProgress;

// --- Custom Error Type ---
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Discovery failed: {0}")]
    Discovery(#[source] RuntimeError),
    #[error("Discovery timed out after {}s", .0.as_secs())]
    DiscoveryTimedOut(Duration),
}
pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub label: LabelFilter,
    /// Tag pulled and recreated with.
    pub tag: String,
    pub stop_grace: Duration,
    /// Deadline for each collaborator call. Stop gets `stop_grace` on top.
    pub step_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            label: LabelFilter::default(),
            tag: DEFAULT_TAG.to_string(),
            stop_grace: Duration::from_secs(10),
            step_timeout: Duration::from_secs(300),
        }
    }
}

// --- Orchestrator Implementation ---
#[derive(Clone)]
pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    self_matcher: Arc<dyn SelfMatcher>,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        self_matcher: Arc<dyn SelfMatcher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            runtime,
            self_matcher,
            progress: Arc::new(TracingProgress),
            cancel: CancellationToken::new(),
            config,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Cancelling `cancel` stops the pass before the next container and
    /// interrupts pulls and inspects in flight. Stop, remove, create and start
    /// always run to completion once begun.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Lists managed containers, stopped ones included, sorted by name then ID.
    #[instrument(skip(self), fields(label = %self.config.label.key))]
    pub async fn discover(&self) -> Result<Vec<ManagedContainer>> {
        let listed = timeout(
            self.config.step_timeout,
            self.runtime.list_containers(&self.config.label, true),
        )
        .await
        .map_err(|_| OrchestratorError::DiscoveryTimedOut(self.config.step_timeout))?
        .map_err(OrchestratorError::Discovery)?;

        let mut managed: Vec<ManagedContainer> = listed
            .into_iter()
            .filter(|c| {
                let eligible = self.config.label.matches(&c.labels);
                if !eligible {
                    debug!(id = %c.short_id(), "Label value is not truthy, skipping");
                }
                eligible
            })
            .map(|c| ManagedContainer { managed: true, ..c })
            .collect();
        managed.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(managed)
    }

    /// Runs the replacement workflow for one container. Never fails: errors
    /// are folded into the outcome.
    pub async fn update_one(&self, container: &ManagedContainer) -> UpdateOutcome {
        info!("Updating {}", container.id);
        let mut reached = UpdateStage::Discovered;

        match self.replace(container, &mut reached).await {
            Ok(Some(new_id)) => {
                info!("Replaced {} → {}", container.id, new_id);
                UpdateOutcome::Replaced {
                    old_id: container.id.clone(),
                    new_id,
                }
            }
            Ok(None) => {
                info!("Skipping {}: it runs this updater", container.id);
                UpdateOutcome::SkippedSelf {
                    id: container.id.clone(),
                }
            }
            Err(error) => {
                error!("Error updating {}: {}", container.id, error);
                let failure = UpdateFailure {
                    container_id: container.id.clone(),
                    reached,
                    error,
                };
                if failure.past_point_of_no_return() {
                    warn!(
                        container_id = %container.id,
                        name = ?container.name,
                        step = %failure.error.step(),
                        "Old container was already removed and its replacement is not running; manual intervention required"
                    );
                }
                UpdateOutcome::Failed(failure)
            }
        }
    }

    /// Discovers and updates every managed container, one at a time.
    pub async fn run_pass(&self) -> Result<PassReport> {
        let started_at = Utc::now();
        let mut outcomes = Vec::new();

        if self.cancel.is_cancelled() {
            return Ok(PassReport {
                started_at,
                finished_at: Utc::now(),
                outcomes,
                cancelled: true,
            });
        }

        let containers = self.discover().await?;
        info!(count = containers.len(), "Discovered managed containers");

        let mut cancelled = false;
        for container in &containers {
            if self.cancel.is_cancelled() {
                warn!(
                    remaining = containers.len() - outcomes.len(),
                    "Pass cancelled, leaving remaining containers untouched"
                );
                cancelled = true;
                break;
            }
            outcomes.push(self.update_one(container).await);
        }
        // A cancel during the last container's pull ends the loop normally
        cancelled |= self.cancel.is_cancelled();

        let report = PassReport {
            started_at,
            finished_at: Utc::now(),
            outcomes,
            cancelled,
        };
        info!(
            replaced = report.replaced(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Pass finished"
        );
        Ok(report)
    }

    // Returns the new container ID, or None for the self container.
    async fn replace(
        &self,
        container: &ManagedContainer,
        reached: &mut UpdateStage,
    ) -> std::result::Result<Option<String>, StepError> {
        let tag = self.config.tag.as_str();
        let deadline = self.config.step_timeout;
        let grace = self.config.stop_grace;
        let id = container.id.as_str();

        // The engine lists a bare image ID once the container's tag has moved
        // to a newer image; the configured name is still in the container.
        let (image, captured) = match container.image_reference() {
            listed if listed.is_image_id() => {
                let inspected = guarded(
                    UpdateStep::Inspect,
                    deadline,
                    Some(&self.cancel),
                    self.runtime.inspect_container(id),
                )
                .await;
                match inspected {
                    Ok(spec) if !ImageReference::parse(&spec.image).is_image_id() => {
                        debug!(
                            %id,
                            listed = %container.image,
                            image = %spec.image,
                            "Resolved image name from container config"
                        );
                        (ImageReference::parse(&spec.image), Some(spec))
                    }
                    _ if self.self_matcher.is_self(container) => return Ok(None),
                    Ok(spec) => return Err(StepError::UnresolvableImage(spec.image)),
                    Err(e) => return Err(e),
                }
            }
            listed => (listed, None),
        };

        guarded(
            UpdateStep::Pull,
            deadline,
            Some(&self.cancel),
            self.runtime.pull_image(&image, tag, self.progress.as_ref()),
        )
        .await?;
        *reached = UpdateStage::after(UpdateStep::Pull);

        if self.self_matcher.is_self(container) {
            return Ok(None);
        }

        let spec = match captured {
            Some(spec) => spec,
            None => {
                guarded(
                    UpdateStep::Inspect,
                    deadline,
                    Some(&self.cancel),
                    self.runtime.inspect_container(id),
                )
                .await?
            }
        };
        *reached = UpdateStage::after(UpdateStep::Inspect);

        guarded(
            UpdateStep::Stop,
            deadline.saturating_add(grace),
            None,
            self.runtime.stop_container(id, grace),
        )
        .await?;
        *reached = UpdateStage::after(UpdateStep::Stop);

        guarded(
            UpdateStep::Remove,
            deadline,
            None,
            self.runtime.remove_container(id, true, true),
        )
        .await?;
        *reached = UpdateStage::after(UpdateStep::Remove);

        let replacement = spec.with_image(&image.with_tag(tag));
        let new_id = guarded(
            UpdateStep::Create,
            deadline,
            None,
            self.runtime.create_container(&replacement),
        )
        .await?;
        *reached = UpdateStage::after(UpdateStep::Create);

        guarded(
            UpdateStep::Start,
            deadline,
            None,
            self.runtime.start_container(&new_id),
        )
        .await?;
        *reached = UpdateStage::after(UpdateStep::Start);

        Ok(Some(new_id))
    }
}

// Applies the step deadline and, when given, the cancellation token.
async fn guarded<T, F>(
    step: UpdateStep,
    deadline: Duration,
    cancel: Option<&CancellationToken>,
    call: F,
) -> std::result::Result<T, StepError>
where
    F: Future<Output = updater_common::Result<T>>,
{
    let bounded = async {
        match timeout(deadline, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(StepError::Runtime { step, source }),
            Err(_) => Err(StepError::TimedOut {
                step,
                after: deadline,
            }),
        }
    };

    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(StepError::Cancelled { step }),
                result = bounded => result,
            }
        }
        None => bounded.await,
    }
}
