use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use updater_common::RuntimeError;

/// One collaborator call in the replacement workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateStep {
    Pull,
    Inspect,
    Stop,
    Remove,
    Create,
    Start,
}

impl fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateStep::Pull => "pull",
            UpdateStep::Inspect => "inspect",
            UpdateStep::Stop => "stop",
            UpdateStep::Remove => "remove",
            UpdateStep::Create => "create",
            UpdateStep::Start => "start",
        };
        f.write_str(name)
    }
}

/// Last stage a container's workflow reached successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UpdateStage {
    Discovered,
    Pulled,
    Inspected,
    Stopped,
    Removed,
    Created,
    Started,
}

impl UpdateStage {
    /// Once the old container is removed its configuration only survives in
    /// the captured spec.
    pub const POINT_OF_NO_RETURN: UpdateStage = UpdateStage::Removed;

    pub fn after(step: UpdateStep) -> Self {
        match step {
            UpdateStep::Pull => UpdateStage::Pulled,
            UpdateStep::Inspect => UpdateStage::Inspected,
            UpdateStep::Stop => UpdateStage::Stopped,
            UpdateStep::Remove => UpdateStage::Removed,
            UpdateStep::Create => UpdateStage::Created,
            UpdateStep::Start => UpdateStage::Started,
        }
    }
}

#[derive(Error, Debug)]
pub enum StepError {
    #[error("{step} failed: {source}")]
    Runtime {
        step: UpdateStep,
        #[source]
        source: RuntimeError,
    },
    #[error("{step} timed out after {}s", .after.as_secs())]
    TimedOut { step: UpdateStep, after: Duration },
    #[error("{step} cancelled")]
    Cancelled { step: UpdateStep },
    #[error("cannot pull {0}: listed image is a content ID, not a name")]
    UnresolvableImage(String),
}

impl StepError {
    pub fn step(&self) -> UpdateStep {
        match self {
            StepError::Runtime { step, .. }
            | StepError::TimedOut { step, .. }
            | StepError::Cancelled { step } => *step,
            StepError::UnresolvableImage(_) => UpdateStep::Pull,
        }
    }
}

#[derive(Debug)]
pub struct UpdateFailure {
    pub container_id: String,
    pub reached: UpdateStage,
    pub error: StepError,
}

impl UpdateFailure {
    /// True when the old container was already removed, so the host is left
    /// without it until an operator steps in.
    pub fn past_point_of_no_return(&self) -> bool {
        self.reached >= UpdateStage::POINT_OF_NO_RETURN
    }
}

#[derive(Debug)]
pub enum UpdateOutcome {
    Replaced { old_id: String, new_id: String },
    SkippedSelf { id: String },
    Failed(UpdateFailure),
}

impl UpdateOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, UpdateOutcome::Failed(_))
    }
}

#[derive(Debug)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<UpdateOutcome>,
    /// Set when the pass stopped early on cancellation.
    pub cancelled: bool,
}

impl PassReport {
    pub fn replaced(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, UpdateOutcome::Replaced { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, UpdateOutcome::SkippedSelf { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &UpdateFailure> {
        self.outcomes.iter().filter_map(|o| match o {
            UpdateOutcome::Failed(failure) => Some(failure),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_of_no_return() {
        let failure = |reached| UpdateFailure {
            container_id: "abc".to_string(),
            reached,
            error: StepError::Cancelled {
                step: UpdateStep::Create,
            },
        };
        assert!(!failure(UpdateStage::Stopped).past_point_of_no_return());
        assert!(failure(UpdateStage::Removed).past_point_of_no_return());
        assert!(failure(UpdateStage::Created).past_point_of_no_return());
    }

    #[test]
    fn test_step_error_messages() {
        let err = StepError::TimedOut {
            step: UpdateStep::Pull,
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "pull timed out after 30s");
        assert_eq!(err.step(), UpdateStep::Pull);

        let err = StepError::Runtime {
            step: UpdateStep::Remove,
            source: RuntimeError::Conflict("in use".to_string()),
        };
        assert_eq!(err.to_string(), "remove failed: Conflict: in use");
    }

    #[test]
    fn test_report_counters() {
        let now = Utc::now();
        let report = PassReport {
            started_at: now,
            finished_at: now,
            outcomes: vec![
                UpdateOutcome::Replaced {
                    old_id: "a".to_string(),
                    new_id: "b".to_string(),
                },
                UpdateOutcome::SkippedSelf {
                    id: "c".to_string(),
                },
                UpdateOutcome::Failed(UpdateFailure {
                    container_id: "d".to_string(),
                    reached: UpdateStage::Pulled,
                    error: StepError::UnresolvableImage("sha256:00".to_string()),
                }),
            ],
            cancelled: false,
        };
        assert_eq!(report.replaced(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures().next().map(|f| f.container_id.as_str()), Some("d"));
    }
}
