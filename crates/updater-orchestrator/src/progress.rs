use tracing::info;
use updater_common::{ImageReference, ProgressSink, PullProgress};

/// Writes every pull progress message as a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn on_progress(&self, image: &ImageReference, progress: &PullProgress) {
        info!(%image, "{progress}");
    }
}
