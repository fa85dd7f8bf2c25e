use std::sync::Arc;

pub type ProgressCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Forward a progress line to the callback, if any, and to the trace log.
pub(crate) fn log_progress(progress: &Option<ProgressCallback>, message: &str) {
    tracing::debug!(target: "presto::progress", "{}", message);
    if let Some(cb) = progress {
        cb(message);
    }
}
