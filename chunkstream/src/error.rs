use std::sync::Arc;

use crate::layer::BuildKind;
use crate::math::ChunkPos;
use crate::task::TaskStatus;

/// mesh building failed: {message}
#[derive(Clone, Debug, Eq, PartialEq, displaydoc::Display)]
pub struct BuildError {
    message: Arc<str>,
}

impl BuildError {
    /// Constructs an error with the given explanation.
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl core::error::Error for BuildError {}

/// render backend failed: {message}
#[derive(Clone, Debug, Eq, PartialEq, displaydoc::Display)]
pub struct BackendError {
    message: Arc<str>,
}

impl BackendError {
    /// Constructs an error with the given explanation.
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl core::error::Error for BackendError {}

/// blocking wait interrupted because the pipeline is shutting down
#[derive(Clone, Copy, Debug, Eq, PartialEq, displaydoc::Display)]
#[expect(clippy::exhaustive_structs)]
pub struct Interrupted;

impl core::error::Error for Interrupted {}

/// Error from [`ChunkRenderTask::transition()`](crate::ChunkRenderTask::transition).
///
/// Neither case is fatal. [`TransitionError::AlreadyFinished`] is the expected outcome of a
/// task being cancelled while it was being worked on; [`TransitionError::Unexpected`] means
/// some other party advanced the task and is worth a warning.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum TransitionError {
    /// The task had already reached a terminal state.
    #[error("task was already {status:?}")]
    AlreadyFinished {
        /// The terminal status found.
        status: TaskStatus,
    },
    /// The task was in a different non-terminal state than the transition required.
    #[error("task was {found:?} when {expected:?} was expected")]
    Unexpected {
        /// The status the transition required.
        expected: TaskStatus,
        /// The status the task actually had.
        found: TaskStatus,
    },
}

/// An unrecoverable failure inside the pipeline; the `source` of a [`CrashReport`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum StreamError {
    /// The [`BlockMesher`](crate::BlockMesher) or the geometry it produced was unusable.
    #[error("building chunk geometry failed")]
    Build(#[from] BuildError),
    /// The [`RenderBackend`](crate::RenderBackend) refused an upload.
    #[error("uploading chunk geometry failed")]
    Backend(#[from] BackendError),
    /// A build worker thread panicked.
    #[error("build worker panicked: {0}")]
    WorkerPanicked(Arc<str>),
}

/// Why a single upload operation did not complete.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub(crate) enum UploadFailure {
    /// The task was cancelled or superseded before the upload ran. Not an error.
    #[error("upload cancelled")]
    Cancelled,
    #[error(transparent)]
    Backend(BackendError),
}

/// Structured description of an unrecoverable failure, carrying enough context to find
/// the chunk and build that caused it.
///
/// Once one of these has been produced, the [`StreamingCoordinator`](crate::StreamingCoordinator)
/// stops streaming and returns the same report from every later update.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{context} failed for chunk {chunk} ({kind:?})")]
#[non_exhaustive]
pub struct CrashReport {
    /// The chunk whose build or upload failed.
    pub chunk: ChunkPos,
    /// The kind of build that failed.
    pub kind: BuildKind,
    /// Which stage of the pipeline failed.
    pub context: &'static str,
    /// The underlying error.
    #[source]
    pub error: StreamError,
}

impl CrashReport {
    pub(crate) const BATCHING: &'static str = "Batching chunks";
    pub(crate) const REBUILD_NOW: &'static str = "Rendering chunk";
    pub(crate) const UPLOADING: &'static str = "Uploading chunk";

    pub(crate) fn new(
        chunk: ChunkPos,
        kind: BuildKind,
        context: &'static str,
        error: impl Into<StreamError>,
    ) -> Self {
        Self {
            chunk,
            kind,
            context,
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn crash_report_display_and_source() {
        let report = CrashReport::new(
            ChunkPos::new(1, 2, 3),
            BuildKind::FullRebuild,
            CrashReport::BATCHING,
            BuildError::new("bad block"),
        );
        assert_eq!(
            report.to_string(),
            "Batching chunks failed for chunk [1, 2, 3] (FullRebuild)"
        );
        let source = core::error::Error::source(&report).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("building chunk geometry failed"));
    }

    #[test]
    fn leaf_error_display() {
        assert_eq!(
            BackendError::new("out of memory").to_string(),
            "render backend failed: out of memory"
        );
        assert_eq!(
            Interrupted.to_string(),
            "blocking wait interrupted because the pipeline is shutting down"
        );
    }
}
