//! External collaborator seams
//!
//! Notebook preparation, IDE-extension resolution, and progress reporting
//! are external concerns; the compiler only knows their fallible call
//! surface. Failures are wrapped with the collaborator's identity by the
//! caller and abort the compile immediately. Retries, if any, belong to the
//! collaborator itself.

use crate::backend::{BuildBackend, Stage};
use crate::error::ForgeResult;
use crate::graph::Graph;
use async_trait::async_trait;

/// Prepares notebook support for the environment
#[async_trait]
pub trait NotebookPreparer: Send + Sync {
    async fn prepare(&self, graph: &Graph) -> ForgeResult<()>;
}

/// Preparer for environments without notebook support
pub struct NoNotebook;

#[async_trait]
impl NotebookPreparer for NoNotebook {
    async fn prepare(&self, _graph: &Graph) -> ForgeResult<()> {
        Ok(())
    }
}

/// Resolves IDE extension identifiers into an installable stage
#[async_trait]
pub trait ExtensionResolver: Send + Sync {
    /// `None` means the component contributes nothing to the merge set.
    /// This is a distinct outcome from an empty diff and must not be turned
    /// into one.
    async fn resolve(
        &self,
        backend: &dyn BuildBackend,
        extensions: &[String],
    ) -> ForgeResult<Option<Stage>>;
}

/// Resolver for environments without IDE extensions
pub struct NoExtensions;

#[async_trait]
impl ExtensionResolver for NoExtensions {
    async fn resolve(
        &self,
        _backend: &dyn BuildBackend,
        _extensions: &[String],
    ) -> ForgeResult<Option<Stage>> {
        Ok(None)
    }
}

/// One-way compile progress event; no effect on build correctness
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileEvent {
    ComponentStarted {
        component: &'static str,
    },
    ComponentFinished {
        component: &'static str,
        cache_hit: bool,
    },
    PlanMerged {
        overlays: usize,
    },
}

/// Sink for compile progress events
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: CompileEvent);
}

/// Sink that discards all events
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: CompileEvent) {}
}
