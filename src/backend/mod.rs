//! Execution backend abstraction
//!
//! Provides a trait for stage-building operations that can be implemented by
//! different execution backends. The compiler only assembles the stage DAG;
//! all real filesystem work (directory creation, file writes, command
//! execution, diffing, merging) happens in the backend, driven by the DAG's
//! data dependencies rather than by the order the compiler issued calls.

pub mod plan;

use crate::cache::CacheMount;
use crate::error::ForgeResult;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

pub use plan::{PlanBackend, PlanNode, StageOp};

/// Identifier of a stage within one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StageId(pub(crate) u64);

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Opaque, immutable handle to a filesystem state in the build DAG.
///
/// Every stage is produced by applying one operation to one or more parent
/// stages; the DAG is acyclic with explicit, known parents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Stage {
    id: StageId,
}

impl Stage {
    pub(crate) fn new(id: StageId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> StageId {
        self.id
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}

/// uid/gid pair applied to created filesystem entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileOwner {
    pub uid: u32,
    pub gid: u32,
}

impl FileOwner {
    pub fn root() -> Self {
        Self { uid: 0, gid: 0 }
    }
}

/// create-directory operation
#[derive(Debug, Clone, Serialize)]
pub struct DirSpec {
    pub path: String,
    pub mode: u32,
    pub owner: Option<FileOwner>,
    pub create_parents: bool,
    pub display: String,
}

/// write-file operation
#[derive(Debug, Clone, Serialize)]
pub struct FileSpec {
    pub path: String,
    pub mode: u32,
    pub owner: Option<FileOwner>,
    pub content: String,
    pub display: String,
}

/// run-command operation
///
/// Cache mounts are attached for the duration of the command only; their
/// seed stages become parents of the run stage.
#[derive(Debug, Clone, Serialize)]
pub struct RunSpec {
    pub argv: Vec<String>,
    pub display: String,
    /// Run as this in-image user instead of root
    pub user: Option<String>,
    pub mounts: Vec<CacheMount>,
}

impl RunSpec {
    pub fn new(argv: Vec<String>, display: impl Into<String>) -> Self {
        Self {
            argv,
            display: display.into(),
            user: None,
            mounts: Vec::new(),
        }
    }

    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_mount(mut self, mount: CacheMount) -> Self {
        self.mounts.push(mount);
        self
    }
}

/// copy-from-local-cache operation
#[derive(Debug, Clone, Serialize)]
pub struct CopySpec {
    /// Name of the payload in the backend-local cache
    pub cache_name: String,
    /// Path relative to the cached payload
    pub src: String,
    /// Destination inside the target filesystem
    pub dest: String,
    pub owner: Option<FileOwner>,
    pub create_dest_path: bool,
    pub display: String,
}

/// Abstract stage-building interface
///
/// Implementations must keep stages immutable: an operation never mutates a
/// parent, it derives a new stage from it. This is what makes concurrent
/// compile invocations safe without locks at this layer.
#[async_trait]
pub trait BuildBackend: Send + Sync {
    /// Mint a root stage (pre-provisioned base image, scratch, ...)
    async fn source(&self, name: &str) -> ForgeResult<Stage>;

    /// Create a directory on top of `parent`
    async fn mkdir(&self, parent: &Stage, spec: DirSpec) -> ForgeResult<Stage>;

    /// Write a file on top of `parent`
    async fn mkfile(&self, parent: &Stage, spec: FileSpec) -> ForgeResult<Stage>;

    /// Execute a command on top of `parent`
    async fn run(&self, parent: &Stage, spec: RunSpec) -> ForgeResult<Stage>;

    /// Declare environment variables on the stage
    async fn env(&self, parent: &Stage, vars: &[(String, String)], display: &str)
        -> ForgeResult<Stage>;

    /// Copy a payload from the backend-local cache into the filesystem
    async fn copy_from_cache(&self, parent: &Stage, spec: CopySpec) -> ForgeResult<Stage>;

    /// Filesystem delta between `ancestor` and a `descendant` derived from
    /// it. Fails unless `ancestor` dominates `descendant` in the DAG.
    async fn diff(&self, ancestor: &Stage, descendant: &Stage, display: &str)
        -> ForgeResult<Stage>;

    /// Atomically overlay independently-computed diffs onto `base`.
    ///
    /// Overlays are expected to touch disjoint paths; a collision between
    /// overlays is an error, not silently resolved.
    async fn merge(&self, base: &Stage, overlays: &[Stage], display: &str) -> ForgeResult<Stage>;
}
