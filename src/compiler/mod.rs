//! Stage composition
//!
//! Turns a `Graph` into a build plan with a three-phase shape: a sequential
//! shell/conda chain (conda activation rewrites shell startup files and
//! provides the interpreter the pip install is wrapped through), a fan-out
//! of independent per-component diffs against a shared ancestor, and one
//! final merge. The composer never parallelizes the chain with the fan-out,
//! and never introduces a false dependency the other way: the expensive work
//! happens later, in the backend, driven by the DAG alone.

mod python;
mod shell;

pub use python::DEFAULT_CONDA_ENV;

use crate::backend::{BuildBackend, DirSpec, FileSpec, RunSpec, Stage};
use crate::cache::{self, Ecosystem};
use crate::collab::{
    CompileEvent, ExtensionResolver, NoExtensions, NoNotebook, NotebookPreparer, NullSink,
    ProgressSink,
};
use crate::error::{ForgeError, ForgeResult};
use crate::graph::Graph;
use crate::shell::{FrameworkSource, OhMyZshSource};
use std::sync::Arc;
use tracing::debug;

/// Unprivileged in-image user owning installed content
pub(crate) const BUILD_USER: &str = "envd";
pub(crate) const HOME: &str = "/home/envd";

const SSH_DIR: &str = "/home/envd/.ssh";
const AUTHORIZED_KEYS_PATH: &str = "/home/envd/.ssh/authorized_keys";

/// Compiles environment definitions into build plans
pub struct Compiler {
    pub(crate) backend: Arc<dyn BuildBackend>,
    pub(crate) framework: Arc<dyn FrameworkSource>,
    pub(crate) progress: Arc<dyn ProgressSink>,
    notebook: Arc<dyn NotebookPreparer>,
    extensions: Arc<dyn ExtensionResolver>,
}

impl Compiler {
    pub fn new(backend: Arc<dyn BuildBackend>) -> Self {
        Self {
            backend,
            framework: Arc::new(OhMyZshSource::new()),
            progress: Arc::new(NullSink),
            notebook: Arc::new(NoNotebook),
            extensions: Arc::new(NoExtensions),
        }
    }

    pub fn with_framework(mut self, framework: Arc<dyn FrameworkSource>) -> Self {
        self.framework = framework;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_notebook(mut self, notebook: Arc<dyn NotebookPreparer>) -> Self {
        self.notebook = notebook;
        self
    }

    pub fn with_extensions(mut self, extensions: Arc<dyn ExtensionResolver>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Compile the definition into a single merged stage on top of `base`.
    ///
    /// Any stage-construction or collaborator error aborts the whole call
    /// before the merge is attempted; no partial merge is ever produced.
    pub async fn compile(&self, graph: &Graph, base: &Stage) -> ForgeResult<Stage> {
        debug!(components = ?graph.enabled_components().iter().map(|c| c.name()).collect::<Vec<_>>(),
               "compiling environment");

        let channel_stage = python::conda_channel(self.backend.as_ref(), graph, base).await?;
        // Shared ancestor for all independent work below.
        let index_stage = python::pypi_index(self.backend.as_ref(), graph, &channel_stage).await?;

        if graph.wants_notebook() {
            self.notebook
                .prepare(graph)
                .await
                .map_err(|e| ForgeError::collaborator("notebook preparer", e))?;
        }

        let ssh_stage = self.copy_ssh_key(graph, &index_stage).await?;
        let diff_ssh = self
            .backend
            .diff(&index_stage, &ssh_stage, "install ssh keys")
            .await?;

        // Conda affects shell and python, thus we cannot do it in parallel.
        let shell_stage = shell::compile_shell(self, graph, &index_stage).await?;
        let conda_env_stage = python::conda_env(self.backend.as_ref(), graph, &shell_stage).await?;

        // The conda delta is taken against the pre-shell ancestor, not
        // against the conda env stage it installs into.
        let conda_stage = self
            .backend
            .diff(
                &index_stage,
                &python::install_conda_packages(self.backend.as_ref(), graph, &conda_env_stage)
                    .await?,
                "install conda packages",
            )
            .await?;
        let pypi_stage = self
            .backend
            .diff(
                &conda_env_stage,
                &python::install_pypi_packages(self.backend.as_ref(), graph, &conda_env_stage)
                    .await?,
                "install PyPI packages",
            )
            .await?;
        let system_stage = self
            .backend
            .diff(
                &index_stage,
                &self.install_system_packages(graph, &index_stage).await?,
                "install system packages",
            )
            .await?;

        let vscode_stage = if graph.wants_vscode() {
            self.extensions
                .resolve(self.backend.as_ref(), &graph.vscode_extensions)
                .await
                .map_err(|e| ForgeError::collaborator("extension resolver", e))?
        } else {
            None
        };

        let mut merge_set = MergeSet::default();
        merge_set.push(system_stage);
        merge_set.push(conda_stage);
        merge_set.push(diff_ssh);
        merge_set.push(pypi_stage);
        merge_set.push_opt(vscode_stage);

        let overlays = merge_set.into_vec();
        self.progress.emit(CompileEvent::PlanMerged {
            overlays: overlays.len(),
        });
        self.backend
            .merge(&index_stage, &overlays, "merging all components into one")
            .await
    }

    /// Copy SSH key material into the target filesystem; pass-through when
    /// no key is configured.
    async fn copy_ssh_key(&self, graph: &Graph, root: &Stage) -> ForgeResult<Stage> {
        let Some(key) = &graph.ssh_key else {
            return Ok(root.clone());
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(ForgeError::SshKeyInvalid("empty key material".to_string()));
        }
        let owner = graph.owner();
        let ssh_dir = self
            .backend
            .mkdir(
                root,
                DirSpec {
                    path: SSH_DIR.to_string(),
                    mode: 0o700,
                    owner: Some(owner),
                    create_parents: true,
                    display: "[internal] creating .ssh".to_string(),
                },
            )
            .await?;
        self.backend
            .mkfile(
                &ssh_dir,
                FileSpec {
                    path: AUTHORIZED_KEYS_PATH.to_string(),
                    mode: 0o600,
                    owner: Some(owner),
                    content: format!("{key}\n"),
                    display: "install ssh keys".to_string(),
                },
            )
            .await
    }

    /// Install system packages. Independent of the conda/shell/python chain
    /// and diffed against the shared ancestor by the caller.
    async fn install_system_packages(&self, graph: &Graph, root: &Stage) -> ForgeResult<Stage> {
        if graph.system_packages.is_empty() {
            return Ok(root.clone());
        }
        let packages = graph.system_packages.join(" ");
        let script = format!(
            "apt-get update && apt-get install -y --no-install-recommends {packages}"
        );
        let archives = cache::seeded_mount(
            self.backend.as_ref(),
            root,
            Ecosystem::Apt,
            "/var/cache/apt",
            None,
        )
        .await?;
        let lists = cache::seeded_mount(
            self.backend.as_ref(),
            root,
            Ecosystem::Apt,
            "/var/lib/apt",
            None,
        )
        .await?;
        self.backend
            .run(
                root,
                RunSpec::new(
                    vec!["sh".to_string(), "-c".to_string(), script],
                    format!("apt-get install {packages}"),
                )
                .with_mount(archives)
                .with_mount(lists),
            )
            .await
    }
}

/// Overlay set for the final merge.
///
/// Optional components are appended only when present; an absent component
/// never shows up as an empty entry.
#[derive(Default)]
struct MergeSet {
    overlays: Vec<Stage>,
}

impl MergeSet {
    fn push(&mut self, stage: Stage) {
        self.overlays.push(stage);
    }

    fn push_opt(&mut self, stage: Option<Stage>) {
        if let Some(stage) = stage {
            self.overlays.push(stage);
        }
    }

    fn into_vec(self) -> Vec<Stage> {
        self.overlays
    }
}
