//! In-memory build plan backend
//!
//! Records stage operations into a DAG without performing any filesystem
//! work. The recorded plan is the artifact handed to an execution backend;
//! it also serves as the reference implementation of the diff/merge
//! contract: dominance is validated on diff, merge lineage is checked, and
//! provably empty deltas are normalized away.

use crate::backend::{
    BuildBackend, CopySpec, DirSpec, FileSpec, RunSpec, Stage, StageId,
};
use crate::error::{ForgeError, ForgeResult};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard};

/// One recorded stage operation
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StageOp {
    Source {
        name: String,
    },
    Mkdir(DirSpec),
    Mkfile(FileSpec),
    Run(RunSpec),
    Env {
        vars: Vec<(String, String)>,
    },
    Copy(CopySpec),
    Diff {
        ancestor: StageId,
        descendant: StageId,
    },
    Merge {
        base: StageId,
        overlays: Vec<StageId>,
    },
}

/// A node of the recorded plan DAG
#[derive(Debug, Clone, Serialize)]
pub struct PlanNode {
    pub id: StageId,
    pub parents: Vec<StageId>,
    #[serde(flatten)]
    pub op: StageOp,
    pub display: String,
    /// True when the node provably contributes no filesystem delta
    pub empty: bool,
}

/// Backend that builds the logical plan instead of executing it
#[derive(Debug, Default)]
pub struct PlanBackend {
    nodes: Mutex<Vec<PlanNode>>,
}

impl PlanBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PlanNode>> {
        // Recover the data on poison; nodes are append-only.
        self.nodes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(
        nodes: &mut Vec<PlanNode>,
        parents: Vec<StageId>,
        op: StageOp,
        display: &str,
        empty: bool,
    ) -> Stage {
        let id = StageId(nodes.len() as u64);
        nodes.push(PlanNode {
            id,
            parents,
            op,
            display: display.to_string(),
            empty,
        });
        Stage::new(id)
    }

    fn check(nodes: &[PlanNode], stage: &Stage) -> ForgeResult<()> {
        if (stage.id().0 as usize) < nodes.len() {
            Ok(())
        } else {
            Err(ForgeError::UnknownStage(stage.id()))
        }
    }

    /// Whether `ancestor` dominates (or equals) `descendant` in the DAG
    fn is_ancestor(nodes: &[PlanNode], ancestor: StageId, descendant: StageId) -> bool {
        if ancestor == descendant {
            return true;
        }
        let mut pending = vec![descendant];
        let mut seen = vec![false; nodes.len()];
        while let Some(id) = pending.pop() {
            for parent in &nodes[id.0 as usize].parents {
                if *parent == ancestor {
                    return true;
                }
                if !seen[parent.0 as usize] {
                    seen[parent.0 as usize] = true;
                    pending.push(*parent);
                }
            }
        }
        false
    }

    /// Clone of the node behind a stage handle, if recorded here
    pub fn node(&self, stage: &Stage) -> Option<PlanNode> {
        self.lock().get(stage.id().0 as usize).cloned()
    }

    /// Snapshot of all recorded nodes, in creation order
    pub fn nodes(&self) -> Vec<PlanNode> {
        self.lock().clone()
    }

    /// Whether the stage provably contributes no filesystem delta
    pub fn is_empty_stage(&self, stage: &Stage) -> bool {
        self.node(stage).map(|n| n.empty).unwrap_or(false)
    }

    /// Human-readable plan listing
    pub fn render(&self) -> String {
        let nodes = self.lock();
        let mut out = String::new();
        for node in nodes.iter() {
            let kind = match &node.op {
                StageOp::Source { .. } => "source",
                StageOp::Mkdir(_) => "mkdir",
                StageOp::Mkfile(_) => "mkfile",
                StageOp::Run(_) => "run",
                StageOp::Env { .. } => "env",
                StageOp::Copy(_) => "copy",
                StageOp::Diff { .. } => "diff",
                StageOp::Merge { .. } => "merge",
            };
            let parents = node
                .parents
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(
                out,
                "{:>4}  {:<7} {:<50} <- [{}]",
                node.id.to_string(),
                kind,
                node.display,
                parents
            );
        }
        out
    }

    /// Plan as JSON, one node per element in creation order
    pub fn to_json(&self) -> ForgeResult<String> {
        Ok(serde_json::to_string_pretty(&*self.lock())?)
    }
}

#[async_trait]
impl BuildBackend for PlanBackend {
    async fn source(&self, name: &str) -> ForgeResult<Stage> {
        let mut nodes = self.lock();
        let op = StageOp::Source {
            name: name.to_string(),
        };
        Ok(Self::push(&mut nodes, Vec::new(), op, name, false))
    }

    async fn mkdir(&self, parent: &Stage, spec: DirSpec) -> ForgeResult<Stage> {
        let mut nodes = self.lock();
        Self::check(&nodes, parent)?;
        let display = spec.display.clone();
        Ok(Self::push(
            &mut nodes,
            vec![parent.id()],
            StageOp::Mkdir(spec),
            &display,
            false,
        ))
    }

    async fn mkfile(&self, parent: &Stage, spec: FileSpec) -> ForgeResult<Stage> {
        let mut nodes = self.lock();
        Self::check(&nodes, parent)?;
        let display = spec.display.clone();
        Ok(Self::push(
            &mut nodes,
            vec![parent.id()],
            StageOp::Mkfile(spec),
            &display,
            false,
        ))
    }

    async fn run(&self, parent: &Stage, spec: RunSpec) -> ForgeResult<Stage> {
        let mut nodes = self.lock();
        Self::check(&nodes, parent)?;
        let mut parents = vec![parent.id()];
        for mount in &spec.mounts {
            Self::check(&nodes, &mount.seed)?;
            parents.push(mount.seed.id());
        }
        let display = spec.display.clone();
        Ok(Self::push(
            &mut nodes,
            parents,
            StageOp::Run(spec),
            &display,
            false,
        ))
    }

    async fn env(
        &self,
        parent: &Stage,
        vars: &[(String, String)],
        display: &str,
    ) -> ForgeResult<Stage> {
        let mut nodes = self.lock();
        Self::check(&nodes, parent)?;
        Ok(Self::push(
            &mut nodes,
            vec![parent.id()],
            StageOp::Env {
                vars: vars.to_vec(),
            },
            display,
            false,
        ))
    }

    async fn copy_from_cache(&self, parent: &Stage, spec: CopySpec) -> ForgeResult<Stage> {
        let mut nodes = self.lock();
        Self::check(&nodes, parent)?;
        let display = spec.display.clone();
        Ok(Self::push(
            &mut nodes,
            vec![parent.id()],
            StageOp::Copy(spec),
            &display,
            false,
        ))
    }

    async fn diff(
        &self,
        ancestor: &Stage,
        descendant: &Stage,
        display: &str,
    ) -> ForgeResult<Stage> {
        let mut nodes = self.lock();
        Self::check(&nodes, ancestor)?;
        Self::check(&nodes, descendant)?;
        if !Self::is_ancestor(&nodes, ancestor.id(), descendant.id()) {
            return Err(ForgeError::DiffNonAncestor {
                ancestor: ancestor.id(),
                descendant: descendant.id(),
            });
        }
        let empty = ancestor.id() == descendant.id();
        Ok(Self::push(
            &mut nodes,
            vec![ancestor.id(), descendant.id()],
            StageOp::Diff {
                ancestor: ancestor.id(),
                descendant: descendant.id(),
            },
            display,
            empty,
        ))
    }

    async fn merge(&self, base: &Stage, overlays: &[Stage], display: &str) -> ForgeResult<Stage> {
        let mut nodes = self.lock();
        Self::check(&nodes, base)?;
        for overlay in overlays {
            Self::check(&nodes, overlay)?;
            // Diff overlays must have been taken against an ancestor
            // reachable from the base. Non-diff overlays (e.g. an
            // extension stage) are scratch-rooted by construction.
            if let StageOp::Diff { ancestor, .. } = &nodes[overlay.id().0 as usize].op {
                let ancestor = *ancestor;
                if !Self::is_ancestor(&nodes, base.id(), ancestor) {
                    return Err(ForgeError::MergeLineage {
                        base: base.id(),
                        overlay: overlay.id(),
                    });
                }
            }
        }
        // Identity law: merging nothing, or only empty deltas, is the base.
        if overlays.is_empty() || overlays.iter().all(|o| nodes[o.id().0 as usize].empty) {
            return Ok(base.clone());
        }
        let mut parents = vec![base.id()];
        parents.extend(overlays.iter().map(Stage::id));
        Ok(Self::push(
            &mut nodes,
            parents,
            StageOp::Merge {
                base: base.id(),
                overlays: overlays.iter().map(Stage::id).collect(),
            },
            display,
            false,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mkfile_spec(path: &str) -> FileSpec {
        FileSpec {
            path: path.to_string(),
            mode: 0o644,
            owner: None,
            content: "content".to_string(),
            display: format!("write {path}"),
        }
    }

    #[tokio::test]
    async fn diff_of_stage_with_itself_is_empty() {
        let backend = PlanBackend::new();
        let base = backend.source("base").await.unwrap();

        let diff = backend.diff(&base, &base, "noop").await.unwrap();
        assert!(backend.is_empty_stage(&diff));
    }

    #[tokio::test]
    async fn diff_requires_dominance() {
        let backend = PlanBackend::new();
        let a = backend.source("a").await.unwrap();
        let b = backend.source("b").await.unwrap();

        let err = backend.diff(&a, &b, "invalid").await.unwrap_err();
        assert!(matches!(err, ForgeError::DiffNonAncestor { .. }));
    }

    #[tokio::test]
    async fn diff_accepts_descendant_chain() {
        let backend = PlanBackend::new();
        let base = backend.source("base").await.unwrap();
        let child = backend
            .mkfile(&base, mkfile_spec("/etc/a"))
            .await
            .unwrap();
        let grandchild = backend
            .mkfile(&child, mkfile_spec("/etc/b"))
            .await
            .unwrap();

        let diff = backend.diff(&base, &grandchild, "delta").await.unwrap();
        assert!(!backend.is_empty_stage(&diff));
    }

    #[tokio::test]
    async fn merge_of_nothing_is_base() {
        let backend = PlanBackend::new();
        let base = backend.source("base").await.unwrap();

        let merged = backend.merge(&base, &[], "noop merge").await.unwrap();
        assert_eq!(merged.id(), base.id());
    }

    #[tokio::test]
    async fn merge_of_only_empty_diffs_is_base() {
        let backend = PlanBackend::new();
        let base = backend.source("base").await.unwrap();
        let e1 = backend.diff(&base, &base, "empty 1").await.unwrap();
        let e2 = backend.diff(&base, &base, "empty 2").await.unwrap();

        let merged = backend.merge(&base, &[e1, e2], "merge").await.unwrap();
        assert_eq!(merged.id(), base.id());
    }

    #[tokio::test]
    async fn merge_validates_overlay_lineage() {
        let backend = PlanBackend::new();
        let base = backend.source("base").await.unwrap();
        let other = backend.source("other").await.unwrap();
        let child = backend
            .mkfile(&other, mkfile_spec("/etc/x"))
            .await
            .unwrap();
        let foreign = backend.diff(&other, &child, "foreign delta").await.unwrap();

        let err = backend.merge(&base, &[foreign], "merge").await.unwrap_err();
        assert!(matches!(err, ForgeError::MergeLineage { .. }));
    }

    #[tokio::test]
    async fn merge_accepts_diff_against_descendant_ancestor() {
        // An overlay may be diffed against any stage reachable from base,
        // not only base itself.
        let backend = PlanBackend::new();
        let base = backend.source("base").await.unwrap();
        let mid = backend.mkfile(&base, mkfile_spec("/etc/mid")).await.unwrap();
        let top = backend.mkfile(&mid, mkfile_spec("/etc/top")).await.unwrap();
        let overlay = backend.diff(&mid, &top, "delta").await.unwrap();

        let merged = backend.merge(&base, &[overlay], "merge").await.unwrap();
        assert!(matches!(
            backend.node(&merged).unwrap().op,
            StageOp::Merge { .. }
        ));
    }

    #[tokio::test]
    async fn unknown_stage_is_rejected() {
        let backend = PlanBackend::new();
        let other = PlanBackend::new();
        let foreign = other.source("base").await.unwrap();

        let err = backend
            .mkfile(&foreign, mkfile_spec("/etc/a"))
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::UnknownStage(_)));
    }

    #[tokio::test]
    async fn render_lists_nodes_in_order() {
        let backend = PlanBackend::new();
        let base = backend.source("base").await.unwrap();
        backend
            .mkfile(&base, mkfile_spec("/etc/a"))
            .await
            .unwrap();

        let rendered = backend.render();
        let base_pos = rendered.find("source").unwrap();
        let file_pos = rendered.find("mkfile").unwrap();
        assert!(base_pos < file_pos);
    }

    #[tokio::test]
    async fn json_rendering_round_trips() {
        let backend = PlanBackend::new();
        let base = backend.source("base").await.unwrap();
        backend.mkfile(&base, mkfile_spec("/etc/a")).await.unwrap();

        let json = backend.to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
    }
}
