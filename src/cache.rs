//! Persistent cache mounts for package-manager caches
//!
//! Cache keys are pure functions of (ecosystem, path): identical inputs
//! across separate compile invocations yield the identical key, which is
//! what makes cross-build cache reuse work. Never fold timestamps or
//! process-local identifiers into a key.
//!
//! Mounts are declared shared: multiple simultaneous consumers of the same
//! key may read and write concurrently. No locking happens here; concurrency
//! correctness inside the mount is delegated to the package manager's own
//! locking.

use crate::backend::{BuildBackend, DirSpec, FileOwner, Stage};
use crate::error::ForgeResult;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Package-manager domain owning a cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Pip,
    Conda,
    Apt,
}

impl Ecosystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pip => "pip",
            Self::Conda => "conda",
            Self::Apt => "apt",
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concurrency discipline for a mounted cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheAccess {
    /// Concurrent readers and writers; the package manager locks internally
    Shared,
    /// One consumer at a time, serialized by the backend
    Locked,
}

/// Deterministic cache key for (ecosystem, path)
pub fn cache_id(ecosystem: Ecosystem, path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ecosystem.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(path.as_bytes());
    let hash = hex::encode(hasher.finalize());
    format!("envforge-cache-{}-{}", ecosystem, &hash[..12])
}

/// Persistent cache mount attached to a run command
///
/// The `seed` stage creates the mount's source directory with explicit
/// ownership before the install command runs; the backend otherwise defaults
/// mount ownership to root, which the unprivileged install command cannot
/// write as.
#[derive(Debug, Clone, Serialize)]
pub struct CacheMount {
    pub id: String,
    /// Mount path inside the target filesystem
    pub target: String,
    /// Path within the seed stage used as the mount source
    pub source_path: String,
    pub access: CacheAccess,
    pub seed: Stage,
}

/// Build the ownership seed stage and the mount spec for a persistent cache.
///
/// The cache itself lives outside any single compile call: created on first
/// use, never deleted here.
pub async fn seeded_mount(
    backend: &dyn BuildBackend,
    parent: &Stage,
    ecosystem: Ecosystem,
    target: &str,
    owner: Option<FileOwner>,
) -> ForgeResult<CacheMount> {
    let seed = backend
        .mkdir(
            parent,
            DirSpec {
                path: "/cache".to_string(),
                mode: 0o755,
                owner,
                create_parents: true,
                display: format!("[internal] setting {ecosystem} cache mount permissions"),
            },
        )
        .await?;
    Ok(CacheMount {
        id: cache_id(ecosystem, target),
        target: target.to_string(),
        source_path: "/cache".to_string(),
        access: CacheAccess::Shared,
        seed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PlanBackend;

    #[test]
    fn cache_id_is_deterministic() {
        let a = cache_id(Ecosystem::Pip, "/home/envd/.cache");
        let b = cache_id(Ecosystem::Pip, "/home/envd/.cache");
        assert_eq!(a, b);
    }

    #[test]
    fn cache_id_varies_by_ecosystem_and_path() {
        let pip = cache_id(Ecosystem::Pip, "/home/envd/.cache");
        let conda = cache_id(Ecosystem::Conda, "/home/envd/.cache");
        let other = cache_id(Ecosystem::Pip, "/var/cache/other");
        assert_ne!(pip, conda);
        assert_ne!(pip, other);
    }

    #[test]
    fn cache_id_format() {
        let id = cache_id(Ecosystem::Apt, "/var/cache/apt");
        assert!(id.starts_with("envforge-cache-apt-"));
        let hash = id.rsplit('-').next().unwrap();
        assert_eq!(hash.len(), 12);
    }

    #[tokio::test]
    async fn seeded_mount_creates_owned_directory() {
        let backend = PlanBackend::new();
        let base = backend.source("base").await.unwrap();
        let owner = FileOwner {
            uid: 1000,
            gid: 1000,
        };

        let mount = seeded_mount(&backend, &base, Ecosystem::Pip, "/home/envd/.cache", Some(owner))
            .await
            .unwrap();

        assert_eq!(mount.access, CacheAccess::Shared);
        assert_eq!(mount.source_path, "/cache");
        let seed = backend.node(&mount.seed).unwrap();
        match seed.op {
            crate::backend::StageOp::Mkdir(spec) => {
                assert_eq!(spec.path, "/cache");
                assert_eq!(spec.owner, Some(owner));
                assert!(spec.create_parents);
            }
            other => panic!("unexpected op: {other:?}"),
        }
    }
}
