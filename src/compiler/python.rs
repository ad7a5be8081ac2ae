//! Python ecosystem stages: PyPI index configuration, pip installs, and the
//! conda channel/environment/package chain.

use crate::backend::{BuildBackend, DirSpec, FileSpec, RunSpec, Stage};
use crate::cache::{self, Ecosystem};
use crate::compiler::BUILD_USER;
use crate::error::ForgeResult;
use crate::graph::Graph;
use tracing::debug;

/// Name of the conda-managed environment inside the image
pub const DEFAULT_CONDA_ENV: &str = "envd";

const CONDA_BIN: &str = "/opt/conda/bin/conda";
const CONDA_RC_PATH: &str = "/opt/conda/.condarc";
const PIP_CACHE_DIR: &str = "/home/envd/.cache";
const PIP_CONFIG_DIR: &str = "/home/envd/.config/pip";
const PIP_CONFIG_PATH: &str = "/home/envd/.config/pip/pip.conf";

/// Write the conda channel mirror configuration. Pure metadata, no install.
pub(super) async fn conda_channel(
    backend: &dyn BuildBackend,
    graph: &Graph,
    root: &Stage,
) -> ForgeResult<Stage> {
    let Some(channel) = &graph.conda_channel else {
        return Ok(root.clone());
    };
    debug!(channel, "using custom conda channel");
    let content = format!("channels:\n  - {channel}\n  - defaults\n");
    backend
        .mkfile(
            root,
            FileSpec {
                path: CONDA_RC_PATH.to_string(),
                mode: 0o644,
                owner: Some(graph.owner()),
                content,
                display: "[internal] setting conda channel".to_string(),
            },
        )
        .await
}

/// Write the PyPI index configuration; a missing index URL is a zero-cost
/// pass-through, leaving the stage byte-identical to its parent.
pub(super) async fn pypi_index(
    backend: &dyn BuildBackend,
    graph: &Graph,
    root: &Stage,
) -> ForgeResult<Stage> {
    let Some(index) = &graph.pypi_index_url else {
        return Ok(root.clone());
    };
    debug!(index, "using custom PyPI index");
    let extra = match &graph.pypi_extra_index_url {
        Some(url) => {
            debug!(extra_index = url, "using extra PyPI index");
            format!("extra-index-url={url}\n")
        }
        None => String::new(),
    };
    let content = format!("[global]\nindex-url={index}\n{extra}");
    let config_dir = backend
        .mkdir(
            root,
            DirSpec {
                path: PIP_CONFIG_DIR.to_string(),
                mode: 0o755,
                owner: Some(graph.owner()),
                create_parents: true,
                display: "[internal] setting PyPI index".to_string(),
            },
        )
        .await?;
    backend
        .mkfile(
            &config_dir,
            FileSpec {
                path: PIP_CONFIG_PATH.to_string(),
                mode: 0o644,
                owner: Some(graph.owner()),
                content,
                display: "[internal] setting PyPI index".to_string(),
            },
        )
        .await
}

/// Declare the conda environment variables on top of the shell stage.
///
/// This mutates shell startup context and must precede the pip install when
/// conda is enabled; the composer sequences it accordingly.
pub(super) async fn conda_env(
    backend: &dyn BuildBackend,
    graph: &Graph,
    root: &Stage,
) -> ForgeResult<Stage> {
    if !graph.conda_enabled {
        return Ok(root.clone());
    }
    let vars = vec![
        (
            "CONDA_DEFAULT_ENV".to_string(),
            DEFAULT_CONDA_ENV.to_string(),
        ),
        (
            "PATH".to_string(),
            format!("/opt/conda/envs/{DEFAULT_CONDA_ENV}/bin:/opt/conda/bin:$PATH"),
        ),
    ];
    backend
        .env(root, &vars, "[internal] setting conda environment")
        .await
}

/// Install conda packages through the conda-managed environment
pub(super) async fn install_conda_packages(
    backend: &dyn BuildBackend,
    graph: &Graph,
    root: &Stage,
) -> ForgeResult<Stage> {
    if !graph.conda_enabled || graph.conda_packages.is_empty() {
        return Ok(root.clone());
    }

    let mut argv: Vec<String> = [CONDA_BIN, "install", "-n", DEFAULT_CONDA_ENV, "-y"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if let Some(channel) = &graph.conda_channel {
        argv.push("-c".to_string());
        argv.push(channel.clone());
    }
    argv.extend(graph.conda_packages.iter().cloned());

    let mount = cache::seeded_mount(
        backend,
        root,
        Ecosystem::Conda,
        "/opt/conda/pkgs",
        Some(graph.owner()),
    )
    .await?;

    backend
        .run(
            root,
            RunSpec::new(
                argv,
                format!("conda install {}", graph.conda_packages.join(" ")),
            )
            .as_user(BUILD_USER)
            .with_mount(mount),
        )
        .await
}

/// Install PyPI packages in declared order.
///
/// When conda is enabled the install is wrapped through the conda-managed
/// interpreter, which only exists after the conda environment stage.
pub(super) async fn install_pypi_packages(
    backend: &dyn BuildBackend,
    graph: &Graph,
    root: &Stage,
) -> ForgeResult<Stage> {
    if graph.pypi_packages.is_empty() {
        return Ok(root.clone());
    }

    let mut argv: Vec<String> = if graph.conda_enabled {
        [CONDA_BIN, "run", "-n", DEFAULT_CONDA_ENV, "pip", "install"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    } else {
        ["pip", "install", "--no-warn-script-location"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    };
    argv.extend(graph.pypi_packages.iter().cloned());

    let mount = cache::seeded_mount(
        backend,
        root,
        Ecosystem::Pip,
        PIP_CACHE_DIR,
        Some(graph.owner()),
    )
    .await?;

    backend
        .run(
            root,
            RunSpec::new(argv, format!("pip install {}", graph.pypi_packages.join(" ")))
                .as_user(BUILD_USER)
                .with_mount(mount),
        )
        .await
}
