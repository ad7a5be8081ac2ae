//! Shell framework installer and prompt integration
//!
//! Active only when the definition asks for an interactive shell. The zsh
//! path copies the cached framework payload into the target filesystem, runs
//! the generated install script once, and writes the rendered run-control
//! file. Prompt activation is appended to the relevant run-control files
//! through independent command stages.

use crate::backend::{CopySpec, DirSpec, FileSpec, RunSpec, Stage};
use crate::collab::CompileEvent;
use crate::compiler::{Compiler, BUILD_USER, HOME};
use crate::error::{ForgeError, ForgeResult};
use crate::graph::{Graph, Shell};

const INSTALL_SCRIPT_PATH: &str = "/home/envd/install.sh";
const ZSHRC_PATH: &str = "/home/envd/.zshrc";
const CONFIG_DIR: &str = "/home/envd/.config";
const STARSHIP_CONFIG_PATH: &str = "/home/envd/.config/starship.toml";

const STARSHIP_CONFIG: &str = r#"
[container]
format = "[$symbol \\[envd\\]]($style)"

[sudo]
disabled = false
symbol = "sudo "

[python]
symbol = "Py "

[status]
map_symbol = true
disabled = false
"#;

pub(super) async fn compile_shell(
    compiler: &Compiler,
    graph: &Graph,
    root: &Stage,
) -> ForgeResult<Stage> {
    match graph.shell {
        Shell::None => Ok(root.clone()),
        Shell::Bash => compile_prompt(compiler, graph, root).await,
        Shell::Zsh => {
            let zsh = compile_zsh(compiler, graph, root).await?;
            compile_prompt(compiler, graph, &zsh).await
        }
    }
}

async fn compile_zsh(compiler: &Compiler, graph: &Graph, root: &Stage) -> ForgeResult<Stage> {
    compiler.progress.emit(CompileEvent::ComponentStarted {
        component: "shell framework",
    });
    let cache_hit = compiler
        .framework
        .download_or_cache()
        .await
        .map_err(|e| ForgeError::collaborator("shell framework", e))?;
    compiler.progress.emit(CompileEvent::ComponentFinished {
        component: "shell framework",
        cache_hit,
    });

    let owner = graph.owner();
    let cache_name = compiler.framework.cache_name().to_string();
    let payload = compiler
        .backend
        .copy_from_cache(
            root,
            CopySpec {
                cache_name: cache_name.clone(),
                src: cache_name.clone(),
                dest: format!("{HOME}/{cache_name}"),
                owner: Some(owner),
                create_dest_path: true,
                display: "[internal] copying shell framework payload".to_string(),
            },
        )
        .await?;
    let with_script = compiler
        .backend
        .mkfile(
            &payload,
            FileSpec {
                path: INSTALL_SCRIPT_PATH.to_string(),
                mode: 0o644,
                owner: Some(owner),
                content: compiler.framework.install_script(),
                display: "[internal] writing framework install script".to_string(),
            },
        )
        .await?;
    let installed = compiler
        .backend
        .run(
            &with_script,
            RunSpec::new(
                vec![
                    "bash".to_string(),
                    INSTALL_SCRIPT_PATH.to_string(),
                ],
                "install oh-my-zsh",
            )
            .as_user(BUILD_USER),
        )
        .await?;
    compiler
        .backend
        .mkfile(
            &installed,
            FileSpec {
                path: ZSHRC_PATH.to_string(),
                mode: 0o644,
                owner: Some(owner),
                content: compiler.framework.run_control_content(),
                display: "[internal] writing .zshrc".to_string(),
            },
        )
        .await
}

/// Prompt config plus activation appends.
///
/// The bash and zsh appends are independent command stages, not a
/// transaction: a failure between them leaves a partially configured shell
/// and is surfaced as an error rather than rolled back.
async fn compile_prompt(compiler: &Compiler, graph: &Graph, root: &Stage) -> ForgeResult<Stage> {
    let config_dir = compiler
        .backend
        .mkdir(
            root,
            DirSpec {
                path: CONFIG_DIR.to_string(),
                mode: 0o755,
                owner: None,
                create_parents: true,
                display: "[internal] creating config dir".to_string(),
            },
        )
        .await?;
    let config = compiler
        .backend
        .mkfile(
            &config_dir,
            FileSpec {
                path: STARSHIP_CONFIG_PATH.to_string(),
                mode: 0o644,
                owner: Some(graph.owner()),
                content: STARSHIP_CONFIG.to_string(),
                display: "[internal] setting prompt config".to_string(),
            },
        )
        .await?;

    let bash_append = compiler
        .backend
        .run(
            &config,
            RunSpec::new(
                vec![
                    "bash".to_string(),
                    "-c".to_string(),
                    format!(r#"echo 'eval "$(starship init bash)"' >> {HOME}/.bashrc"#),
                ],
                "[internal] setting prompt config",
            ),
        )
        .await?;

    if graph.shell == Shell::Zsh {
        return compiler
            .backend
            .run(
                &bash_append,
                RunSpec::new(
                    vec![
                        "bash".to_string(),
                        "-c".to_string(),
                        format!(r#"echo 'eval "$(starship init zsh)"' >> {ZSHRC_PATH}"#),
                    ],
                    "[internal] setting prompt config",
                ),
            )
            .await;
    }
    Ok(bash_append)
}
