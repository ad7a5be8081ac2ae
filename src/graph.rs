//! Environment definition schema
//!
//! The `Graph` describes the desired development environment. It is produced
//! by an external loader (the bundled CLI reads it from TOML) and is
//! read-only for the duration of a compile call.

use crate::backend::FileOwner;
use serde::Deserialize;

/// Default uid/gid of the unprivileged in-image user
pub const DEFAULT_UID: u32 = 1000;
pub const DEFAULT_GID: u32 = 1000;

/// Interactive shell preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    /// No interactive shell customization
    #[default]
    None,
    /// Plain bash with prompt integration
    Bash,
    /// zsh with the shell framework installed
    Zsh,
}

/// Declarative environment definition
///
/// Ordered package lists install in declared order. Optional fields map to
/// conditionally-included components; an absent field contributes nothing to
/// the plan.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Graph {
    /// System (apt) packages
    pub system_packages: Vec<String>,

    /// Python packages installed through pip
    pub pypi_packages: Vec<String>,

    /// Conda packages, installed only when conda is enabled
    pub conda_packages: Vec<String>,

    /// Whether the conda-managed interpreter wraps the pip install
    pub conda_enabled: bool,

    /// Conda channel mirror, written as metadata before any install
    pub conda_channel: Option<String>,

    /// Interactive shell preference
    pub shell: Shell,

    /// Primary PyPI index URL
    pub pypi_index_url: Option<String>,

    /// Extra PyPI index URL, only meaningful with a primary index
    pub pypi_extra_index_url: Option<String>,

    /// Public SSH key material, passed through opaquely
    pub ssh_key: Option<String>,

    /// IDE extension identifiers resolved by an external collaborator
    pub vscode_extensions: Vec<String>,

    /// Whether notebook support is prepared
    pub notebook: bool,

    /// Owning uid for created files and cache mounts
    pub uid: u32,

    /// Owning gid for created files and cache mounts
    pub gid: u32,
}

impl Default for Graph {
    fn default() -> Self {
        Self {
            system_packages: Vec::new(),
            pypi_packages: Vec::new(),
            conda_packages: Vec::new(),
            conda_enabled: false,
            conda_channel: None,
            shell: Shell::None,
            pypi_index_url: None,
            pypi_extra_index_url: None,
            ssh_key: None,
            vscode_extensions: Vec::new(),
            notebook: false,
            uid: DEFAULT_UID,
            gid: DEFAULT_GID,
        }
    }
}

/// Logical installation units, conditionally mapped to stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    SystemPackages,
    CondaPackages,
    PypiPackages,
    PypiIndex,
    SshKeys,
    ShellFramework,
    VscodeExtensions,
    Notebook,
}

impl Component {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SystemPackages => "system packages",
            Self::CondaPackages => "conda packages",
            Self::PypiPackages => "pypi packages",
            Self::PypiIndex => "pypi index",
            Self::SshKeys => "ssh keys",
            Self::ShellFramework => "shell framework",
            Self::VscodeExtensions => "vscode extensions",
            Self::Notebook => "notebook",
        }
    }
}

impl Graph {
    /// Owner applied to files and cache mounts created for this environment
    pub fn owner(&self) -> FileOwner {
        FileOwner {
            uid: self.uid,
            gid: self.gid,
        }
    }

    pub fn wants_ssh(&self) -> bool {
        self.ssh_key.is_some()
    }

    pub fn wants_vscode(&self) -> bool {
        !self.vscode_extensions.is_empty()
    }

    pub fn wants_notebook(&self) -> bool {
        self.notebook
    }

    /// Prompt customization rides along with any interactive shell choice
    pub fn wants_prompt(&self) -> bool {
        self.shell != Shell::None
    }

    /// Which optional components contribute stages for this definition.
    ///
    /// Absent components are omitted entirely; they never appear as empty
    /// entries downstream.
    pub fn enabled_components(&self) -> Vec<Component> {
        let mut components = Vec::new();
        if !self.system_packages.is_empty() {
            components.push(Component::SystemPackages);
        }
        if self.conda_enabled && !self.conda_packages.is_empty() {
            components.push(Component::CondaPackages);
        }
        if !self.pypi_packages.is_empty() {
            components.push(Component::PypiPackages);
        }
        if self.pypi_index_url.is_some() {
            components.push(Component::PypiIndex);
        }
        if self.wants_ssh() {
            components.push(Component::SshKeys);
        }
        if self.shell == Shell::Zsh {
            components.push(Component::ShellFramework);
        }
        if self.wants_vscode() {
            components.push(Component::VscodeExtensions);
        }
        if self.wants_notebook() {
            components.push(Component::Notebook);
        }
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_empty() {
        let graph = Graph::default();
        assert!(graph.enabled_components().is_empty());
        assert_eq!(graph.shell, Shell::None);
        assert_eq!(graph.uid, DEFAULT_UID);
        assert_eq!(graph.gid, DEFAULT_GID);
    }

    #[test]
    fn toml_deserialization() {
        let graph: Graph = toml::from_str(
            r#"
            pypi_packages = ["numpy", "pandas"]
            shell = "zsh"
            conda_enabled = true
            conda_packages = ["mkl"]
            pypi_index_url = "https://mirror.example.com/simple"
            "#,
        )
        .expect("valid definition");

        assert_eq!(graph.pypi_packages, vec!["numpy", "pandas"]);
        assert_eq!(graph.shell, Shell::Zsh);
        assert!(graph.conda_enabled);
        assert_eq!(
            graph.pypi_index_url.as_deref(),
            Some("https://mirror.example.com/simple")
        );
    }

    #[test]
    fn components_follow_fields() {
        let graph = Graph {
            pypi_packages: vec!["flask".to_string()],
            ssh_key: Some("ssh-ed25519 AAAA".to_string()),
            shell: Shell::Zsh,
            ..Graph::default()
        };

        let components = graph.enabled_components();
        assert!(components.contains(&Component::PypiPackages));
        assert!(components.contains(&Component::SshKeys));
        assert!(components.contains(&Component::ShellFramework));
        assert!(!components.contains(&Component::SystemPackages));
        assert!(!components.contains(&Component::VscodeExtensions));
    }

    #[test]
    fn conda_packages_require_conda() {
        let graph = Graph {
            conda_packages: vec!["mkl".to_string()],
            conda_enabled: false,
            ..Graph::default()
        };
        assert!(!graph
            .enabled_components()
            .contains(&Component::CondaPackages));
    }
}
