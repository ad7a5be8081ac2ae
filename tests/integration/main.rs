//! Integration tests for envforge

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::io::Write;

    fn envforge() -> Command {
        cargo_bin_cmd!("envforge")
    }

    fn definition_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        file.write_all(content.as_bytes()).expect("write definition");
        file
    }

    #[test]
    fn help_displays() {
        envforge()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("build-plan compiler"));
    }

    #[test]
    fn version_displays() {
        envforge()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("envforge"));
    }

    #[test]
    fn plan_missing_file_fails() {
        envforge()
            .args(["plan", "--file", "/nonexistent/definition.toml"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Environment definition not found"));
    }

    #[test]
    fn plan_invalid_toml_fails() {
        let file = definition_file("pypi_packages = not-a-list");
        envforge()
            .args(["plan", "--file"])
            .arg(file.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("TOML parse error"));
    }

    #[test]
    fn plan_renders_the_install_command() {
        let file = definition_file(
            r#"
            pypi_packages = ["flask"]
            "#,
        );
        envforge()
            .args(["plan", "--file"])
            .arg(file.path())
            .assert()
            .success()
            .stdout(
                predicate::str::contains("pip install flask")
                    .and(predicate::str::contains("Plan compiled:")),
            );
    }

    #[test]
    fn plan_json_is_parseable() {
        let file = definition_file(
            r#"
            system_packages = ["git", "curl"]
            pypi_packages = ["numpy"]
            pypi_index_url = "https://mirror.example.com/simple"
            "#,
        );
        let output = envforge()
            .args(["plan", "--json", "--file"])
            .arg(file.path())
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();

        let plan: serde_json::Value = serde_json::from_slice(&output).expect("valid JSON plan");
        let nodes = plan.as_array().expect("array of nodes");
        assert!(nodes.iter().any(|n| n["op"] == "merge"));
        assert!(nodes.iter().any(|n| n["op"] == "diff"));
    }
}

mod compile_tests {
    use envforge::backend::{BuildBackend, PlanBackend, StageOp};
    use envforge::shell::{OhMyZshSource, FRAMEWORK_CACHE_NAME};
    use envforge::{Compiler, Graph, Shell};
    use std::sync::Arc;

    /// Full definition compiled end to end with a pre-seeded framework
    /// cache, so no network fetch happens.
    #[tokio::test]
    async fn full_definition_compiles_to_one_merge() {
        let cache = tempfile::tempdir().expect("temp cache dir");
        std::fs::write(cache.path().join(FRAMEWORK_CACHE_NAME), b"payload").expect("seed cache");

        let graph = Graph {
            system_packages: vec!["git".to_string(), "htop".to_string()],
            pypi_packages: vec!["numpy".to_string(), "pandas".to_string()],
            conda_packages: vec!["mkl".to_string()],
            conda_enabled: true,
            shell: Shell::Zsh,
            ssh_key: Some("ssh-ed25519 AAAAC3Nza dev@host".to_string()),
            ..Graph::default()
        };

        let backend = Arc::new(PlanBackend::new());
        let base = backend.source("base").await.expect("base stage");
        let compiler = Compiler::new(backend.clone())
            .with_framework(Arc::new(OhMyZshSource::with_cache_dir(cache.path())));

        let merged = compiler.compile(&graph, &base).await.expect("compile");

        let node = backend.node(&merged).expect("merge node");
        match node.op {
            StageOp::Merge { base: b, overlays } => {
                assert_eq!(b, base.id());
                assert_eq!(overlays.len(), 4);
            }
            other => panic!("unexpected final op: {other:?}"),
        }

        // Exactly one merge in the whole plan.
        let merges = backend
            .nodes()
            .iter()
            .filter(|n| matches!(n.op, StageOp::Merge { .. }))
            .count();
        assert_eq!(merges, 1);
    }

    #[tokio::test]
    async fn compile_is_repeatable_across_backends() {
        let graph = Graph {
            pypi_packages: vec!["flask".to_string()],
            ..Graph::default()
        };

        let mut renders = Vec::new();
        for _ in 0..2 {
            let backend = Arc::new(PlanBackend::new());
            let base = backend.source("base").await.expect("base stage");
            let compiler = Compiler::new(backend.clone());
            compiler.compile(&graph, &base).await.expect("compile");
            renders.push(backend.render());
        }
        assert_eq!(renders[0], renders[1]);
    }
}
