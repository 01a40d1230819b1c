//! Integration tests for CLI commands

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

/// A scratch workspace with a local chart and a file-backed release store
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let chart = dir.path().join("web");
        std::fs::create_dir_all(chart.join("templates")).unwrap();
        std::fs::write(
            chart.join("Chart.yaml"),
            "apiVersion: v2\nname: web\nversion: 1.2.0\nappVersion: \"2.4\"\n",
        )
        .unwrap();
        std::fs::write(
            chart.join("templates/secret.yaml"),
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: web-auth\nstringData:\n  password: hunter2\n",
        )
        .unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn chart(&self) -> String {
        self.path("web").display().to_string()
    }

    fn state(&self) -> PathBuf {
        self.path("keelson.state.json")
    }

    /// Write an input document and return its path
    fn inputs(&self, name: &str, spec: &str) -> String {
        let path = self.path(name);
        std::fs::write(&path, format!("releaseSpec:\n{spec}")).unwrap();
        path.display().to_string()
    }

    /// Run keelson against this workspace's store and state
    fn keelson(&self, args: &[&str]) -> Output {
        let storage = self.path("releases");
        let state = self.state();
        let mut command = Command::new(env!("CARGO_BIN_EXE_keelson"));
        command
            .args(args)
            .arg("--driver")
            .arg("file")
            .arg("--storage-dir")
            .arg(&storage)
            .arg("--state")
            .arg(&state)
            .env("KEELSON_REPOSITORY_CONFIG", self.path("repositories.yaml"))
            .env("KEELSON_REPOSITORY_CACHE", self.path("cache"))
            .env("KEELSON_REGISTRY_CONFIG", self.path("registry.json"))
            .env("KEELSON_PLUGINS", self.path("plugins"))
            .env_remove("KEELSON_NAMESPACE")
            .env_remove("KEELSON_DRIVER")
            .env_remove("KEELSON_CONFIG")
            .env_remove("KEELSON_LOG")
            .output()
            .expect("Failed to execute keelson")
    }

    fn saved_state(&self) -> Value {
        read_json(&self.state())
    }
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

mod check_command {
    use super::*;

    #[test]
    fn test_check_fills_name_and_namespace() {
        let ws = Workspace::new();
        let file = ws.inputs("release.yaml", &format!("  chart: {}\n", ws.chart()));

        let output = ws.keelson(&["check", "-f", &file, "--resource", "web"]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));

        let checked: Value = serde_json::from_str(&stdout(&output)).unwrap();
        let name = checked["releaseSpec"]["name"].as_str().unwrap();
        assert!(name.starts_with("web-"));
        assert_eq!(name.len(), "web-".len() + 8);
        assert_eq!(checked["releaseSpec"]["namespace"], "default");
        assert_eq!(checked["resourceType"], "keelson:index:Release");
    }

    #[test]
    fn test_check_namespace_flag() {
        let ws = Workspace::new();
        let file = ws.inputs("release.yaml", &format!("  chart: {}\n  name: web\n", ws.chart()));

        let output = ws.keelson(&["check", "-f", &file, "--namespace", "shop"]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));

        let checked: Value = serde_json::from_str(&stdout(&output)).unwrap();
        assert_eq!(checked["releaseSpec"]["namespace"], "shop");
    }

    #[test]
    fn test_check_reports_failures() {
        let ws = Workspace::new();
        let file = ws.inputs(
            "release.yaml",
            "  name: web\n  set:\n    - name: replicas\n      value: \"3\"\n      type: number\n",
        );

        let output = ws.keelson(&["check", "-f", &file]);
        assert_eq!(output.status.code(), Some(2));
        let err = stderr(&output);
        assert!(err.contains("releaseSpec.chart"));
        assert!(err.contains("releaseSpec.set[0].type"));
    }

    #[test]
    fn test_check_unknown_secret_path() {
        let ws = Workspace::new();
        let file = ws.inputs("release.yaml", &format!("  chart: {}\n", ws.chart()));

        let output = ws.keelson(&["check", "-f", &file, "--secret", "releaseSpec.set[0].value"]);
        assert_eq!(output.status.code(), Some(2));
        assert!(stderr(&output).contains("no such input"));
    }

    #[test]
    fn test_check_missing_file() {
        let ws = Workspace::new();
        let missing = ws.path("missing.yaml").display().to_string();

        let output = ws.keelson(&["check", "-f", &missing]);
        assert_eq!(output.status.code(), Some(5));
    }

    #[test]
    fn test_unknown_driver_is_configuration_error() {
        let ws = Workspace::new();
        let file = ws.inputs("release.yaml", &format!("  chart: {}\n", ws.chart()));

        let output = Command::new(env!("CARGO_BIN_EXE_keelson"))
            .args(["check", "-f", &file, "--driver", "etcd"])
            .output()
            .expect("Failed to execute keelson");
        assert_eq!(output.status.code(), Some(3));
        assert!(stderr(&output).contains("etcd"));
    }
}

mod up_command {
    use super::*;

    #[test]
    fn test_up_creates_then_noop() {
        let ws = Workspace::new();
        let file = ws.inputs("release.yaml", &format!("  chart: {}\n  name: web\n", ws.chart()));

        let output = ws.keelson(&["up", "-f", &file]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains("Created release"));

        let state = ws.saved_state();
        assert_eq!(state["id"], "web");
        assert_eq!(state["outputs"]["status"]["status"], "deployed");
        assert_eq!(state["outputs"]["status"]["revision"], 1);
        assert_eq!(state["outputs"]["__inputs"]["releaseSpec"]["name"], "web");

        let output = ws.keelson(&["up", "-f", &file]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains("up to date"));
        assert_eq!(ws.saved_state()["outputs"]["status"]["revision"], 1);
    }

    #[test]
    fn test_up_upgrades_in_place() {
        let ws = Workspace::new();
        let first = ws.inputs("v1.yaml", &format!("  chart: {}\n  name: web\n", ws.chart()));
        let second = ws.inputs(
            "v2.yaml",
            &format!("  chart: {}\n  name: web\n  values:\n    - \"replicas: 3\"\n", ws.chart()),
        );

        assert!(ws.keelson(&["up", "-f", &first]).status.success());

        let output = ws.keelson(&["diff", "-f", &second, "--json"]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        let diff: Value = serde_json::from_str(&stdout(&output)).unwrap();
        assert_eq!(diff["changes"], true);
        assert_eq!(diff["diffs"], serde_json::json!(["releaseSpec.values"]));
        assert_eq!(diff["replaces"], serde_json::json!([]));

        let output = ws.keelson(&["up", "-f", &second]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains("Upgraded release"));

        let state = ws.saved_state();
        assert_eq!(state["outputs"]["status"]["revision"], 2);
        let values: Value =
            serde_json::from_str(state["outputs"]["status"]["values"].as_str().unwrap()).unwrap();
        assert_eq!(values["replicas"], 3);
    }

    #[test]
    fn test_up_replaces_on_namespace_change() {
        let ws = Workspace::new();
        let first = ws.inputs("v1.yaml", &format!("  chart: {}\n  name: web\n", ws.chart()));
        let moved = ws.inputs(
            "v2.yaml",
            &format!("  chart: {}\n  name: web\n  namespace: shop\n", ws.chart()),
        );

        assert!(ws.keelson(&["up", "-f", &first]).status.success());

        let output = ws.keelson(&["diff", "-f", &moved, "--json"]);
        let diff: Value = serde_json::from_str(&stdout(&output)).unwrap();
        assert_eq!(diff["replaces"], serde_json::json!(["releaseSpec.namespace"]));
        assert_eq!(diff["deleteBeforeReplace"], false);

        let output = ws.keelson(&["up", "-f", &moved]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains("Deleted release"));
        assert_eq!(ws.saved_state()["outputs"]["status"]["namespace"], "shop");
    }

    #[test]
    fn test_up_redacts_secret_overrides() {
        let ws = Workspace::new();
        let file = ws.inputs(
            "release.yaml",
            &format!(
                "  chart: {}\n  name: web\n  set:\n    - name: auth.password\n      value: hunter2\n",
                ws.chart()
            ),
        );

        let output = ws.keelson(&["up", "-f", &file, "--secret", "releaseSpec.set[0].value"]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));

        let status = &ws.saved_state()["outputs"]["status"];
        let values = status["values"].as_str().unwrap();
        let manifest = status["manifest"].as_str().unwrap();
        assert!(!values.contains("hunter2"));
        assert!(values.contains("(sensitive value)"));
        assert!(!manifest.contains("hunter2"));
    }

    #[test]
    fn test_up_preview_writes_nothing() {
        let ws = Workspace::new();
        let file = ws.inputs("release.yaml", &format!("  chart: {}\n  name: web\n", ws.chart()));

        let output = ws.keelson(&["up", "-f", &file, "--preview"]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains("will be created"));
        assert!(!ws.state().exists());
    }

    #[test]
    fn test_up_partial_failure_saves_state() {
        let ws = Workspace::new();
        std::fs::write(ws.path("web/templates/broken.yaml"), "metadata:\n  name: no-kind\n").unwrap();
        let file = ws.inputs("release.yaml", &format!("  chart: {}\n  name: web\n", ws.chart()));

        let output = ws.keelson(&["up", "-f", &file]);
        assert_eq!(output.status.code(), Some(4));
        assert!(stderr(&output).contains("not healthy"));

        let state = ws.saved_state();
        assert_eq!(state["id"], "web");
        assert_eq!(state["outputs"]["status"]["status"], "failed");
    }

    #[test]
    fn test_up_library_chart_is_configuration_error() {
        let ws = Workspace::new();
        std::fs::write(
            ws.path("web/Chart.yaml"),
            "apiVersion: v2\nname: web\nversion: 1.2.0\ntype: library\n",
        )
        .unwrap();
        let file = ws.inputs("release.yaml", &format!("  chart: {}\n  name: web\n", ws.chart()));

        let output = ws.keelson(&["up", "-f", &file]);
        assert_eq!(output.status.code(), Some(3));
        assert!(!ws.state().exists());
    }
}

mod refresh_command {
    use super::*;

    #[test]
    fn test_refresh_without_state() {
        let ws = Workspace::new();
        let output = ws.keelson(&["refresh"]);
        assert_eq!(output.status.code(), Some(64));
        assert!(stderr(&output).contains("no state"));
    }

    #[test]
    fn test_refresh_keeps_live_release() {
        let ws = Workspace::new();
        let file = ws.inputs("release.yaml", &format!("  chart: {}\n  name: web\n", ws.chart()));
        assert!(ws.keelson(&["up", "-f", &file]).status.success());
        let before = ws.saved_state();

        let output = ws.keelson(&["refresh"]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert_eq!(ws.saved_state()["outputs"], before["outputs"]);
    }
}

mod destroy_command {
    use super::*;

    #[test]
    fn test_destroy_then_refresh() {
        let ws = Workspace::new();
        let file = ws.inputs("release.yaml", &format!("  chart: {}\n  name: web\n", ws.chart()));
        assert!(ws.keelson(&["up", "-f", &file]).status.success());
        let saved = std::fs::read_to_string(ws.state()).unwrap();

        let output = ws.keelson(&["destroy"]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains("uninstalled"));
        assert!(!ws.state().exists());

        // A stale state file refers to a release that is gone
        std::fs::write(ws.state(), saved).unwrap();
        let output = ws.keelson(&["refresh"]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert!(stdout(&output).contains("no longer exists"));
        assert!(!ws.state().exists());
    }

    #[test]
    fn test_destroy_without_state() {
        let ws = Workspace::new();
        let output = ws.keelson(&["destroy"]);
        assert!(output.status.success());
        assert!(stdout(&output).contains("nothing to destroy"));
    }
}
