//! 命令行集成测试
//!
//! 每个测试都在独立的 `HOSTKIT_HOME` 下运行二进制。

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// 创建隔离的主目录
fn create_test_env() -> TempDir {
    tempfile::tempdir().unwrap()
}

fn hostkit(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("hostkit").unwrap();
    cmd.env("HOSTKIT_HOME", home.path()).env_remove("RUST_LOG");
    cmd
}

mod basic_commands {
    use super::*;

    #[test]
    fn test_help_command() {
        let home = create_test_env();
        hostkit(&home)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("plugin"))
            .stdout(predicate::str::contains("run"));
    }

    #[test]
    fn test_first_run_generates_plugin_config() {
        let home = create_test_env();
        hostkit(&home).args(["plugin", "list"]).assert().success();

        let config = fs::read_to_string(home.path().join("plugins.toml")).unwrap();
        assert!(config.contains("system"));
        assert!(config.contains("docker"));
    }
}

mod plugin_commands {
    use super::*;

    #[test]
    fn test_list_shows_builtins() {
        let home = create_test_env();
        hostkit(&home)
            .args(["plugin", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("NAME"))
            .stdout(predicate::str::contains("system"))
            .stdout(predicate::str::contains("docker"));
    }

    #[test]
    fn test_list_json() {
        let home = create_test_env();
        let output = hostkit(&home)
            .args(["plugin", "list", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let records: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        let names: Vec<&str> = records
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["docker", "system"]);
    }

    #[test]
    fn test_info_shows_commands_and_dependencies() {
        let home = create_test_env();
        hostkit(&home)
            .args(["plugin", "info", "docker"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Name:        docker"))
            .stdout(predicate::str::contains("exec <container>"))
            .stdout(predicate::str::contains("system >=0.1.0"));
    }

    #[test]
    fn test_info_unknown_plugin_fails() {
        let home = create_test_env();
        hostkit(&home)
            .args(["plugin", "info", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("plugin not found: nope"));
    }

    #[test]
    fn test_validate_builtins() {
        let home = create_test_env();
        hostkit(&home)
            .args(["plugin", "validate", "--strict"])
            .assert()
            .success()
            .stdout(predicate::str::contains("✓ system"))
            .stdout(predicate::str::contains("2 plugins valid"));
    }

    #[test]
    fn test_validate_reports_plugins_that_failed_to_load() {
        let home = create_test_env();
        let plugin_dir = home.path().join("plugins").join("broken");
        fs::create_dir_all(&plugin_dir).unwrap();
        fs::write(plugin_dir.join("plugin.json"), "{\"name\": \"broken\"}").unwrap();

        hostkit(&home)
            .args(["plugin", "validate"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("✗ broken (not loaded)"))
            .stderr(predicate::str::contains("1 of 3 plugins failed validation"));
    }

    #[test]
    fn test_order_puts_dependencies_first() {
        let home = create_test_env();
        let output = hostkit(&home).args(["plugin", "order"]).output().unwrap();
        assert!(output.status.success());

        let stdout = String::from_utf8(output.stdout).unwrap();
        let system = stdout.find("system").unwrap();
        let docker = stdout.find("docker").unwrap();
        assert!(system < docker);
    }

    #[test]
    fn test_install_rejects_invalid_reference() {
        let home = create_test_env();
        hostkit(&home)
            .args(["plugin", "install", "not a repository"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("install failed at parse"));

        assert!(!home.path().join("plugins").join("not a repository").exists());
    }

    #[test]
    fn test_install_verbose_prints_cause_chain() {
        let home = create_test_env();
        hostkit(&home)
            .args(["--verbose", "plugin", "install", "::"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("parse step failed"))
            .stderr(predicate::str::contains("caused by: invalid repository URL"));
    }
}

mod plugin_config_commands {
    use super::*;

    fn listed_names(home: &TempDir) -> Vec<String> {
        let output = hostkit(home)
            .args(["plugin", "list", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let records: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        records
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_disable_then_enable() {
        let home = create_test_env();
        hostkit(&home)
            .args(["plugin", "disable", "docker"])
            .assert()
            .success()
            .stdout(predicate::str::contains("✓ disabled docker"));
        assert_eq!(listed_names(&home), vec!["system"]);

        hostkit(&home)
            .args(["plugin", "enable", "docker"])
            .assert()
            .success();
        assert_eq!(listed_names(&home), vec!["docker", "system"]);
    }

    #[test]
    fn test_disable_warns_about_dependents() {
        let home = create_test_env();
        hostkit(&home)
            .args(["plugin", "disable", "system"])
            .assert()
            .success()
            .stderr(predicate::str::contains("warning: docker will fail to load without system"));
    }

    #[test]
    fn test_enable_unknown_plugin_fails() {
        let home = create_test_env();
        hostkit(&home)
            .args(["plugin", "enable", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("plugin not found: nope"));
    }

    #[test]
    fn test_set_persists_setting() {
        let home = create_test_env();
        hostkit(&home)
            .args(["plugin", "set", "docker", "socket", "/run/docker.sock"])
            .assert()
            .success();

        let config = fs::read_to_string(home.path().join("plugins.toml")).unwrap();
        assert!(config.contains("socket = \"/run/docker.sock\""), "{}", config);
    }

    #[test]
    fn test_remove_refuses_while_required() {
        let home = create_test_env();
        hostkit(&home)
            .args(["plugin", "remove", "system"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("system is required by docker"));

        let config = fs::read_to_string(home.path().join("plugins.toml")).unwrap();
        assert!(config.contains("name = \"system\""));
    }

    #[test]
    fn test_remove_deletes_installed_files() {
        let home = create_test_env();
        let plugin_dir = home.path().join("plugins").join("broken");
        fs::create_dir_all(&plugin_dir).unwrap();
        fs::write(plugin_dir.join("plugin.json"), "{\"name\": \"broken\"}").unwrap();

        hostkit(&home)
            .args(["plugin", "remove", "broken"])
            .assert()
            .success()
            .stdout(predicate::str::contains("✓ removed broken"));
        assert!(!plugin_dir.exists());

        hostkit(&home)
            .args(["plugin", "remove", "broken"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("plugin not found: broken"));
    }
}

mod run_commands {
    use super::*;

    #[test]
    fn test_run_unknown_plugin() {
        let home = create_test_env();
        hostkit(&home)
            .args(["run", "nope", "status", "--host", "local"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("plugin not found: nope"));
    }

    #[test]
    fn test_run_unknown_command() {
        let home = create_test_env();
        hostkit(&home)
            .args(["run", "system", "reboot", "--host", "local"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("plugin 'system' has no command 'reboot'"));
    }

    #[test]
    fn test_run_missing_required_argument() {
        let home = create_test_env();
        hostkit(&home)
            .args(["run", "system", "hostname", "--host", "local"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("missing required arguments: name"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_run_locally() {
        let home = create_test_env();
        hostkit(&home)
            .args(["run", "system", "info", "--host", "local"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Linux"));
    }
}
