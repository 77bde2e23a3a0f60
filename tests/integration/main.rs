//! Integration tests for microcdn

mod pipeline;

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn microcdn(config_dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("microcdn");
        cmd.env("MICROCDN_CONFIG", config_dir.path().join("config.toml"))
            .env("CI", "1")
            .env_remove("RUST_LOG");
        cmd
    }

    #[test]
    fn help_displays() {
        let dir = TempDir::new().unwrap();
        microcdn(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("asset server"))
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("warm"));
    }

    #[test]
    fn version_displays() {
        let dir = TempDir::new().unwrap();
        microcdn(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("microcdn"));
    }

    #[test]
    fn config_path_follows_env() {
        let dir = TempDir::new().unwrap();
        microcdn(&dir)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                dir.path().join("config.toml").display().to_string(),
            ));
    }

    #[test]
    fn config_show_defaults() {
        let dir = TempDir::new().unwrap();
        microcdn(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[cache]"))
            .stdout(predicate::str::contains("ttl_ms = 300000"));
    }

    #[test]
    fn config_set_then_show() {
        let dir = TempDir::new().unwrap();
        microcdn(&dir)
            .args(["config", "set", "cache.ttl_ms", "0"])
            .assert()
            .success();
        microcdn(&dir)
            .args(["config", "set", "headers.X-Powered-By", "microcdn"])
            .assert()
            .success();

        microcdn(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("ttl_ms = 0"))
            .stdout(predicate::str::contains("X-Powered-By"));
    }

    #[test]
    fn config_set_unknown_key_fails() {
        let dir = TempDir::new().unwrap();
        microcdn(&dir)
            .args(["config", "set", "cache.nope", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn invalid_config_reports_hint() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[cache\nttl_ms = ").unwrap();
        microcdn(&dir)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn warm_builds_assets() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("site");
        let dest = dir.path().join("cache");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("app.js"), "console.log('warm')").unwrap();

        microcdn(&dir)
            .args(["warm", "/app.js", "-s"])
            .arg(&source)
            .arg("-d")
            .arg(&dest)
            .assert()
            .success()
            .stdout(predicate::str::contains("Warmed 1 asset(s)"));

        assert!(dest.join("app.js").exists());
        assert!(dest.join("app.js.json").exists());
        assert!(dest.join("app.js.gzip").exists());
        assert!(!dest.join("app.js.wait").exists());
    }

    #[test]
    fn warm_reports_missing_assets() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("site");
        std::fs::create_dir_all(&source).unwrap();

        microcdn(&dir)
            .args(["warm", "/missing.css", "-s"])
            .arg(&source)
            .arg("-d")
            .arg(dir.path().join("cache"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("could not be built"));
    }

    #[test]
    fn purge_requires_confirmation() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("cache");
        std::fs::create_dir_all(&dest).unwrap();

        // Non-interactive without --yes keeps the default answer (no)
        microcdn(&dir)
            .args(["purge", "-d"])
            .arg(&dest)
            .assert()
            .success()
            .stdout(predicate::str::contains("Purge cancelled"));
        assert!(dest.exists());

        microcdn(&dir)
            .args(["purge", "--yes", "-d"])
            .arg(&dest)
            .assert()
            .success();
        assert!(!dest.exists());
    }
}
