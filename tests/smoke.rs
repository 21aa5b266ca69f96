//! Smoke tests -- verify the binary runs and the subcommands are wired up.

use assert_cmd::Command;

fn pixelbench() -> Command {
    let mut cmd = Command::cargo_bin("pixelbench").unwrap();
    cmd.env_remove("PIXELBENCH_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    pixelbench()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Exact black/white pixel counting"));
}

#[test]
fn test_cli_version() {
    pixelbench()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("pixelbench"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["bench", "classify", "devices", "generate"] {
        pixelbench().args([sub, "--help"]).assert().success();
    }
}

#[test]
fn test_classify_extremes() {
    pixelbench()
        .args(["classify", "0", "0", "0"])
        .assert()
        .success()
        .stdout(predicates::str::contains("luminance 0 -> black"));
    pixelbench()
        .args(["classify", "255", "255", "255"])
        .assert()
        .success()
        .stdout(predicates::str::contains("luminance 255 -> white"));
    pixelbench()
        .args(["classify", "1", "1", "1"])
        .assert()
        .success()
        .stdout(predicates::str::contains("-> other"));
}

#[test]
fn test_classify_rejects_out_of_range_channel() {
    pixelbench().args(["classify", "256", "0", "0"]).assert().failure();
}

#[test]
fn test_generate_then_bench_emulated() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("board.png");

    pixelbench()
        .current_dir(dir.path())
        .args(["generate", image.to_str().unwrap(), "--width", "64", "--height", "48"])
        .assert()
        .success();
    assert!(image.exists());

    pixelbench()
        .current_dir(dir.path())
        .args(["bench", image.to_str().unwrap(), "--device", "emulated"])
        .assert()
        .success()
        .stdout(predicates::str::contains("paths agree (black=1536 white=1536)"))
        .stdout(predicates::str::contains("[verified]"));
}

#[test]
fn test_bench_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("white.png");
    pixelbench()
        .current_dir(dir.path())
        .args(["generate", image.to_str().unwrap(), "--pattern", "solid-white"])
        .args(["--width", "10", "--height", "10"])
        .assert()
        .success();

    let output = pixelbench()
        .current_dir(dir.path())
        .args(["bench", image.to_str().unwrap(), "--device", "emulated", "--json"])
        .args(["--device-runs", "1", "--host-runs", "3", "--strategy", "fold"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["agreement"]["status"], "agree");
    assert_eq!(value["agreement"]["counts"]["white"], 100);
    assert_eq!(value["device"]["runs"].as_array().unwrap().len(), 1);
    assert_eq!(value["host"]["runs"].as_array().unwrap().len(), 3);
}

#[test]
fn test_bench_host_only_via_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("black.png");
    let config = dir.path().join("bench.toml");
    std::fs::write(&config, "[device]\nbackend = \"off\"\n\n[bench]\nhost_runs = 1\n").unwrap();

    pixelbench()
        .current_dir(dir.path())
        .args(["generate", image.to_str().unwrap(), "--pattern", "solid-black"])
        .args(["--width", "8", "--height", "8"])
        .assert()
        .success();

    pixelbench()
        .current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["bench", image.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicates::str::contains("device path: skipped"))
        .stdout(predicates::str::contains("run 1: black=64 white=0"));
}

#[test]
fn test_bench_missing_image_fails() {
    let dir = tempfile::tempdir().unwrap();
    pixelbench()
        .current_dir(dir.path())
        .args(["bench", "does-not-exist.png", "--device", "off"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("failed to load image"));
}

#[test]
fn test_invalid_workgroup_size_rejected() {
    let dir = tempfile::tempdir().unwrap();
    pixelbench()
        .current_dir(dir.path())
        .args(["bench", "any.png", "--workgroup-size", "0"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("workgroup_size"));
}

#[test]
fn test_devices_lists_or_explains() {
    pixelbench()
        .args(["devices", "--json"])
        .assert()
        .success()
        .stdout(predicates::str::starts_with("["));
}

#[test]
fn test_unreadable_env_config_warns_after_logging_starts() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.toml");
    pixelbench()
        .current_dir(dir.path())
        .env("PIXELBENCH_CONFIG", &missing)
        .args(["classify", "0", "0", "0"])
        .assert()
        .success()
        .stdout(predicates::str::contains("-> black"))
        .stderr(predicates::str::contains("could not be loaded"))
        .stderr(predicates::str::contains("missing.toml"));
}

#[test]
fn test_broken_local_config_warns_and_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("pixelbench.toml"), "[bench\n").unwrap();
    pixelbench()
        .current_dir(dir.path())
        .args(["classify", "255", "255", "255"])
        .assert()
        .success()
        .stderr(predicates::str::contains("could not be loaded"));
}

fn host_off_session(dir: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let image = dir.join("black.png");
    let config = dir.join("empty-session.toml");
    std::fs::write(&config, "[device]\nbackend = \"off\"\n\n[bench]\nhost_runs = 0\n").unwrap();
    pixelbench()
        .current_dir(dir)
        .args(["generate", image.to_str().unwrap(), "--pattern", "solid-black"])
        .args(["--width", "4", "--height", "4"])
        .assert()
        .success();
    (image, config)
}

#[test]
fn test_empty_session_config_does_not_block_other_commands() {
    let dir = tempfile::tempdir().unwrap();
    let (_, config) = host_off_session(dir.path());
    pixelbench()
        .current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["classify", "0", "0", "0"])
        .assert()
        .success()
        .stdout(predicates::str::contains("luminance 0 -> black"));
}

#[test]
fn test_cli_override_repairs_empty_session_config() {
    let dir = tempfile::tempdir().unwrap();
    let (image, config) = host_off_session(dir.path());

    pixelbench()
        .current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["bench", image.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicates::str::contains("nothing to run"));

    pixelbench()
        .current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["bench", image.to_str().unwrap(), "--host-runs", "1"])
        .assert()
        .success()
        .stdout(predicates::str::contains("run 1: black=16 white=0"));
}
