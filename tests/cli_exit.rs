use meshrelay::config::{ENV_ACK_URL, ENV_API_URL, ENV_HOSTNAME, ENV_HUB_SERVER, ENV_NODE_ID};
use std::path::Path;
use std::process::{Command, Output};

fn meshrelay(dir: &Path, args: &[&str]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_meshrelay"));
    cmd.current_dir(dir).args(args);
    for var in [ENV_HOSTNAME, ENV_HUB_SERVER, ENV_API_URL, ENV_NODE_ID, ENV_ACK_URL] {
        cmd.env_remove(var);
    }
    cmd.output().unwrap()
}

#[test]
fn init_refuses_to_overwrite_and_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meshrelay.toml");
    std::fs::write(&path, "# mine\n").unwrap();

    let out = meshrelay(dir.path(), &["init"]);
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine\n");

    let out = meshrelay(dir.path(), &["init", "--force"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(std::fs::read_to_string(&path).unwrap().contains("[radio]"));
}

#[test]
fn check_with_missing_settings_reports_and_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let out = meshrelay(dir.path(), &["check"]);
    assert_eq!(out.status.code(), Some(1));
    let summary: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(summary["status"], "invalid_config");
}
