use std::io::Write;

use assert_cmd::prelude::*;
use std::process::Command;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn check_config_accepts_a_well_formed_document() {
    let file = write_config(
        r#"
telegram:
  bot_token: "abc"
  chat_id: 12345
accounts:
  main:
    broker:
      name: paper
      config: {}
"#,
    );

    Command::cargo_bin("conduit-cli")
        .unwrap()
        .args(["check-config", "--config"])
        .arg(file.path())
        .assert()
        .success();
}

#[test]
fn check_config_rejects_a_document_missing_accounts() {
    let file = write_config(
        r#"
telegram:
  bot_token: "abc"
  chat_id: 1
"#,
    );

    Command::cargo_bin("conduit-cli")
        .unwrap()
        .args(["check-config", "--config"])
        .arg(file.path())
        .assert()
        .failure();
}

#[test]
fn check_config_rejects_a_missing_file() {
    Command::cargo_bin("conduit-cli")
        .unwrap()
        .args(["check-config", "--config", "/nonexistent/path/conduit.yaml"])
        .assert()
        .failure();
}
