//! Integration tests for the festa binary.
//! Uses assert_cmd to run the binary, a real temp config, and an in-process
//! WebSocket server. No mocks.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write as _;
use std::net::TcpListener as StdTcpListener;
use std::path::PathBuf;

/// Pick a free port by binding to :0 and extracting the assigned port.
fn free_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Write a YAML config pointing at `port`, keeping storage inside `dir`.
fn write_config(dir: &tempfile::TempDir, port: u16, max_attempts: u32) -> PathBuf {
    let path = dir.path().join("config.yaml");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(
        f,
        "server:\n  url: http://127.0.0.1:{}\n  ws_path: /ws/chat\nconnection:\n  max_reconnect_attempts: {}\n  reconnect_delay_ms: 50\nstorage:\n  path: {}",
        port,
        max_attempts,
        dir.path().join("storage.json").display()
    )
    .unwrap();
    path
}

/// Spawn a WebSocket server that accepts one connection, waits for one chat
/// request and answers it with a reply carrying two sources.
fn spawn_test_server(port: u16) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            use futures_util::{SinkExt, StreamExt};
            use tokio_tungstenite::tungstenite::Message;

            let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
                .await
                .unwrap();

            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let (mut write, mut read) = ws.split();

            let _ = read.next().await;
            write
                .send(Message::Text(
                    r#"{"type":"message","content":"Test answer.","sources":["/papers/a.pdf","/papers/b.pdf"],"model":"deepseek-chat"}"#.into(),
                ))
                .await
                .unwrap();

            // Small delay so the client can read before we drop.
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        });
    })
}

#[test]
fn question_argument_prints_answer_and_sources() {
    let port = free_port();
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, port, 2);

    let _server = spawn_test_server(port);
    std::thread::sleep(std::time::Duration::from_millis(100));

    let mut cmd = Command::from(cargo_bin_cmd!("festa"));
    cmd.arg("--config")
        .arg(&config_path)
        .arg("What is the answer?");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Test answer."))
        .stdout(predicate::str::contains("/papers/a.pdf"))
        .stdout(predicate::str::contains("/papers/b.pdf"));

    let stored = std::fs::read_to_string(dir.path().join("storage.json")).unwrap();
    assert!(predicate::str::contains("Test answer.").eval(&stored));
    assert!(predicate::str::contains("clientId").eval(&stored));
}

#[test]
fn stdin_lines_with_config_env_var() {
    let port = free_port();
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, port, 2);

    let _server = spawn_test_server(port);
    std::thread::sleep(std::time::Duration::from_millis(100));

    let mut cmd = Command::from(cargo_bin_cmd!("festa"));
    cmd.env("FESTA_CONFIG", &config_path)
        .write_stdin("What is the answer?\n");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Test answer."));
}

#[test]
fn server_down_shows_error() {
    let port = free_port();
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, port, 0);

    let mut cmd = Command::from(cargo_bin_cmd!("festa"));
    cmd.arg("--config").arg(&config_path).arg("hello");

    cmd.assert()
        .failure()
        .stderr(predicate::str::is_match("(?i)(could not reach|connection failed)").unwrap());
}

#[test]
fn missing_explicit_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::from(cargo_bin_cmd!("festa"));
    cmd.arg("--config")
        .arg(dir.path().join("absent.yaml"))
        .arg("hello");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn threads_command_lists_every_time() {
    let port = free_port();
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, port, 0);

    let mut cmd = Command::from(cargo_bin_cmd!("festa"));
    cmd.arg("--config")
        .arg(&config_path)
        .write_stdin("/threads\n/threads\n");

    let listed_twice =
        predicate::function(|err: &str| err.matches("New conversation").count() >= 3);
    cmd.assert().stderr(listed_twice);
}

#[test]
fn one_shot_with_retries_left_reports_connection_failure() {
    let port = free_port();
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, port, 2);

    let mut cmd = Command::from(cargo_bin_cmd!("festa"));
    cmd.arg("--config").arg(&config_path).arg("hello");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("connection failed"))
        .stderr(predicate::str::contains("Reconnecting").not())
        .stdout(predicate::str::is_empty());
}
