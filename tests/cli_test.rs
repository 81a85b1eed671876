use std::net::TcpListener;
use std::process::{Command, Output};

const BIN: &str = env!("CARGO_BIN_EXE_hello-timeout");

fn combined(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

#[test]
fn test_bind_failure_is_reported_once() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port().to_string();

    let output = Command::new(BIN)
        .args(["127.0.0.1", port.as_str(), "1"])
        .env("RUST_LOG", "info")
        .output()
        .unwrap();
    assert!(!output.status.success());

    let text = combined(&output);
    let cause = format!("Listening on 127.0.0.1:{port} failed");
    assert_eq!(text.matches(&cause).count(), 1, "{text}");
    assert!(!text.contains("Bind("), "{text}");
}

#[test]
fn test_config_error_is_reported_once() {
    let output = Command::new(BIN)
        .args(["127.0.0.1", "0", "1", "-c", "/nonexistent/hello.toml"])
        .output()
        .unwrap();
    assert!(!output.status.success());

    let text = combined(&output);
    let cause = "Failed to read config file";
    assert_eq!(text.matches(cause).count(), 1, "{text}");
    assert!(!text.contains("FileRead("), "{text}");
}

#[test]
fn test_huge_concurrency_width_is_rejected() {
    let output = Command::new(BIN)
        .args(["127.0.0.1", "0", "1000000"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let text = combined(&output);
    assert!(text.contains("concurrency width must be at most 1024"), "{text}");
}
