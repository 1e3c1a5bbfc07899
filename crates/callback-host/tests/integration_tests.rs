//! Integration tests for the callback-host binary.
//!
//! These tests spawn `callback-host serve`, deliver results to it both through
//! the library and through `callback-host send`, and check what the host
//! prints.

use remote_callback::{Bundle, CallbackProxy, DeliveryPolicy, RemoteBinder, RemoteCallback};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::ChildStdout;

fn binary_path() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_callback-host") {
        return Ok(PathBuf::from(path));
    }
    let current_exe = std::env::current_exe()
        .map_err(|e| format!("failed to resolve current_exe for fallback: {e}"))?;
    let target_debug_dir = current_exe
        .parent()
        .and_then(|p| p.parent())
        .ok_or_else(|| "failed to resolve target/debug directory for fallback".to_string())?;

    let mut fallback = target_debug_dir.join("callback-host");
    if cfg!(target_os = "windows") {
        fallback.set_extension("exe");
    }
    if !fallback.exists() {
        return Err(format!(
            "CARGO_BIN_EXE_callback-host not set and fallback binary not found at {}",
            fallback.display()
        ));
    }
    Ok(fallback)
}

struct HostHandle {
    child: tokio::process::Child,
    port: u16,
    lines: Lines<BufReader<ChildStdout>>,
}

impl HostHandle {
    /// Next line with `prefix`, skipping anything else.
    async fn next_with_prefix(&mut self, prefix: &str) -> Result<String, String> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(250), self.lines.next_line()).await {
                Ok(Ok(Some(line))) => {
                    if let Some(value) = line.strip_prefix(prefix) {
                        return Ok(value.trim().to_string());
                    }
                }
                Ok(Ok(None)) => return Err("callback-host closed stdout".to_string()),
                Ok(Err(err)) => return Err(format!("failed to read callback-host stdout: {err}")),
                Err(_) => continue,
            }
        }
        Err(format!("no {prefix} line within timeout"))
    }

    async fn next_result(&mut self) -> Value {
        let raw = self.next_with_prefix("CALLBACK_RESULT=").await.unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    async fn stop(mut self) {
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Start `callback-host serve` and wait for its port.
async fn start_host() -> Result<HostHandle, String> {
    let binary = binary_path()?;
    let mut child = tokio::process::Command::new(&binary)
        .arg("serve")
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to spawn callback-host: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut handle = HostHandle {
        child,
        port: 0,
        lines: BufReader::new(stdout).lines(),
    };

    let value = handle.next_with_prefix("CALLBACK_PORT=").await?;
    handle.port = value
        .parse::<u16>()
        .map_err(|e| format!("invalid CALLBACK_PORT value '{value}': {e}"))?;
    Ok(handle)
}

/// Run `callback-host send` with extra arguments.
async fn run_send(args: &[&str]) -> std::process::Output {
    let binary = binary_path().unwrap();
    tokio::time::timeout(
        Duration::from_secs(20),
        tokio::process::Command::new(&binary)
            .arg("send")
            .args(args)
            .stderr(Stdio::null())
            .output(),
    )
    .await
    .expect("callback-host send timed out")
    .expect("failed to run callback-host send")
}

#[tokio::test]
async fn test_library_delivery_to_host() {
    let mut host = start_host().await.unwrap();

    let remote = Arc::new(
        RemoteBinder::connect(host.addr().parse().unwrap())
            .await
            .unwrap(),
    );
    let proxy = CallbackProxy::new(remote).with_policy(DeliveryPolicy::Acknowledged);

    proxy
        .send_result(Some(
            Bundle::new()
                .with("path", "/sdcard/Download/a.zip")
                .with("success", true),
        ))
        .await
        .unwrap();
    assert_eq!(
        host.next_result().await,
        json!({"path": "/sdcard/Download/a.zip", "success": true})
    );

    proxy.send_result(None).await.unwrap();
    assert_eq!(host.next_result().await, Value::Null);

    host.stop().await;
}

#[tokio::test]
async fn test_send_command_acknowledged() {
    let mut host = start_host().await.unwrap();

    let output = run_send(&[
        "--addr",
        &host.addr(),
        "--json",
        r#"{"count": 7, "nested": {"name": "b.txt"}}"#,
        "--ack",
    ])
    .await;
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("CALLBACK_ACK=ok"));

    assert_eq!(
        host.next_result().await,
        json!({"count": 7, "nested": {"name": "b.txt"}})
    );

    host.stop().await;
}

#[tokio::test]
async fn test_send_command_oneway_null_result() {
    let mut host = start_host().await.unwrap();

    let output = run_send(&["--addr", &host.addr()]).await;
    assert!(output.status.success());

    assert_eq!(host.next_result().await, Value::Null);

    host.stop().await;
}

#[tokio::test]
async fn test_send_command_rejects_bad_json() {
    let host = start_host().await.unwrap();

    let output = run_send(&["--addr", &host.addr(), "--json", "[1, 2]"]).await;
    assert!(!output.status.success());

    host.stop().await;
}

#[tokio::test]
async fn test_send_command_without_host_fails() {
    let output = run_send(&["--addr", "127.0.0.1:1", "--ack"]).await;
    assert!(!output.status.success());
}
