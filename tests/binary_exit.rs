//! Binary Exit Tests
//!
//! The `cacheprog` process exits on a fatal session error even while the Go
//! side still holds stdin open.

use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use cacheprog::protocol::bytes::encode_payload;

// =============================================================================
// Test 1: fatal storage error with stdin still open
// =============================================================================

#[test]
fn test_exits_after_fatal_error_while_stdin_open() {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache_dir = temp_dir.path().join("cache");

    let mut child = Command::new(env!("CARGO_BIN_EXE_cacheprog"))
        .args(["local", "--cache-dir"])
        .arg(&cache_dir)
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut stdout = BufReader::new(child.stdout.take().unwrap());
    let mut handshake = String::new();
    stdout.read_line(&mut handshake).unwrap();
    assert!(handshake.contains("KnownCommands"));

    // Objects can no longer be written
    let object_dir = cache_dir.join("object");
    std::fs::remove_dir_all(&object_dir).unwrap();
    std::fs::write(&object_dir, b"not a directory").unwrap();

    let mut stdin = child.stdin.take().unwrap();
    writeln!(
        stdin,
        r#"{{"ID":1,"Command":"put","ActionID":"{}","OutputID":"{}","BodySize":5}}"#,
        encode_payload(b"a1"),
        encode_payload(b"o1")
    )
    .unwrap();
    writeln!(stdin, "\"{}\"", encode_payload(b"hello")).unwrap();
    stdin.flush().unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() > deadline {
            child.kill().unwrap();
            panic!("cacheprog did not exit after a fatal error");
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    assert!(!status.success());
    let mut reply = String::new();
    stdout.read_line(&mut reply).unwrap();
    assert!(reply.contains(r#""ID":1"#) && reply.contains("Err"));
    drop(stdin);
}
