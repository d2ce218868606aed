//! Integration tests for the splitwork binary.
//!
//! These run the built binary with piped stdin/stdout and check the merged
//! output and the exit code.

use std::io::Write;
use std::process::{Command, Output, Stdio};

fn splitwork(args: &[&str], stdin: &[u8]) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_splitwork"))
        .args(args)
        .env_remove("SPLITWORK_WORKERS")
        .env_remove("SPLITWORK_CHUNK_SIZE")
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to start splitwork");

    let mut input = child.stdin.take().expect("stdin is piped");
    input.write_all(stdin).expect("failed to write stdin");
    drop(input);

    child.wait_with_output().expect("failed to wait for splitwork")
}

#[test]
fn uppercases_in_order() {
    let input: String = (0..200).map(|i| format!("row {i}\n")).collect();
    let out = splitwork(&["-j", "4", "tr", "a-z", "A-Z"], input.as_bytes());
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8(out.stdout).unwrap(), input.to_uppercase());
}

#[test]
fn cat_preserves_unterminated_tail() {
    let out = splitwork(&["--workers=3", "--", "cat"], b"a\nb\nc\nd");
    assert!(out.status.success());
    assert_eq!(out.stdout, b"a\nb\nc\nd");
}

#[test]
fn empty_input_gives_empty_output() {
    let out = splitwork(&["-j2", "cat"], b"");
    assert!(out.status.success());
    assert!(out.stdout.is_empty());
}

#[test]
fn worker_failure_sets_exit_code() {
    let out = splitwork(&["-j", "2", "sh", "-c", "cat >/dev/null; exit 3"], b"x\ny\n");
    assert_eq!(out.status.code(), Some(1), "transform failures exit 1");
}

#[test]
fn usage_errors_exit_2() {
    for args in [&[][..], &["-j", "0", "cat"][..], &["--bogus", "cat"][..]] {
        let out = splitwork(args, b"");
        assert_eq!(out.status.code(), Some(2), "args {args:?}");
        assert!(!out.stderr.is_empty());
    }
}

#[test]
fn help_goes_to_stdout() {
    let out = splitwork(&["--help"], b"");
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("Usage:"));
}

#[test]
fn stages_do_not_inherit_stdio() {
    // Each command reports what its worker holds as fds 0 and 1.
    let script = "readlink /proc/$PPID/fd/0 /proc/$PPID/fd/1 >&2; cat";
    let out = splitwork(&["-j", "2", "sh", "-c", script], b"a\nb\nc\n");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(out.stdout, b"a\nb\nc\n");

    let stderr = String::from_utf8(out.stderr).unwrap();
    let links: Vec<&str> = stderr.lines().filter(|l| l.starts_with('/')).collect();
    assert_eq!(links, vec!["/dev/null"; 4], "stderr: {stderr}");
}

#[test]
fn worker_count_from_environment() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_splitwork"))
        .args(["cat"])
        .env("SPLITWORK_WORKERS", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to start splitwork");
    let status = child.wait().expect("failed to wait for splitwork");
    assert_eq!(status.code(), Some(64), "invalid environment is a usage error");
}
