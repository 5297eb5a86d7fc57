#![cfg(feature = "cli")]

use std::io::Write;
use std::process::{Command, Output, Stdio};

fn slotwire(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_slotwire"))
        .args(["--log-level", "off"])
        .args(args)
        .output()
        .expect("slotwire should run")
}

fn stdout_json_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be json"))
        .collect()
}

#[test]
fn decode_hex_prints_one_json_line_per_frame() {
    // REQUEST m=1 id=1 "hi", then SEND|PAUSE m=1 id=3 without payload
    let output = slotwire(&["--format", "json", "decode", "--hex", "01 01 02 02 6869 01 03 41"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let frames = stdout_json_lines(&output);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["flags"], "REQUEST");
    assert_eq!(frames[0]["payload"], "6869");
    assert_eq!(frames[1]["flags"], "SEND|PAUSE");
    assert_eq!(frames[1]["offset"], 6);
    assert!(frames[1]["payload"].is_null());
}

#[test]
fn decode_reads_stdin() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_slotwire"))
        .args(["--log-level", "off", "--format", "json", "decode", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("decode should start");
    child
        .stdin
        .take()
        .expect("stdin should be piped")
        .write_all(&[0x00, 0x00, 0x01, 0x01, 0x07])
        .expect("stdin should accept bytes");
    let output = child.wait_with_output().expect("decode should finish");

    assert!(output.status.success());
    let frames = stdout_json_lines(&output);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["flags"], "SEND");
}

#[test]
fn truncated_capture_exits_with_data_invalid() {
    let output = slotwire(&["decode", "--hex", "010102056869"]);
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error:"));
}

#[test]
fn bad_hex_is_a_usage_error() {
    let output = slotwire(&["decode", "--hex", "0"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn value_encode_then_decode() {
    let encoded = slotwire(&["value", "encode", r#"{"n":300,"s":"x"}"#]);
    assert!(encoded.status.success());
    let hex = String::from_utf8_lossy(&encoded.stdout).trim().to_string();

    let decoded = slotwire(&["value", "decode", &hex]);
    assert!(decoded.status.success());
    let json: serde_json::Value =
        serde_json::from_slice(&decoded.stdout).expect("decoded value should be json");
    assert_eq!(json, serde_json::json!({"n": 300, "s": "x"}));
}

#[test]
fn selftest_reports_every_check() {
    let output = slotwire(&["--format", "json", "selftest", "--magic", "0x5a"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stdout));

    let report = &stdout_json_lines(&output)[0];
    assert_eq!(report["passed"], true);
    let names: Vec<&str> = report["checks"]
        .as_array()
        .expect("checks should be an array")
        .iter()
        .filter_map(|check| check["name"].as_str())
        .collect();
    assert_eq!(
        names,
        ["request", "concurrent", "cork", "one-way", "stream", "destroy"]
    );
}

#[test]
fn version_prints_package_version() {
    let output = slotwire(&["version"]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("slotwire {}", env!("CARGO_PKG_VERSION"))
    );
}
