//! CLI validation contract: failures exit 1 with an `Error:` prefix on
//! stderr.

use std::process::Command;

fn zbor() -> Command {
    Command::new(env!("CARGO_BIN_EXE_zbor"))
}

fn stderr_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn missing_input_flag_fails_with_error_prefix() {
    let output = zbor().output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr_of(&output).starts_with("Error:"),
        "stderr: {}",
        stderr_of(&output)
    );
}

#[test]
fn invalid_format_value_fails_with_error_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let audio = dir.path().join("a.wav");
    std::fs::write(&audio, b"x").unwrap();

    let output = zbor()
        .args(["-i"])
        .arg(&audio)
        .args(["--format", "yaml"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).starts_with("Error:"));
}

#[test]
fn missing_input_file_fails_with_error_prefix() {
    let output = zbor()
        .args(["-i", "/no/such/audio.wav"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert!(stderr.starts_with("Error:"), "stderr: {stderr}");
    assert!(stderr.contains("input file not found"));
}

#[test]
fn missing_model_directory_fails_with_error_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let audio = dir.path().join("a.wav");
    std::fs::write(&audio, b"x").unwrap();
    let empty_model_dir = dir.path().join("models");
    std::fs::create_dir_all(&empty_model_dir).unwrap();

    let output = zbor()
        .args(["-i"])
        .arg(&audio)
        .args(["-m"])
        .arg(&empty_model_dir)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert!(stderr.starts_with("Error:"), "stderr: {stderr}");
    assert!(stderr.contains("model not found"));
}

#[test]
fn help_exits_zero() {
    let output = zbor().arg("--help").output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--format"));
    assert!(stdout.contains("--model"));
}
