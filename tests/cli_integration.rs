use std::process::Command;

fn questcast() -> Command {
    Command::new(env!("CARGO_BIN_EXE_questcast"))
}

#[test]
fn test_help_exits_zero() {
    let output = questcast().arg("--help").output().expect("failed to run");
    assert!(output.status.success(), "questcast --help should exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("Quest headset mirroring"),
        "help should contain description"
    );
}

#[test]
fn test_version_exits_zero() {
    let output = questcast()
        .arg("--version")
        .output()
        .expect("failed to run");
    assert!(
        output.status.success(),
        "questcast --version should exit 0"
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("questcast"),
        "version output should contain crate name"
    );
}

#[test]
fn test_subcommands_are_listed_in_help() {
    let output = questcast().arg("--help").output().expect("failed to run");
    let stdout = String::from_utf8_lossy(&output.stdout);
    for subcommand in ["devices", "start", "diagnose", "dump", "sensor", "reset-adb", "init"] {
        assert!(
            stdout.contains(subcommand),
            "help should list the '{}' subcommand",
            subcommand
        );
    }
}

#[test]
fn test_missing_subcommand_fails_with_usage() {
    let output = questcast().output().expect("failed to run");
    assert!(!output.status.success(), "bare invocation should exit nonzero");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "should print usage");
    assert!(!stderr.contains("panicked"), "should not panic");
}

#[test]
fn test_invalid_eye_flag_is_rejected() {
    // An unknown flag value must be a clean argument error, not a panic
    // deep inside the session.
    let output = questcast()
        .args(["start", "--eye", "middle", "--serial", "NOSUCHDEVICE"])
        .output()
        .expect("failed to run");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("panicked"), "should not panic on bad eye value");
}

#[test]
fn test_start_help_documents_flags() {
    let output = questcast()
        .args(["start", "--help"])
        .output()
        .expect("failed to run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--bitrate", "--size", "--eye", "--mode", "--port", "--display"] {
        assert!(stdout.contains(flag), "start --help should document {}", flag);
    }
}
