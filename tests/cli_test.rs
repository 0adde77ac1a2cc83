// SPDX-License-Identifier: MIT
//! Smoke tests for the `broker` binary's CLI surface, run as a subprocess
//! since the root crate is bin-only and has no library surface to call into
//! directly (the real logic lives in `broker-core`/`broker-gateway`, which
//! carry their own unit and integration tests).

use std::process::Command;

fn broker_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_broker"))
}

#[test]
fn config_print_emits_yaml_with_defaults() {
    let output = broker_bin()
        .args(["config", "print"])
        .output()
        .expect("failed to run broker binary");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_yaml::Value = serde_yaml::from_str(&stdout).expect("output must be valid YAML");
    assert_eq!(parsed["http"]["bind"].as_str(), Some("127.0.0.1:8080"));
    assert_eq!(parsed["http"]["rateLimitPerUserPerMinute"].as_i64().or(parsed["http"]["rate_limit_per_user_per_minute"].as_i64()), Some(100));
}

#[test]
fn missing_subcommand_is_a_usage_error() {
    let output = broker_bin().output().expect("failed to run broker binary");
    assert!(!output.status.success());
}
