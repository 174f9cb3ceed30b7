//! Binary smoke tests for the `slaps` coordinator CLI.
//!
//! These run the actual compiled binary so a change to `clap` wiring, or to
//! `main.rs`'s exit-code mapping, shows up here rather than only in a unit
//! test of some inner function. Deliberately narrow: the coordinator's one
//! job is sequencing waves, not offering subcommands.

use assert_cmd::Command;
use predicates::prelude::*;

#[allow(deprecated)]
fn slaps() -> Command {
    Command::cargo_bin("slaps").unwrap()
}

#[test]
fn binary_exists() {
    slaps();
}

#[test]
fn version_flag() {
    slaps()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("slaps "));
}

#[test]
fn help_flag() {
    slaps()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("waveStart"));
}

#[test]
fn unknown_flag_fails() {
    slaps().arg("--not-a-real-flag").assert().failure();
}
