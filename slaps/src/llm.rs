//! Subprocess LLM invocation.
//!
//! Grounded on the teacher's `executor::docker_command`: wrap the child in
//! the `timeout` utility rather than hand-rolling a kill-after-deadline
//! thread, and capture stdout/stderr for the caller to route.

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use slaps_core::ports::{LlmOutcome, LlmRunner};

pub struct ProcessLlmRunner {
    binary: String,
}

impl ProcessLlmRunner {
    pub fn new(binary: impl Into<String>) -> Self {
        ProcessLlmRunner {
            binary: binary.into(),
        }
    }
}

impl LlmRunner for ProcessLlmRunner {
    fn run(&self, prompt: &str, timeout: Duration) -> Result<LlmOutcome> {
        let mut child = Command::new("timeout")
            .arg(timeout.as_secs().to_string())
            .arg(&self.binary)
            .arg("--print")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning LLM binary {}", self.binary))?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(prompt.as_bytes());
        }

        let output = child.wait_with_output()?;
        // `timeout` reports 124 on deadline expiry; 127 if the binary is
        // missing. Both are indistinguishable from a failed task to the
        // caller, matching spec.md's error-handling design.
        Ok(LlmOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
