//! Concrete preflight / Quality Guardian / push collaborators.
//!
//! These shell out to the tools the teacher's `executor.rs` already wraps
//! (`docker`, `git`) generalized to SLAPS's narrower needs: a toolchain
//! health check, a test-and-fix pass, and a push.

use std::process::Command;

use anyhow::Result;
use slaps_core::coordinator::{Preflight, Pusher, QualityGuardian};

pub struct CommandPreflight {
    pub check_cmd: Option<String>,
}

impl Preflight for CommandPreflight {
    fn check(&self) -> Result<bool> {
        let Some(cmd) = &self.check_cmd else {
            return Ok(true);
        };
        let status = Command::new("sh").arg("-c").arg(cmd).status()?;
        Ok(status.success())
    }
}

pub struct CommandGuardian {
    pub cmd: String,
}

impl QualityGuardian for CommandGuardian {
    fn run(&self, wave: u32) -> Result<i32> {
        let status = Command::new("sh")
            .arg("-c")
            .env("SLAPS_WAVE", wave.to_string())
            .arg(&self.cmd)
            .status()?;
        Ok(status.code().unwrap_or(1))
    }
}

pub struct GitPusher {
    pub enabled: bool,
}

impl Pusher for GitPusher {
    fn push(&self) -> Result<bool> {
        if !self.enabled {
            return Ok(true);
        }
        let status = Command::new("git").arg("push").status()?;
        Ok(status.success())
    }
}
