//! Coordinator CLI surface. Deliberately narrow: `spec.md`'s Non-goals
//! exclude status/log-viewer CLIs, so this binary does exactly one thing —
//! run the waves — and nothing else.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "slaps",
    version,
    about = "Sequences issue waves through the watcher and Quality Guardian"
)]
pub struct Cli {
    /// First wave to run. Defaults to 1, or the config file's `wave` entry.
    #[arg(long = "waveStart")]
    pub wave_start: Option<u32>,

    /// Skip the pre-wave toolchain preflight check.
    #[arg(long = "no-commit-preflight")]
    pub no_commit_preflight: bool,
}
