use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "slaps-worker",
    version,
    about = "Standalone worker pool: claims queue tasks and invokes the LLM runner"
)]
pub struct Cli {
    /// Wave to pull tasks from. Defaults to the config file's `wave` entry.
    #[arg(long)]
    pub wave: Option<u32>,

    /// Number of worker threads. Defaults to the configured worker count.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Run one claim-execute-route cycle per worker, then exit.
    #[arg(long)]
    pub once: bool,
}
