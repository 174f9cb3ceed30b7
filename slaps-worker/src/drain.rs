//! Orderly-shutdown support: a sentinel file an operator can touch, plus a
//! SIGINT/SIGTERM flag so the loop exits with code 130 on interrupt,
//! matching `spec.md` §5.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_sig: i32) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Installs SIGINT/SIGTERM handlers. Safe to call once at process start.
pub fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, handle_signal as usize);
        libc::signal(libc::SIGTERM, handle_signal as usize);
    }
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

pub struct DrainSignal {
    path: PathBuf,
}

impl DrainSignal {
    pub fn new(slaps_dir: impl AsRef<Path>) -> Self {
        DrainSignal {
            path: slaps_dir.as_ref().join("drain"),
        }
    }

    pub fn is_set(&self) -> bool {
        self.path.exists() || interrupted()
    }
}
