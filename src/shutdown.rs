use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

/// Set by the first Ctrl+C. Submission and waiting stop; remote tasks are
/// left running.
#[derive(Clone, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Relaxed);
    }
}

/// First Ctrl+C stops the run; a second one quits immediately.
pub fn install_handler(flag: &ShutdownFlag) {
    let requested = flag.requested.clone();
    let result = ctrlc::set_handler(move || {
        if on_ctrl_c(&requested, &mut io::stderr()) {
            std::process::exit(130);
        }
    });
    if let Err(e) = result {
        warn!(error = %e, "Could not install Ctrl+C handler");
    }
}

/// Records one Ctrl+C and tells the user what happens next. Returns true
/// when this was the second press.
fn on_ctrl_c(requested: &AtomicBool, out: &mut impl Write) -> bool {
    let again = requested.swap(true, Ordering::Relaxed);
    let notice = if again {
        "Force shutdown."
    } else {
        "Stopping. Press Ctrl+C again to quit immediately."
    };
    let _ = writeln!(out, "\n{notice}");
    again
}
