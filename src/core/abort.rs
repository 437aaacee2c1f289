//! Cooperative cancellation.
//!
//! [`AbortSignal`] is a shared flag polled by the hasher before every data
//! stream. It is raised programmatically, by the interactive credential
//! prompt (Ctrl-C in raw mode), or by SIGINT/SIGTERM when OS hooks are
//! registered.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Thread-safe abort flag shared between the signal hooks, the prompt and
/// the hashing workers.
///
/// `Ordering::Relaxed` is enough: the flag is polled and carries no data.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a signal and hook SIGINT/SIGTERM to it.
    ///
    /// Registration is best-effort; failures are logged to stderr but not fatal.
    #[cfg(feature = "signals")]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        signal.register_os_signals();
        signal
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn raise(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[cfg(feature = "signals")]
    fn register_os_signals(&self) {
        use signal_hook::consts::{SIGINT, SIGTERM};

        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.flag)) {
            eprintln!("[LH-SIGNAL] failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.flag)) {
            eprintln!("[LH-SIGNAL] failed to register SIGINT: {e}");
        }
    }
}
