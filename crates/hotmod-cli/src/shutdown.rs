//! Interrupt handling for long-running commands
//!
//! SIGINT and SIGTERM only raise a flag. Loops poll it and return normally, so
//! `main` unwinds and its cleanup guard purges temporary paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static REQUESTED: AtomicBool = AtomicBool::new(false);

const POLL: Duration = Duration::from_millis(50);

/// Route SIGINT and SIGTERM to the shutdown flag
pub fn install() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

        let action = SigAction::new(
            SigHandler::Handler(on_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        for signal in [Signal::SIGINT, Signal::SIGTERM] {
            // SAFETY: the handler only stores to an atomic.
            unsafe { sigaction(signal, &action) }?;
            tracing::debug!("Installed {:?} handler", signal);
        }
    }
    Ok(())
}

#[cfg(unix)]
extern "C" fn on_signal(_: std::ffi::c_int) {
    REQUESTED.store(true, Ordering::SeqCst);
}

pub fn requested() -> bool {
    REQUESTED.load(Ordering::SeqCst)
}

/// Sleep for `duration` unless shutdown is requested first.
///
/// Returns `true` when interrupted.
pub fn sleep(duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if requested() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep(POLL.min(deadline - now));
    }
}
