//! Signal handling: SIGTERM/SIGINT request shutdown, SIGHUP requests a
//! config/state reload. Grounded on the same pattern the cancellation
//! `Context` itself was adapted from — a pair of process-wide atomics set
//! from a raw handler, polled by a watcher loop, rather than doing
//! anything non-async-signal-safe inside the handler itself.

use std::sync::atomic::{AtomicBool, Ordering::Relaxed};

use nix::sys::signal::{signal, SigHandler, Signal};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static RELOAD_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Installs the process-wide handlers. Safe to call more than once; each
/// call just re-registers the same three signals.
pub fn install() {
    unsafe {
        signal(Signal::SIGTERM, SigHandler::Handler(handle_shutdown)).ok();
        signal(Signal::SIGINT, SigHandler::Handler(handle_shutdown)).ok();
        signal(Signal::SIGHUP, SigHandler::Handler(handle_reload)).ok();
    }
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Relaxed)
}

pub fn reload_requested() -> bool {
    RELOAD_REQUESTED.load(Relaxed)
}

pub fn clear_reload() {
    RELOAD_REQUESTED.store(false, Relaxed);
}

extern "C" fn handle_shutdown(_: nix::libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Relaxed);
}

extern "C" fn handle_reload(_: nix::libc::c_int) {
    RELOAD_REQUESTED.store(true, Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn sigterm_sets_the_shutdown_flag() {
        SHUTDOWN_REQUESTED.store(false, Relaxed);
        install();
        nix::sys::signal::raise(Signal::SIGTERM).unwrap();
        assert!(shutdown_requested());
        SHUTDOWN_REQUESTED.store(false, Relaxed);
    }

    #[test]
    #[serial]
    fn sighup_sets_and_clears_the_reload_flag() {
        RELOAD_REQUESTED.store(false, Relaxed);
        install();
        nix::sys::signal::raise(Signal::SIGHUP).unwrap();
        assert!(reload_requested());
        clear_reload();
        assert!(!reload_requested());
    }
}
