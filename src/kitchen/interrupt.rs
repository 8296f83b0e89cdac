// src/kitchen/interrupt.rs

//! Ctrl-C as a kitchen cancel
//!
//! The first SIGINT sets a shared flag that a [`super::Kitchen`] polls, so
//! running builds finish and nothing new starts. A second SIGINT gets the
//! default action. Build steps run in their own process group and never
//! see the terminal's SIGINT.

use crate::error::{Error, Result};
use nix::libc::c_int;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

static INTERRUPTED: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn on_interrupt(_: c_int) {
    if let Some(flag) = INTERRUPTED.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

/// Flag set by the next SIGINT
///
/// Installs the handler on first use; later calls return the same flag.
pub fn cancel_on_interrupt() -> Result<Arc<AtomicBool>> {
    if let Some(flag) = INTERRUPTED.get() {
        return Ok(Arc::clone(flag));
    }
    let flag = INTERRUPTED.get_or_init(|| Arc::new(AtomicBool::new(false)));

    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::SA_RESTART | SaFlags::SA_RESETHAND,
        SigSet::empty(),
    );
    // SAFETY: the handler only loads an initialized OnceLock and stores to an atomic
    unsafe { signal::sigaction(Signal::SIGINT, &action) }
        .map_err(|e| Error::IoError(format!("failed to install SIGINT handler: {}", e)))?;
    Ok(Arc::clone(flag))
}
