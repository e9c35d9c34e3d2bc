// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Termination requests and OS signal handling.
//!
//! Process signals and explicit stop requests both end up setting a single
//! [`TermSignal`], which the control loop waits on between ticks.

use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use std::ffi::c_int;
use std::io;
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// Signals that ask the daemon to shut down.
pub const TERMINATION_SIGNALS: [c_int; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// A latched "terminate requested" flag with an interruptible wait.
#[derive(Debug, Default)]
pub struct TermSignal {
    requested: Mutex<bool>,
    cond: Condvar,
}

impl TermSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination and wake every waiter.
    pub fn request(&self) {
        *crate::controller::lock(&self.requested) = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *crate::controller::lock(&self.requested) = false;
    }

    pub fn is_requested(&self) -> bool {
        *crate::controller::lock(&self.requested)
    }

    /// Block for up to `timeout`. Returns `true` as soon as termination is
    /// requested, `false` if the timeout elapsed first.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = crate::controller::lock(&self.requested);
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |requested| !*requested)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Human-readable name of a signal number.
pub fn signal_name(signal: c_int) -> String {
    nix::sys::signal::Signal::try_from(signal)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| signal.to_string())
}

/// Listen for [`TERMINATION_SIGNALS`] on a background thread and call
/// `on_signal` for each one received. Close the returned handle to stop
/// listening.
pub fn spawn_listener<F>(on_signal: F) -> io::Result<Handle>
where
    F: Fn(c_int) + Send + 'static,
{
    let mut signals = Signals::new(TERMINATION_SIGNALS)?;
    let handle = signals.handle();

    thread::Builder::new()
        .name("signal-listener".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                log::info!("Received {}", signal_name(signal));
                on_signal(signal);
            }
            log::debug!("Signal listener stopped");
        })?;

    Ok(handle)
}
