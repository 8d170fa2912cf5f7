//! Session: the shared context of one station run.
//!
//! Holds the running flag, the operator mode and the single-use "transition
//! permitted" signal behind one lock, with one condition variable that is
//! notified on any change. Loops park on `wait_for_change` with a bounded
//! timeout, so a shutdown, resume or handoff wakes them at once.

use crate::item::ItemDescriptor;
use crate::mode::Mode;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct Flags {
    running: bool,
    mode: Mode,
    transition_permitted: bool,
}

pub struct Session {
    flags: Mutex<Flags>,
    changed: Condvar,
    currently_playing: Mutex<Option<ItemDescriptor>>,
}

impl Session {
    pub fn new() -> Self {
        Session {
            flags: Mutex::new(Flags {
                running: false,
                mode: Mode::Auto,
                transition_permitted: false,
            }),
            changed: Condvar::new(),
            currently_playing: Mutex::new(None),
        }
    }

    pub(crate) fn begin(&self) -> bool {
        let mut flags = self.flags.lock();
        if flags.running {
            return false;
        }
        flags.running = true;
        flags.mode = Mode::Auto;
        flags.transition_permitted = false;
        true
    }

    pub(crate) fn request_shutdown(&self) {
        self.flags.lock().running = false;
        self.changed.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.flags.lock().running
    }

    pub fn mode(&self) -> Mode {
        self.flags.lock().mode
    }

    /// Compare-and-set on the mode. Only `ModeController` calls this.
    pub(crate) fn transition_mode(&self, from: Mode, to: Mode) -> bool {
        let mut flags = self.flags.lock();
        if flags.mode != from {
            return false;
        }
        flags.mode = to;
        if to == Mode::Manual {
            flags.transition_permitted = false;
        }
        drop(flags);
        self.changed.notify_all();
        true
    }

    pub(crate) fn permit_transition(&self) {
        self.flags.lock().transition_permitted = true;
        self.changed.notify_all();
    }

    pub(crate) fn clear_transition(&self) {
        self.flags.lock().transition_permitted = false;
    }

    /// Consume the signal if raised.
    pub(crate) fn take_transition(&self) -> bool {
        let mut flags = self.flags.lock();
        std::mem::take(&mut flags.transition_permitted)
    }

    pub fn transition_permitted(&self) -> bool {
        self.flags.lock().transition_permitted
    }

    /// Park until any flag changes or `timeout` passes.
    pub(crate) fn wait_for_change(&self, timeout: Duration) {
        let mut flags = self.flags.lock();
        if !flags.running {
            return;
        }
        self.changed.wait_for(&mut flags, timeout);
    }

    /// Sleep for `duration` unless shutdown is requested first.
    /// Returns false when woken by shutdown.
    pub(crate) fn idle(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut flags = self.flags.lock();
        while flags.running {
            if self.changed.wait_until(&mut flags, deadline).timed_out() {
                return flags.running;
            }
        }
        false
    }

    pub fn currently_playing(&self) -> Option<ItemDescriptor> {
        self.currently_playing.lock().clone()
    }

    pub(crate) fn set_currently_playing(&self, item: Option<ItemDescriptor>) {
        *self.currently_playing.lock() = item;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
