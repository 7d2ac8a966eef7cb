//! Single-waiter wake channel between interrupt context and a task

use core::cell::Cell;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;

/// Wake handle for one hardware event source.
///
/// Holds at most one registered [`Waiter`]. Wakes coalesce into a single
/// permit: any number of [`WakeSlot::wake`] calls before the waiter runs
/// complete one [`Waiter::wait`]. The waiter is expected to re-check the
/// hardware state after every wake.
pub struct WakeSlot {
    registered: Mutex<CriticalSectionRawMutex, Cell<bool>>,
    signal: Signal<CriticalSectionRawMutex, ()>,
}

impl WakeSlot {
    /// Creates a slot without a waiter
    pub const fn new() -> Self {
        Self {
            registered: Mutex::new(Cell::new(false)),
            signal: Signal::new(),
        }
    }

    /// Registers the calling task as the waiter. Returns `None` if another
    /// waiter is already registered.
    pub fn register(&self) -> Option<Waiter<'_>> {
        let claimed = self.registered.lock(|r| !r.replace(true));
        claimed.then(|| Waiter { slot: self })
    }

    /// `true` while a [`Waiter`] is registered
    pub fn is_registered(&self) -> bool {
        self.registered.lock(Cell::get)
    }

    /// Wakes the registered waiter, if any. Non-blocking and safe to call
    /// from interrupt context.
    pub fn wake(&self) {
        if self.is_registered() {
            self.signal.signal(());
        }
    }
}

impl Default for WakeSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration on a [`WakeSlot`]. Unregisters on drop.
pub struct Waiter<'a> {
    slot: &'a WakeSlot,
}

impl Waiter<'_> {
    /// Waits for the next wake, or returns at once if one is pending.
    pub async fn wait(&mut self) {
        self.slot.signal.wait().await
    }

    /// Takes a pending wake without waiting.
    pub fn try_take(&mut self) -> bool {
        self.slot.signal.try_take().is_some()
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.slot.registered.lock(|r| r.set(false));
        self.slot.signal.reset();
    }
}
