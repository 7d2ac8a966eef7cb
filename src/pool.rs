//! Fixed pool of message buffers
//!
//! The pool is an arena of `N` slots. Bookkeeping (free list, per-slot owner
//! and the intrusive `next` links shared with the transmit queue) lives
//! behind a critical-section mutex; the message storage itself is only ever
//! touched through a [`Buffer`] handle, which is the exclusive owner of its
//! slot until it is dropped or handed to a queue.

use crate::message::MessageBuffer;
use core::cell::{RefCell, UnsafeCell};
use core::fmt;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Index of a slot in the pool
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotIndex(u8);

impl SlotIndex {
    fn get(self) -> usize {
        self.0.into()
    }
}

/// Who currently owns a slot
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Owner {
    Free,
    Held,
    Queued,
}

/// Singly linked list of slots threaded through [`Arena::next`].
/// `tail` is `Some` exactly when `head` is.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct List {
    head: Option<SlotIndex>,
    tail: Option<SlotIndex>,
}

impl List {
    pub(crate) const EMPTY: Self = Self {
        head: None,
        tail: None,
    };

    pub(crate) fn push_back<const N: usize>(&mut self, next: &mut [Option<SlotIndex>; N], slot: SlotIndex) {
        next[slot.get()] = None;
        match self.tail {
            Some(tail) => next[tail.get()] = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }

    fn push_front<const N: usize>(&mut self, next: &mut [Option<SlotIndex>; N], slot: SlotIndex) {
        next[slot.get()] = self.head;
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
        self.head = Some(slot);
    }

    pub(crate) fn pop_front<const N: usize>(
        &mut self,
        next: &mut [Option<SlotIndex>; N],
    ) -> Option<SlotIndex> {
        let head = self.head?;
        self.head = next[head.get()].take();
        if self.head.is_none() {
            self.tail = None;
        }
        Some(head)
    }
}

pub(crate) struct Arena<const N: usize> {
    pub(crate) next: [Option<SlotIndex>; N],
    owner: [Owner; N],
    free: List,
    available: usize,
    held: usize,
    queued: usize,
}

impl<const N: usize> Arena<N> {
    fn new() -> Self {
        let mut arena = Self {
            next: [None; N],
            owner: [Owner::Free; N],
            free: List::EMPTY,
            available: N,
            held: 0,
            queued: 0,
        };
        for i in 0..N {
            // N <= 255 is checked at compile time
            arena.free.push_back(&mut arena.next, SlotIndex(i as u8));
        }
        arena
    }

    fn take_free(&mut self) -> Option<SlotIndex> {
        let slot = self.free.pop_front(&mut self.next)?;
        self.owner[slot.get()] = Owner::Held;
        self.available -= 1;
        self.held += 1;
        Some(slot)
    }

    fn release(&mut self, slot: SlotIndex) {
        match self.owner[slot.get()] {
            Owner::Held => self.held -= 1,
            Owner::Queued => self.queued -= 1,
            Owner::Free => {
                debug_assert!(false, "slot released twice");
                return;
            }
        }
        self.owner[slot.get()] = Owner::Free;
        self.free.push_front(&mut self.next, slot);
        self.available += 1;
    }

    fn enqueue(&mut self, slot: SlotIndex) {
        debug_assert_eq!(self.owner[slot.get()], Owner::Held);
        self.owner[slot.get()] = Owner::Queued;
        self.held -= 1;
        self.queued += 1;
    }

    fn dequeue(&mut self, slot: SlotIndex) {
        debug_assert_eq!(self.owner[slot.get()], Owner::Queued);
        self.owner[slot.get()] = Owner::Held;
        self.queued -= 1;
        self.held += 1;
    }
}

/// A fixed set of `N` message buffers
///
/// Allocation never blocks: an empty pool is reported as `None` and is the
/// caller's backpressure signal.
pub struct Pool<const N: usize> {
    storage: [UnsafeCell<MessageBuffer>; N],
    pub(crate) arena: Mutex<CriticalSectionRawMutex, RefCell<Arena<N>>>,
}

// Safety: a storage slot is only accessed through the single `Buffer` that
// holds it, and ownership of slots is tracked under the arena mutex.
unsafe impl<const N: usize> Sync for Pool<N> {}

impl<const N: usize> Pool<N> {
    const CAPACITY_CHECK: () = assert!(N > 0 && N <= 255, "pool holds 1 to 255 buffers");

    /// Creates a pool with all `N` buffers free.
    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_CHECK;
        Self {
            storage: core::array::from_fn(|_| UnsafeCell::new(MessageBuffer::new())),
            arena: Mutex::new(RefCell::new(Arena::new())),
        }
    }

    /// Takes a free buffer with its identifier and length cleared, or `None`
    /// if every buffer is in use.
    pub fn allocate(&self) -> Option<Buffer<'_, N>> {
        let slot = self.arena.lock(|a| a.borrow_mut().take_free())?;
        let mut buffer = Buffer { pool: self, slot };
        buffer.clear();
        Some(buffer)
    }

    /// Number of free buffers
    pub fn available(&self) -> usize {
        self.arena.lock(|a| a.borrow().available)
    }

    /// Total number of buffers
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of buffers waiting in a transmit queue
    pub fn queued(&self) -> usize {
        self.arena.lock(|a| a.borrow().queued)
    }

    /// Number of buffers held by a [`Buffer`] handle
    pub fn held(&self) -> usize {
        self.arena.lock(|a| a.borrow().held)
    }

    /// Rebuilds a handle for a slot that was taken out of a queue.
    ///
    /// The slot must have been `Queued` and already unlinked by the caller.
    pub(crate) fn reclaim(&self, arena: &mut Arena<N>, slot: SlotIndex) -> Buffer<'_, N> {
        arena.dequeue(slot);
        Buffer { pool: self, slot }
    }

    fn release(&self, slot: SlotIndex) {
        self.arena.lock(|a| a.borrow_mut().release(slot));
    }
}

impl<const N: usize> Default for Pool<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive handle to one pooled [`MessageBuffer`]
///
/// Dropping the handle returns the buffer to its pool.
pub struct Buffer<'a, const N: usize> {
    pool: &'a Pool<N>,
    slot: SlotIndex,
}

impl<'a, const N: usize> Buffer<'a, N> {
    /// Returns the buffer to the pool. Same as dropping it.
    pub fn free(self) {}

    /// Slot this handle owns
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    pub(crate) fn pool(&self) -> &'a Pool<N> {
        self.pool
    }

    /// Gives up the handle without freeing the slot, marking it queued.
    /// `arena` must be this buffer's pool arena.
    pub(crate) fn into_queued(self, arena: &mut Arena<N>) -> SlotIndex {
        let this = ManuallyDrop::new(self);
        arena.enqueue(this.slot);
        this.slot
    }
}

impl<const N: usize> Deref for Buffer<'_, N> {
    type Target = MessageBuffer;

    fn deref(&self) -> &MessageBuffer {
        // Safety: this handle is the only owner of the slot
        unsafe { &*self.pool.storage[self.slot.get()].get() }
    }
}

impl<const N: usize> DerefMut for Buffer<'_, N> {
    fn deref_mut(&mut self) -> &mut MessageBuffer {
        // Safety: this handle is the only owner of the slot
        unsafe { &mut *self.pool.storage[self.slot.get()].get() }
    }
}

impl<const N: usize> Drop for Buffer<'_, N> {
    fn drop(&mut self) {
        self.pool.release(self.slot);
    }
}

impl<const N: usize> fmt::Debug for Buffer<'_, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("slot", &self.slot)
            .field("message", &**self)
            .finish()
    }
}
