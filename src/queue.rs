//! Motion transmit queue and its sender task

use crate::controller::{Clock, Controller, TxSlot};
use crate::pool::{Buffer, List, Pool};
use crate::transport::Transport;
use core::cell::Cell;
use core::ptr;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use log::error;

/// FIFO of buffers awaiting transmission, linked by slot index through the
/// pool's arena.
///
/// Push and pop each run in one critical section together with the arena,
/// so the queue can be fed from any task.
pub(crate) struct TxQueue<const N: usize> {
    list: Mutex<CriticalSectionRawMutex, Cell<List>>,
    ready: Signal<CriticalSectionRawMutex, ()>,
}

impl<const N: usize> TxQueue<N> {
    pub(crate) const fn new() -> Self {
        Self {
            list: Mutex::new(Cell::new(List::EMPTY)),
            ready: Signal::new(),
        }
    }

    /// Appends `buffer` to the tail and wakes the sender. Buffers that do
    /// not belong to `pool` are freed instead.
    pub(crate) fn push(&self, buffer: Buffer<'_, N>, pool: &Pool<N>) {
        if !ptr::eq(buffer.pool(), pool) {
            error!("buffer from a foreign pool dropped");
            return;
        }
        critical_section::with(|cs| {
            let mut arena = pool.arena.borrow(cs).borrow_mut();
            let slot = buffer.into_queued(&mut arena);
            let cell = self.list.borrow(cs);
            let mut list = cell.get();
            list.push_back(&mut arena.next, slot);
            cell.set(list);
        });
        self.ready.signal(());
    }

    /// Removes the head of the queue.
    pub(crate) fn pop<'p>(&self, pool: &'p Pool<N>) -> Option<Buffer<'p, N>> {
        critical_section::with(|cs| {
            let mut arena = pool.arena.borrow(cs).borrow_mut();
            let cell = self.list.borrow(cs);
            let mut list = cell.get();
            let slot = list.pop_front(&mut arena.next)?;
            cell.set(list);
            Some(pool.reclaim(&mut arena, slot))
        })
    }

    /// Waits until something was pushed since the last wait.
    pub(crate) async fn wait(&self) {
        self.ready.wait().await
    }
}

/// Motion traffic task
///
/// Created by [`Transport::sender`].
pub struct Sender<'a, C, K, const N: usize> {
    pub(crate) transport: &'a Transport<C, K, N>,
}

impl<C: Controller, K: Clock, const N: usize> Sender<'_, C, K, N> {
    /// Drains the motion queue in arrival order every time it is signalled,
    /// sending each buffer through the motion slot and freeing it.
    pub async fn run(&mut self) -> ! {
        let t = self.transport;
        loop {
            t.motion.wait().await;
            while let Some(buffer) = t.motion.pop(&t.pool) {
                // Failures are logged and the buffer freed by the transmit path
                let _ = t.transmit_and_free(TxSlot::Motion, buffer).await;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fifo_order_and_conservation() {
        let pool = Pool::<4>::new();
        let queue = TxQueue::<4>::new();
        let mut slots = [None; 3];
        for (i, s) in slots.iter_mut().enumerate() {
            let mut b = pool.allocate().unwrap();
            b.set_data(&[i as u8]).unwrap();
            *s = Some(b.slot());
            queue.push(b, &pool);
        }
        assert_eq!(pool.queued(), 3);
        assert_eq!(pool.available(), 1);

        for (i, s) in slots.iter().enumerate() {
            let b = queue.pop(&pool).unwrap();
            assert_eq!(Some(b.slot()), *s);
            assert_eq!(b.data(), &[i as u8]);
            assert_eq!(pool.available() + pool.held() + pool.queued(), 4);
        }
        assert!(queue.pop(&pool).is_none());
        assert_eq!(pool.queued(), 0);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn foreign_buffer_is_freed() {
        let pool = Pool::<2>::new();
        let other = Pool::<2>::new();
        let queue = TxQueue::<2>::new();
        queue.push(other.allocate().unwrap(), &pool);
        assert!(queue.pop(&pool).is_none());
        assert_eq!(other.available(), 2);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn interleaved_push_pop() {
        let pool = Pool::<2>::new();
        let queue = TxQueue::<2>::new();
        let mut a = pool.allocate().unwrap();
        a.set_data(&[1]).unwrap();
        queue.push(a, &pool);
        let first = queue.pop(&pool).unwrap();
        let mut b = pool.allocate().unwrap();
        b.set_data(&[2]).unwrap();
        queue.push(b, &pool);
        drop(first);
        let mut c = pool.allocate().unwrap();
        c.set_data(&[3]).unwrap();
        queue.push(c, &pool);
        assert_eq!(queue.pop(&pool).unwrap().data(), &[2]);
        assert_eq!(queue.pop(&pool).unwrap().data(), &[3]);
        assert_eq!(pool.available(), 2);
    }
}
