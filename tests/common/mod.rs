#![allow(dead_code)]

use expansion_can::controller::{Clock, Controller, ControllerError, Instant, RxFifo, RxFifoStatus, TxSlot};
use expansion_can::message::{rx, tx};
use expansion_can::{BusConfig, Interrupt, InterruptSet, Transport, TransportConfig};
use futures_executor::{LocalPool, LocalSpawner};
use futures_task::LocalSpawn;
use std::collections::VecDeque;
use std::future::{poll_fn, Future};
use std::sync::Mutex;
use std::task::{Poll, Waker};

pub const RX_FIFO_SIZE: u8 = 16;

#[derive(Default)]
pub struct SimState {
    pub config: Option<BusConfig>,
    pub configure_count: usize,
    pub running: bool,
    pub flags: u32,
    loaded: [Option<tx::Element>; TxSlot::COUNT],
    in_flight: [Option<tx::Element>; TxSlot::COUNT],
    pub sent: Vec<(TxSlot, tx::Element)>,
    pub cancelled: Vec<TxSlot>,
    pub discarded: usize,
    rx: [VecDeque<rx::Element>; RxFifo::COUNT],
    get_index: [u8; RxFifo::COUNT],
    /// Requested frames leave the slot at once
    pub auto_complete: bool,
    /// Cancelling a pending frame frees the slot at once
    pub cancel_clears: bool,
    /// Error returned by the next `load_slot`
    pub reject: Option<ControllerError>,
    /// Number of upcoming `configure` calls that fail
    pub fail_configure: usize,
    /// The next `rx_status` empties the FIFOs after reporting, as a
    /// reinitialisation racing the reader would
    pub reset_rx_after_status: bool,
}

impl SimState {
    fn reset_rx(&mut self) {
        for fifo in self.rx.iter_mut() {
            fifo.clear();
        }
        self.get_index = [0; RxFifo::COUNT];
    }
}

/// Controller model: frames are "sent" when requested (or when the test
/// completes them), receive FIFOs are filled by the test.
pub struct SimBus {
    state: Mutex<SimState>,
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                auto_complete: true,
                cancel_clears: true,
                ..Default::default()
            }),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn raise(&self, interrupt: Interrupt) {
        self.with(|s| s.flags |= u32::from(interrupt));
    }

    /// Puts `element` straight into `fifo` and flags a new message.
    pub fn push_rx(&self, fifo: RxFifo, element: rx::Element) {
        self.with(|s| s.rx[fifo.index()].push_back(element));
        self.raise(match fifo {
            RxFifo::Fifo0 => Interrupt::RxFifo0NewMessage,
            RxFifo::Fifo1 => Interrupt::RxFifo1NewMessage,
        });
    }

    /// Runs `element` through the configured acceptance filters.
    pub fn deliver(&self, element: rx::Element) -> Option<RxFifo> {
        let fifo = self.with(|s| s.config.as_ref()?.route(element.id()))?;
        self.push_rx(fifo, element);
        Some(fifo)
    }

    /// Flagged interrupts that are enabled
    pub fn pending_interrupts(&self) -> InterruptSet {
        self.with(|s| {
            let enabled = s.config.as_ref().map(|c| c.interrupts.bits()).unwrap_or(0);
            InterruptSet::from_bits(s.flags & enabled)
        })
    }

    pub fn rx_len(&self, fifo: RxFifo) -> usize {
        self.with(|s| s.rx[fifo.index()].len())
    }

    /// Finishes the pending frame in `slot` and flags transmission complete.
    pub fn complete(&self, slot: TxSlot) {
        self.with(|s| {
            if let Some(element) = s.in_flight[slot.index()].take() {
                s.sent.push((slot, element));
                s.flags |= u32::from(Interrupt::TransmissionCompleted);
            }
        });
    }

    pub fn is_pending(&self, slot: TxSlot) -> bool {
        self.with(|s| s.in_flight[slot.index()].is_some())
    }

    pub fn sent(&self) -> Vec<(TxSlot, tx::Element)> {
        self.with(|s| s.sent.clone())
    }

    pub fn sent_on(&self, slot: TxSlot) -> Vec<tx::Element> {
        self.with(|s| {
            s.sent
                .iter()
                .filter(|(sl, _)| *sl == slot)
                .map(|(_, e)| *e)
                .collect()
        })
    }
}

impl Controller for &SimBus {
    fn configure(&mut self, config: &BusConfig) -> Result<(), ControllerError> {
        self.with(|s| {
            if s.fail_configure > 0 {
                s.fail_configure -= 1;
                return Err(ControllerError::NotOperational);
            }
            s.config = Some(config.clone());
            s.configure_count += 1;
            s.running = true;
            for slot in s.loaded.iter_mut().chain(s.in_flight.iter_mut()) {
                if slot.take().is_some() {
                    s.discarded += 1;
                }
            }
            s.reset_rx();
            Ok(())
        })
    }

    fn stop(&mut self) {
        self.with(|s| s.running = false);
    }

    fn interrupt_flags(&self) -> InterruptSet {
        self.pending_interrupts()
    }

    fn clear_interrupts(&mut self, interrupts: InterruptSet) {
        self.with(|s| s.flags &= !interrupts.bits());
    }

    fn load_slot(&mut self, slot: TxSlot, element: &tx::Element) -> nb::Result<(), ControllerError> {
        self.with(|s| {
            if let Some(e) = s.reject.take() {
                return Err(nb::Error::Other(e));
            }
            if s.in_flight[slot.index()].is_some() {
                return Err(nb::Error::WouldBlock);
            }
            s.loaded[slot.index()] = Some(*element);
            Ok(())
        })
    }

    fn request_transmission(&mut self, slot: TxSlot) -> Result<(), ControllerError> {
        self.with(|s| {
            if !s.running {
                return Err(ControllerError::NotOperational);
            }
            let element = s.loaded[slot.index()]
                .take()
                .ok_or(ControllerError::InvalidElement)?;
            if s.auto_complete {
                s.sent.push((slot, element));
                s.flags |= u32::from(Interrupt::TransmissionCompleted);
            } else {
                s.in_flight[slot.index()] = Some(element);
            }
            Ok(())
        })
    }

    fn cancel_slot(&mut self, slot: TxSlot) {
        self.with(|s| {
            s.cancelled.push(slot);
            if s.cancel_clears && s.in_flight[slot.index()].take().is_some() {
                s.discarded += 1;
                s.flags |= u32::from(Interrupt::TransmissionCancellationFinished);
            }
        });
    }

    fn rx_status(&self, fifo: RxFifo) -> RxFifoStatus {
        self.with(|s| {
            let status = RxFifoStatus {
                fill_level: s.rx[fifo.index()].len() as u8,
                get_index: s.get_index[fifo.index()],
            };
            if std::mem::take(&mut s.reset_rx_after_status) {
                s.reset_rx();
            }
            status
        })
    }

    fn read_rx(&self, fifo: RxFifo, index: u8) -> rx::Element {
        self.with(|s| {
            assert_eq!(index, s.get_index[fifo.index()]);
            *s.rx[fifo.index()].front().unwrap()
        })
    }

    fn acknowledge_rx(&mut self, fifo: RxFifo, index: u8) {
        self.with(|s| {
            assert_eq!(index, s.get_index[fifo.index()]);
            s.rx[fifo.index()].pop_front().unwrap();
            s.get_index[fifo.index()] = (index + 1) % RX_FIFO_SIZE;
        });
    }
}

struct ClockState {
    now: u64,
    wakers: Vec<Waker>,
}

/// Time only moves when the test says so.
pub struct ManualClock {
    state: Mutex<ClockState>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClockState {
                now: 0,
                wakers: Vec::new(),
            }),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.state.lock().unwrap().now
    }

    pub fn advance(&self, ms: u64) {
        let wakers = {
            let mut s = self.state.lock().unwrap();
            s.now += ms;
            std::mem::take(&mut s.wakers)
        };
        for w in wakers {
            w.wake();
        }
    }
}

impl<'c> Clock for &'c ManualClock {
    fn now(&self) -> Instant {
        Instant::from_ticks(self.now_ms())
    }

    fn delay_until(&self, deadline: Instant) -> impl Future<Output = ()> {
        let clock: &'c ManualClock = *self;
        poll_fn(move |cx| {
            let mut s = clock.state.lock().unwrap();
            if s.now >= deadline.ticks() {
                Poll::Ready(())
            } else {
                s.wakers.push(cx.waker().clone());
                Poll::Pending
            }
        })
    }

    fn timestamp(&self) -> u32 {
        // Pretend the step clock ticks at 1 MHz
        (self.now_ms() * 1_000) as u32
    }
}

pub type TestTransport<const N: usize> = Transport<&'static SimBus, &'static ManualClock, N>;

pub struct Harness<const N: usize> {
    pub bus: &'static SimBus,
    pub clock: &'static ManualClock,
    pub transport: &'static TestTransport<N>,
    pub executor: LocalPool,
    pub spawner: LocalSpawner,
}

impl<const N: usize> Harness<N> {
    pub fn new() -> Self {
        Self::with_config(TransportConfig::default())
    }

    pub fn with_config(config: TransportConfig) -> Self {
        let bus: &'static SimBus = Box::leak(Box::new(SimBus::new()));
        let clock: &'static ManualClock = Box::leak(Box::new(ManualClock::new()));
        let transport = Box::leak(Box::new(Transport::new(bus, clock, config).unwrap()));
        let executor = LocalPool::new();
        let spawner = executor.spawner();
        Self {
            bus,
            clock,
            transport,
            executor,
            spawner,
        }
    }

    pub fn spawn(&self, fut: impl Future<Output = ()> + 'static) {
        self.spawner.spawn_local_obj(Box::new(fut).into()).unwrap();
    }

    /// Delivers pending interrupts, then runs every task until none can
    /// make progress.
    pub fn settle(&mut self) {
        loop {
            self.executor.run_until_stalled();
            if self.bus.pending_interrupts().is_empty() {
                break;
            }
            self.transport.on_interrupt();
        }
    }

    pub fn advance(&mut self, ms: u64) {
        self.clock.advance(ms);
        self.settle();
    }
}
