//! Shared transport context
//!
//! One [`Transport`] is built at start-up and shared by reference with every
//! task runner and with the interrupt handler.

use crate::broadcast::Broadcaster;
use crate::config::{Mode, TransportConfig};
use crate::controller::{Clock, Controller, ControllerError, RxFifo, TxSlot};
use crate::id::CanAddress;
use crate::interrupt::{BusState, FaultCounters};
use crate::message::{tx, MessageBuffer, TooMuchData};
use crate::pool::{Buffer, Pool};
use crate::queue::{Sender, TxQueue};
use crate::receiver::{MessageHandler, Receiver};
use crate::wake::WakeSlot;
use core::cell::{Cell, RefCell};
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::mutex::Mutex as AsyncMutex;
use embassy_sync::signal::Signal;
use log::error;

/// Transmission failed; the buffer has been freed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmitError {
    /// The controller refused to load or send the frame
    Rejected(ControllerError),
    /// The transmit buffer did not clear, even after cancelling its frame
    SlotBusy,
    /// Payload longer than the configured frame format carries
    TooMuchData,
}

impl From<TooMuchData> for TransmitError {
    fn from(_: TooMuchData) -> Self {
        Self::TooMuchData
    }
}

#[derive(Copy, Clone, Default)]
struct Claims {
    sender: bool,
    broadcaster: bool,
}

/// Transport context: controller, clock, buffer pool, motion queue, wake
/// slots and fault counters.
pub struct Transport<C, K, const N: usize> {
    controller: Mutex<CriticalSectionRawMutex, RefCell<C>>,
    pub(crate) clock: K,
    pub(crate) config: TransportConfig,
    pub(crate) pool: Pool<N>,
    pub(crate) motion: TxQueue<N>,
    pub(crate) rx_wake: [WakeSlot; RxFifo::COUNT],
    tx_done: [Signal<CriticalSectionRawMutex, ()>; TxSlot::COUNT],
    pub(crate) faults: Mutex<CriticalSectionRawMutex, Cell<FaultCounters>>,
    pub(crate) state: Mutex<CriticalSectionRawMutex, Cell<BusState>>,
    claims: Mutex<CriticalSectionRawMutex, Cell<Claims>>,
    urgent: AsyncMutex<CriticalSectionRawMutex, ()>,
}

impl<C: Controller, K: Clock, const N: usize> Transport<C, K, N> {
    /// Configures and starts `controller` with `config.bus`, then wraps it
    /// together with a pool of `N` buffers.
    pub fn new(mut controller: C, clock: K, config: TransportConfig) -> Result<Self, ControllerError> {
        controller.configure(&config.bus)?;
        Ok(Self {
            controller: Mutex::new(RefCell::new(controller)),
            clock,
            config,
            pool: Pool::new(),
            motion: TxQueue::new(),
            rx_wake: [WakeSlot::new(), WakeSlot::new()],
            tx_done: [Signal::new(), Signal::new(), Signal::new(), Signal::new()],
            faults: Mutex::new(Cell::new(FaultCounters::default())),
            state: Mutex::new(Cell::new(BusState::Running)),
            claims: Mutex::new(Cell::new(Claims::default())),
            urgent: AsyncMutex::new(()),
        })
    }

    /// Address this board sends from
    pub fn local_address(&self) -> CanAddress {
        self.config.local_address
    }

    /// Configuration the transport was built with
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// The buffer pool
    pub fn pool(&self) -> &Pool<N> {
        &self.pool
    }

    /// Takes a buffer from the pool. `None` means the pool is exhausted.
    pub fn allocate(&self) -> Option<Buffer<'_, N>> {
        self.pool.allocate()
    }

    /// Appends `buffer` to the motion queue and wakes the sender. Frames
    /// leave in the order they were queued.
    pub fn send_motion(&self, buffer: Buffer<'_, N>) {
        self.motion.push(buffer, &self.pool);
    }

    /// Sends `buffer` through the emergency slot, bypassing the motion
    /// queue. Concurrent callers are served one at a time. The buffer is
    /// freed whether or not the send succeeds.
    pub async fn send_urgent(&self, buffer: Buffer<'_, N>) -> Result<(), TransmitError> {
        let _guard = self.urgent.lock().await;
        self.transmit_and_free(TxSlot::Emergency, buffer).await
    }

    /// Motion queue task. Returns `None` if it was already claimed.
    pub fn sender(&self) -> Option<Sender<'_, C, K, N>> {
        self.claim(|c| &mut c.sender).then_some(Sender { transport: self })
    }

    /// Time sync task. Returns `None` if it was already claimed.
    pub fn broadcaster(&self) -> Option<Broadcaster<'_, C, K, N>> {
        self.claim(|c| &mut c.broadcaster)
            .then_some(Broadcaster { transport: self })
    }

    /// Receive task for `fifo`, passing every accepted frame to `handler`.
    /// Returns `None` while another receiver for the same FIFO exists.
    pub fn receiver<'a, H>(&'a self, fifo: RxFifo, handler: H) -> Option<Receiver<'a, C, K, H, N>>
    where
        H: MessageHandler<'a, N>,
    {
        let waiter = self.rx_wake[fifo.index()].register()?;
        Some(Receiver {
            transport: self,
            fifo,
            waiter,
            handler,
        })
    }

    /// Fault counts accumulated since start-up or the last
    /// [`take_fault_counters`](Self::take_fault_counters).
    pub fn fault_counters(&self) -> FaultCounters {
        self.faults.lock(Cell::get)
    }

    /// Returns the fault counts and resets them to zero.
    pub fn take_fault_counters(&self) -> FaultCounters {
        self.faults.lock(Cell::take)
    }

    /// Current controller state
    pub fn bus_state(&self) -> BusState {
        self.state.lock(Cell::get)
    }

    pub(crate) fn with_controller<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        self.controller.lock(|c| f(&mut c.borrow_mut()))
    }

    pub(crate) fn wake_transmitters(&self) {
        for done in &self.tx_done {
            done.signal(());
        }
    }

    fn claim(&self, flag: impl FnOnce(&mut Claims) -> &mut bool) -> bool {
        self.claims.lock(|cell| {
            let mut claims = cell.get();
            let taken = flag(&mut claims);
            let granted = !*taken;
            *taken = true;
            cell.set(claims);
            granted
        })
    }

    /// Sends `buffer` through `slot` and frees it. Failures are logged.
    pub(crate) async fn transmit_and_free(
        &self,
        slot: TxSlot,
        buffer: Buffer<'_, N>,
    ) -> Result<(), TransmitError> {
        self.resume_if_stalled();
        let result = self.transmit(slot, &buffer).await;
        if let Err(e) = result {
            error!("transmit on {:?} failed: {:?}", slot, e);
        }
        buffer.free();
        result
    }

    /// Loads `message` into `slot` once the slot's previous frame has left,
    /// then requests transmission.
    ///
    /// Waits for transmit-complete or cancellation-finished interrupts
    /// rather than polling. A frame still pending after `tx_clear_timeout`
    /// is cancelled; if the slot is still occupied after another timeout the
    /// send gives up with [`TransmitError::SlotBusy`].
    async fn transmit(&self, slot: TxSlot, message: &MessageBuffer) -> Result<(), TransmitError> {
        let element = match self.config.bus.mode {
            Mode::Classic => tx::Element::classic_frame(message, true)?,
            Mode::Fd {
                allow_bit_rate_switching,
            } => tx::Element::fd_frame(message, allow_bit_rate_switching, true)?,
        };
        let done = &self.tx_done[slot.index()];
        let mut cancelled = false;
        let mut deadline = self.clock.now() + self.config.tx_clear_timeout;

        loop {
            done.reset();
            match self.with_controller(|c| c.load_slot(slot, &element)) {
                Ok(()) => break,
                Err(nb::Error::Other(e)) => return Err(TransmitError::Rejected(e)),
                Err(nb::Error::WouldBlock) => {}
            }

            if let Either::Second(()) = select(done.wait(), self.clock.delay_until(deadline)).await {
                if cancelled {
                    return Err(TransmitError::SlotBusy);
                }
                self.with_controller(|c| c.cancel_slot(slot));
                cancelled = true;
                deadline = self.clock.now() + self.config.tx_clear_timeout;
            }
        }

        self.with_controller(|c| c.request_transmission(slot))
            .map_err(TransmitError::Rejected)
    }
}
