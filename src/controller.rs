//! Boundary to the CAN controller driver and the system time source
//!
//! The transport never touches peripheral registers itself. A target HAL
//! provides a [`Controller`] that configures the peripheral, moves frame
//! elements in and out of message RAM and exposes the interrupt flags, plus a
//! [`Clock`] for delays and the time sync payload.
//!
//! All `Controller` methods are called with interrupts disabled and must not
//! block; they are O(1) register and message RAM accesses, apart from
//! [`Controller::configure`], which is also called from the interrupt handler
//! during bus-off recovery.

use crate::config::BusConfig;
use crate::interrupt::InterruptSet;
use crate::message::{rx, tx};
use core::future::Future;

/// Milliseconds since an arbitrary epoch
pub type Instant = fugit::TimerInstantU64<1_000>;
/// Millisecond duration
pub type Duration = fugit::MillisDurationU64;

/// Dedicated transmit buffers, one per traffic class so that no class can
/// block another at the hardware level.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxSlot {
    /// Urgent traffic such as emergency stop
    Emergency = 0,
    /// Periodic time sync broadcasts
    TimeSync = 1,
    /// Queued motion traffic
    Motion = 2,
    /// Request/response traffic
    Request = 3,
}

impl TxSlot {
    /// Number of dedicated transmit buffers the transport uses
    pub const COUNT: usize = 4;

    /// Every slot, ordered by buffer index
    pub const ALL: [Self; Self::COUNT] = [
        Self::Emergency,
        Self::TimeSync,
        Self::Motion,
        Self::Request,
    ];

    /// Transmit buffer index
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Receive FIFOs
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxFifo {
    /// Broadcasts and requests addressed to this board
    Fifo0 = 0,
    /// Responses addressed to this board
    Fifo1 = 1,
}

impl RxFifo {
    /// Number of receive FIFOs
    pub const COUNT: usize = 2;

    /// FIFO number
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Fill state of a receive FIFO
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxFifoStatus {
    /// Number of elements waiting to be read
    pub fill_level: u8,
    /// Index of the oldest element
    pub get_index: u8,
}

impl RxFifoStatus {
    /// Returns `true` if the FIFO holds no elements
    pub fn is_empty(&self) -> bool {
        self.fill_level == 0
    }
}

/// Errors reported by a controller driver
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControllerError {
    /// Transmit buffer is not configured on the peripheral
    InvalidSlot,
    /// Element could not be written to message RAM
    InvalidElement,
    /// The peripheral is not in normal operation
    NotOperational,
}

/// CAN controller driver
pub trait Controller {
    /// Enters initialization mode, applies `config` (FD mode, extended
    /// filters, interrupt enables) and starts normal operation. Frames pending
    /// in any transmit buffer are discarded.
    fn configure(&mut self, config: &BusConfig) -> Result<(), ControllerError>;

    /// Leaves normal operation.
    fn stop(&mut self);

    /// Returns the set of enabled interrupts currently flagged.
    fn interrupt_flags(&self) -> InterruptSet;

    /// Clears the flags in `interrupts`.
    fn clear_interrupts(&mut self, interrupts: InterruptSet);

    /// Writes `element` into the transmit buffer of `slot`. Fails with
    /// [`nb::Error::WouldBlock`] while a previous frame in the buffer is still
    /// pending.
    fn load_slot(&mut self, slot: TxSlot, element: &tx::Element) -> nb::Result<(), ControllerError>;

    /// Requests transmission of the frame loaded into `slot`.
    fn request_transmission(&mut self, slot: TxSlot) -> Result<(), ControllerError>;

    /// Requests cancellation of the pending frame in `slot`. Completion is
    /// flagged by the cancellation finished interrupt.
    fn cancel_slot(&mut self, slot: TxSlot);

    /// Fill level and get index of `fifo`.
    fn rx_status(&self, fifo: RxFifo) -> RxFifoStatus;

    /// Copies the element at `index` out of `fifo`.
    fn read_rx(&self, fifo: RxFifo, index: u8) -> rx::Element;

    /// Releases the element at `index` back to the peripheral.
    fn acknowledge_rx(&mut self, fifo: RxFifo, index: u8);
}

/// System time source
pub trait Clock {
    /// Current time
    fn now(&self) -> Instant;

    /// Completes once `now() >= deadline`.
    fn delay_until(&self, deadline: Instant) -> impl Future<Output = ()>;

    /// Completes after `duration` has elapsed.
    fn delay(&self, duration: Duration) -> impl Future<Output = ()> {
        self.delay_until(self.now() + duration)
    }

    /// Free-running hardware counter sent in time sync broadcasts
    fn timestamp(&self) -> u32;
}
