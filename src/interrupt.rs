//! Interrupt condition bits and the interrupt entry point
//!
//! The bit layout follows the MCAN interrupt register of the controller
//! revision the expansion boards use, which still reports acknowledge and
//! format errors as separate conditions.

use crate::controller::{Clock, Controller, RxFifo};
use crate::transport::Transport;
use bitfield::bitfield;
use log::{error, warn};

bitfield! {
    /// A set of CAN interrupts.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct InterruptSet(u32);

    /// Stuff Error
    pub ste, set_ste: 31;
    /// Format Error
    pub foe, set_foe: 30;
    /// Acknowledge Error
    pub acke, set_acke: 29;
    /// Bit Error
    pub be, set_be: 28;
    /// CRC Error
    pub crce, set_crce: 27;
    /// Watchdog
    pub wdi, set_wdi: 26;
    /// Bus Off
    pub bo, set_bo: 25;
    /// Warning status changed
    pub ew, set_ew: 24;
    /// Error Passive
    pub ep, set_ep: 23;
    /// Error Logging Overflow
    pub elo, set_elo: 22;
    /// Message stored to Dedicated Rx Buffer
    pub drx, set_drx: 19;
    /// Timeout Occured
    pub too, set_too: 18;
    /// Message Ram Access Failure
    pub mraf, set_mraf: 17;
    /// Timestamp Wraparound
    pub tsw, set_tsw: 16;
    /// Tx Event Fifo New Entry
    pub tefn, set_tefn: 12;
    /// Tx Fifo Empty
    pub tfe, set_tfe: 11;
    /// Transmission Cancellation Finished
    pub tcf, set_tcf: 10;
    /// Transmission Completed
    pub tc, set_tc: 9;
    /// Rx Fifo1 Message Lost
    pub rf1l, set_rf1l: 7;
    /// Rx Fifo1 New Message
    pub rf1n, set_rf1n: 4;
    /// Rx Fifo0 Message Lost
    pub rf0l, set_rf0l: 3;
    /// Rx Fifo0 New Message
    pub rf0n, set_rf0n: 0;
}

impl InterruptSet {
    /// No interrupts
    pub const EMPTY: Self = Self(0);

    /// Set from the raw register value. Bits that do not name an
    /// [`Interrupt`] are dropped.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits & Self::all_known())
    }

    /// Raw register value
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// `true` if no interrupt is contained
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// `true` if `interrupt` is contained
    pub fn contains(&self, interrupt: Interrupt) -> bool {
        self.0 & u32::from(interrupt) != 0
    }

    /// Adds `interrupt` to the set.
    pub fn insert(&mut self, interrupt: Interrupt) {
        self.0 |= u32::from(interrupt);
    }

    /// Interrupts contained in both sets
    pub fn intersection(&self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// An iterator visiting all elements in ascending bit order.
    pub fn iter(&self) -> Iter {
        Iter {
            flags: *self,
            index: 0,
        }
    }

    fn all_known() -> u32 {
        (0..32)
            .filter_map(|i| Interrupt::try_from(i).ok())
            .fold(0, |acc, int| acc | u32::from(int))
    }
}

impl FromIterator<Interrupt> for InterruptSet {
    fn from_iter<T: IntoIterator<Item = Interrupt>>(iter: T) -> Self {
        let mut set = Self::EMPTY;
        for int in iter {
            set.insert(int);
        }
        set
    }
}

impl core::fmt::Debug for InterruptSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for InterruptSet {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "InterruptSet({=u32:#x})", self.0)
    }
}

/// A single interrupt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Interrupt {
    /// RF0N
    RxFifo0NewMessage = 0,
    /// RF0L
    RxFifo0MessageLost = 3,
    /// RF1N
    RxFifo1NewMessage = 4,
    /// RF1L
    RxFifo1MessageLost = 7,
    /// TC
    TransmissionCompleted = 9,
    /// TCF
    TransmissionCancellationFinished = 10,
    /// TFE
    TxFifoEmpty = 11,
    /// TEFN
    TxEventFifoNewEntry = 12,
    /// TSW
    TimestampWraparound = 16,
    /// MRAF
    MessageRamAccessFailure = 17,
    /// TOO
    TimeoutOccured = 18,
    /// DRX
    MessageStoredToDedicatedRxBuffer = 19,
    /// ELO
    ErrorLoggingOverflow = 22,
    /// EP
    ErrorPassive = 23,
    /// EW
    WarningStatusChanged = 24,
    /// BO
    BusOff = 25,
    /// WDI
    Watchdog = 26,
    /// CRCE
    CrcError = 27,
    /// BE
    BitError = 28,
    /// ACKE
    AcknowledgeError = 29,
    /// FOE
    FormatError = 30,
    /// STE
    StuffError = 31,
}

impl From<Interrupt> for u32 {
    fn from(x: Interrupt) -> Self {
        1 << x as u32
    }
}

/// Bit position does not name an [`Interrupt`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InvalidInterruptNumber;

impl TryFrom<u8> for Interrupt {
    type Error = InvalidInterruptNumber;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use Interrupt::*;
        let ret = match value {
            0 => RxFifo0NewMessage,
            3 => RxFifo0MessageLost,
            4 => RxFifo1NewMessage,
            7 => RxFifo1MessageLost,
            9 => TransmissionCompleted,
            10 => TransmissionCancellationFinished,
            11 => TxFifoEmpty,
            12 => TxEventFifoNewEntry,
            16 => TimestampWraparound,
            17 => MessageRamAccessFailure,
            18 => TimeoutOccured,
            19 => MessageStoredToDedicatedRxBuffer,
            22 => ErrorLoggingOverflow,
            23 => ErrorPassive,
            24 => WarningStatusChanged,
            25 => BusOff,
            26 => Watchdog,
            27 => CrcError,
            28 => BitError,
            29 => AcknowledgeError,
            30 => FormatError,
            31 => StuffError,
            _ => Err(InvalidInterruptNumber)?,
        };
        Ok(ret)
    }
}

/// An iterator over the items of an [`InterruptSet`].
///
/// This `struct` is created by [`InterruptSet::iter`].
pub struct Iter {
    flags: InterruptSet,
    index: u8,
}

impl Iterator for Iter {
    type Item = Interrupt;

    fn next(&mut self) -> Option<Self::Item> {
        // The layout has gaps, so unnamed positions are skipped rather than
        // ending the iteration.
        while self.index < 32 {
            let i = self.index;
            self.index += 1;
            if self.flags.0 & (1 << i) != 0 {
                if let Ok(int) = Interrupt::try_from(i) {
                    return Some(int);
                }
            }
        }
        None
    }
}

/// Accumulated bus fault counts
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultCounters {
    /// Frames nobody acknowledged
    pub acknowledge_errors: u32,
    /// Frames with a fixed-form bit field violation
    pub format_errors: u32,
    /// Bus-off events, each followed by a reinitialisation
    pub bus_off: u32,
}

/// Operating state of the controller
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusState {
    /// Normal operation
    #[default]
    Running,
    /// Recovering from bus-off. If reconfiguration failed, it is retried on
    /// the next interrupt or transmission.
    Reinitializing,
}

impl<C: Controller, K: Clock, const N: usize> Transport<C, K, N> {
    /// Interrupt entry point. Call from the CAN interrupt handler.
    ///
    /// Clears every flagged condition, then wakes the receiver of a FIFO
    /// that got a new message, wakes transmitters waiting for a slot,
    /// counts acknowledge and format errors, and on bus-off stops and
    /// reconfigures the controller with the configuration it was started
    /// with. A reinitialisation that failed earlier is retried first.
    /// Never blocks.
    pub fn on_interrupt(&self) {
        self.resume_if_stalled();
        let flags = self.with_controller(|c| {
            let flags = c.interrupt_flags();
            c.clear_interrupts(flags);
            flags
        });

        for interrupt in flags.iter() {
            match interrupt {
                Interrupt::RxFifo0NewMessage => self.rx_wake[RxFifo::Fifo0.index()].wake(),
                Interrupt::RxFifo1NewMessage => self.rx_wake[RxFifo::Fifo1.index()].wake(),
                Interrupt::TransmissionCompleted | Interrupt::TransmissionCancellationFinished => {
                    self.wake_transmitters()
                }
                Interrupt::AcknowledgeError => {
                    self.count_fault(|f| f.acknowledge_errors = f.acknowledge_errors.wrapping_add(1))
                }
                Interrupt::FormatError => {
                    self.count_fault(|f| f.format_errors = f.format_errors.wrapping_add(1))
                }
                Interrupt::BusOff => self.recover_bus_off(),
                _ => {}
            }
        }
    }

    fn recover_bus_off(&self) {
        self.count_fault(|f| f.bus_off = f.bus_off.wrapping_add(1));
        self.state.lock(|s| s.set(BusState::Reinitializing));
        self.reinitialize();
    }

    /// Retries a reinitialisation that failed earlier.
    pub(crate) fn resume_if_stalled(&self) {
        if self.bus_state() == BusState::Reinitializing {
            self.reinitialize();
        }
    }

    fn reinitialize(&self) {
        // Both a task and the interrupt handler can get here
        let result = self.with_controller(|c| {
            if self.bus_state() == BusState::Running {
                return None;
            }
            c.stop();
            let result = c.configure(&self.config.bus);
            if result.is_ok() {
                self.state.lock(|s| s.set(BusState::Running));
            }
            Some(result)
        });
        match result {
            None => return,
            Some(Ok(())) => warn!("bus-off, controller reinitialised"),
            Some(Err(e)) => error!("bus-off, reinitialisation failed: {:?}", e),
        }

        // Frames in flight are lost; let waiting senders re-check their slots
        self.wake_transmitters();
    }

    fn count_fault(&self, f: impl FnOnce(&mut FaultCounters)) {
        self.faults.lock(|cell| {
            let mut counters = cell.get();
            f(&mut counters);
            cell.set(counters);
        });
    }
}
