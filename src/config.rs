//! Transport and bus configuration

use crate::controller::{Duration, RxFifo};
use crate::filter::{Action, ExtFilter};
use crate::id::{
    CanAddress, BOARD_ADDRESS_MASK, BROADCAST_ADDRESS, DST_ADDRESS_SHIFT, MASTER_ADDRESS,
    RESPONSE_BIT,
};
use crate::interrupt::{Interrupt, InterruptSet};
use heapless::Vec;

/// Maximum number of extended filters a [`BusConfig`] holds
pub const MAX_EXTENDED_FILTERS: usize = 8;

/// Configuration for the transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    /// Address this board answers to and sends from
    pub local_address: CanAddress,
    /// Interval between time sync broadcasts
    pub clock_interval: Duration,
    /// Back-off before the receiver retries when the pool is exhausted
    pub rx_retry_delay: Duration,
    /// How long a sender waits for a transmit buffer to clear before it
    /// cancels the stale frame
    pub tx_clear_timeout: Duration,
    /// Peripheral configuration, reapplied after bus-off
    pub bus: BusConfig,
}

impl TransportConfig {
    /// Create an instance
    ///
    /// The local address must be provided, all other settings come
    /// pre-populated with default values.
    pub fn new(local_address: CanAddress) -> Self {
        Self {
            local_address,
            clock_interval: Duration::millis(10_000),
            rx_retry_delay: Duration::millis(2),
            tx_clear_timeout: Duration::millis(20),
            bus: BusConfig::controller(local_address),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new(MASTER_ADDRESS)
    }
}

/// Enable/disable CAN-FD and related features
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Classic mode with 8-bytes data.
    Classic,
    /// Transmission and reception of CAN FD frames (with up to 64 bytes of
    /// data) is enabled.
    Fd {
        /// If `true`, outgoing FD frames use bit rate switching.
        allow_bit_rate_switching: bool,
    },
}

impl Default for Mode {
    fn default() -> Self {
        Self::Fd {
            allow_bit_rate_switching: false,
        }
    }
}

impl Mode {
    /// `true` if outgoing frames should switch bit rate
    pub fn bit_rate_switching(&self) -> bool {
        matches!(
            self,
            Self::Fd {
                allow_bit_rate_switching: true
            }
        )
    }
}

/// Everything the controller needs to come out of reset into the
/// operational state. Applied at start-up and again after every bus-off.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusConfig {
    /// Frame format
    pub mode: Mode,
    /// Extended ID acceptance filters, in priority order
    pub filters: Vec<ExtFilter, MAX_EXTENDED_FILTERS>,
    /// Interrupts routed to the transport's interrupt handler
    pub interrupts: InterruptSet,
}

impl BusConfig {
    /// Filters and interrupts of the main controller board at
    /// `local_address`:
    /// - requests addressed to it go to FIFO 0
    /// - broadcasts go to FIFO 0
    /// - responses addressed to it go to FIFO 1
    pub fn controller(local_address: CanAddress) -> Self {
        let addr_mask = BOARD_ADDRESS_MASK << DST_ADDRESS_SHIFT;
        let local = u32::from(local_address) << DST_ADDRESS_SHIFT;
        let broadcast = u32::from(BROADCAST_ADDRESS) << DST_ADDRESS_SHIFT;

        let mut filters = Vec::new();
        for filter in [
            ExtFilter::classic(Action::StoreFifo0, local, addr_mask | RESPONSE_BIT),
            ExtFilter::classic(Action::StoreFifo0, broadcast, addr_mask),
            ExtFilter::classic(Action::StoreFifo1, local | RESPONSE_BIT, addr_mask | RESPONSE_BIT),
        ] {
            // Capacity is well above three
            let _ = filters.push(filter);
        }

        Self {
            mode: Mode::default(),
            filters,
            interrupts: [
                Interrupt::RxFifo0NewMessage,
                Interrupt::RxFifo1NewMessage,
                Interrupt::TransmissionCompleted,
                Interrupt::TransmissionCancellationFinished,
                Interrupt::AcknowledgeError,
                Interrupt::FormatError,
                Interrupt::BusOff,
            ]
            .into_iter()
            .collect(),
        }
    }

    /// Receive FIFO a frame with identifier `id` is accepted into, if any.
    /// The first matching filter decides, as on the peripheral.
    pub fn route(&self, id: u32) -> Option<RxFifo> {
        self.filters
            .iter()
            .find(|f| f.matches(id))
            .and_then(|f| f.target())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::id::{MessageType, RoutingId};

    #[test]
    fn controller_filters_route_by_destination() {
        let bus = BusConfig::controller(MASTER_ADDRESS);
        let ty = MessageType::TIME_SYNC;

        let request = RoutingId::request(ty, 5, MASTER_ADDRESS);
        let response = RoutingId::response(ty, 5, MASTER_ADDRESS);
        let broadcast = RoutingId::broadcast(ty, 5);
        let other = RoutingId::request(ty, 5, 9);

        assert_eq!(bus.route(request.as_raw()), Some(RxFifo::Fifo0));
        assert_eq!(bus.route(broadcast.as_raw()), Some(RxFifo::Fifo0));
        assert_eq!(bus.route(response.as_raw()), Some(RxFifo::Fifo1));
        assert_eq!(bus.route(other.as_raw()), None);
    }

    #[test]
    fn controller_interrupts() {
        let bus = BusConfig::controller(MASTER_ADDRESS);
        assert!(bus.interrupts.rf0n());
        assert!(bus.interrupts.rf1n());
        assert!(bus.interrupts.bo());
        assert!(bus.interrupts.tc());
        assert_eq!(bus.interrupts.iter().count(), 7);
    }

    #[test]
    fn defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.clock_interval, Duration::millis(10_000));
        assert_eq!(config.local_address, MASTER_ADDRESS);
        assert!(!config.bus.mode.bit_rate_switching());
    }
}
