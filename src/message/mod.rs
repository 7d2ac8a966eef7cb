//! Message buffers and frame elements
//!
//! [`MessageBuffer`] is the unit of work that travels through the pool,
//! queues and handlers. [`rx::Element`] and [`tx::Element`] are the
//! peripheral's representation of a frame, exchanged with the
//! [`Controller`](crate::controller::Controller).

pub mod rx;
pub mod tx;

use crate::id::{CanAddress, MessageType, RoutingId};
use core::fmt;

/// Largest payload of a CAN FD frame
pub const MAX_PAYLOAD: usize = 64;

/// Data does not fit in the backing buffer
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TooMuchData;

/// One message: routing identifier, length and raw payload.
#[derive(Clone)]
pub struct MessageBuffer {
    /// Routing identifier
    pub id: RoutingId,
    data_length: u8,
    payload: [u8; MAX_PAYLOAD],
}

impl MessageBuffer {
    /// An empty message with a zero identifier
    pub const fn new() -> Self {
        Self {
            id: RoutingId::ZERO,
            data_length: 0,
            payload: [0; MAX_PAYLOAD],
        }
    }

    /// Payload length in bytes
    pub fn data_length(&self) -> usize {
        self.data_length.into()
    }

    /// Sets the payload length without touching the payload bytes.
    pub fn set_data_length(&mut self, len: usize) -> Result<(), TooMuchData> {
        if len > MAX_PAYLOAD {
            return Err(TooMuchData);
        }
        self.data_length = len as u8;
        Ok(())
    }

    /// The valid part of the payload
    pub fn data(&self) -> &[u8] {
        &self.payload[..self.data_length()]
    }

    /// Copies `data` into the payload and sets the length accordingly.
    pub fn set_data(&mut self, data: &[u8]) -> Result<(), TooMuchData> {
        self.set_data_length(data.len())?;
        self.payload[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// The whole payload region regardless of the current length
    pub fn raw(&self) -> &[u8; MAX_PAYLOAD] {
        &self.payload
    }

    /// Mutable access to the whole payload region
    pub fn raw_mut(&mut self) -> &mut [u8; MAX_PAYLOAD] {
        &mut self.payload
    }

    /// Addresses the message to every board and clears the payload length.
    pub fn setup_broadcast(&mut self, message_type: MessageType, src: CanAddress) {
        self.id = RoutingId::broadcast(message_type, src);
        self.data_length = 0;
    }

    /// Addresses the message to `dst` and clears the payload length.
    pub fn setup_request(&mut self, message_type: MessageType, src: CanAddress, dst: CanAddress) {
        self.id = RoutingId::request(message_type, src, dst);
        self.data_length = 0;
    }

    pub(crate) fn clear(&mut self) {
        self.id = RoutingId::ZERO;
        self.data_length = 0;
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBuffer")
            .field("id", &self.id)
            .field("data", &self.data())
            .finish()
    }
}

/// Payload of a [`MessageType::TIME_SYNC`] broadcast
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimeSync {
    /// Step clock value at the moment the message was built
    pub time_sent: u32,
}

impl TimeSync {
    /// Encoded payload length
    pub const LEN: usize = 4;

    /// Sets up `buffer` as a time sync broadcast from `src`.
    pub fn write(&self, buffer: &mut MessageBuffer, src: CanAddress) {
        buffer.setup_broadcast(MessageType::TIME_SYNC, src);
        buffer.payload[..Self::LEN].copy_from_slice(&self.time_sent.to_le_bytes());
        buffer.data_length = Self::LEN as u8;
    }

    /// Decodes the payload of a time sync broadcast.
    pub fn read(buffer: &MessageBuffer) -> Option<Self> {
        if buffer.id.message_type() != MessageType::TIME_SYNC {
            return None;
        }
        let bytes: [u8; Self::LEN] = buffer.data().get(..Self::LEN)?.try_into().ok()?;
        Some(Self {
            time_sent: u32::from_le_bytes(bytes),
        })
    }
}

/// Frame element in the peripheral's representation
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct RawElement {
    header: [u32; 2],
    data: [u8; MAX_PAYLOAD],
}

impl RawElement {
    const RTR: u32 = 1 << 29;
    const XTD: u32 = 1 << 30;
    const BRS: u32 = 1 << 20;
    const FDF: u32 = 1 << 21;
    const EFC: u32 = 1 << 23;

    fn id(&self) -> u32 {
        self.header[0] & 0x1fff_ffff
    }

    fn dlc(&self) -> u8 {
        ((self.header[1] >> 16) & 0xf) as u8
    }

    fn is_extended(&self) -> bool {
        self.header[0] & Self::XTD != 0
    }

    fn is_remote_frame(&self) -> bool {
        self.header[0] & Self::RTR != 0
    }

    fn fd_format(&self) -> bool {
        self.header[1] & Self::FDF != 0
    }

    fn bit_rate_switching(&self) -> bool {
        self.header[1] & Self::BRS != 0
    }
}

/// Finds the smallest data length code that encodes at least `len` bytes
pub fn len_to_dlc(len: usize) -> Result<u8, TooMuchData> {
    match len {
        0..=8 => Ok(len as u8),
        9..=12 => Ok(9),
        13..=16 => Ok(10),
        17..=20 => Ok(11),
        21..=24 => Ok(12),
        25..=32 => Ok(13),
        33..=48 => Ok(14),
        49..=MAX_PAYLOAD => Ok(15),
        _ => Err(TooMuchData),
    }
}

/// Converts a data length code to a length in bytes. The bus runs in FD
/// mode, so codes above 8 always take the FD meaning.
pub fn dlc_to_len(dlc: u8) -> usize {
    match dlc {
        0..=8 => dlc.into(),
        9 => 12,
        10 => 16,
        11 => 20,
        12 => 24,
        13 => 32,
        14 => 48,
        15.. => 64,
    }
}
