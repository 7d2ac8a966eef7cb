//! Routing identifiers carried in the 29-bit extended CAN ID
//!
//! Only the fields needed to route buffers are modelled here: source and
//! destination board addresses, the response flag and the message type.

use bitfield::bitfield;
use embedded_can::ExtendedId;

/// Address of a board on the expansion bus (7 bits)
pub type CanAddress = u8;

/// Address of the main controller board
pub const MASTER_ADDRESS: CanAddress = 0;
/// Destination address that every board accepts
pub const BROADCAST_ADDRESS: CanAddress = 0x7f;
/// Mask covering all valid board addresses
pub const BOARD_ADDRESS_MASK: u32 = 0x7f;

/// Bit position of the source address field
pub const SRC_ADDRESS_SHIFT: u32 = 0;
/// Bit position of the destination address field
pub const DST_ADDRESS_SHIFT: u32 = 7;
/// Bit set in the identifier of every response message
pub const RESPONSE_BIT: u32 = 1 << 14;
/// Bit position of the message type field
pub const MESSAGE_TYPE_SHIFT: u32 = 15;

/// Kind of message carried in a frame (12 bits)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MessageType(u16);

impl MessageType {
    /// Periodic time synchronisation broadcast
    pub const TIME_SYNC: Self = Self(0x010);
    /// Largest value that fits the message type field
    pub const MAX: u16 = 0xfff;

    /// Returns `None` if `raw` does not fit the 12-bit field.
    pub const fn new(raw: u16) -> Option<Self> {
        if raw <= Self::MAX {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Raw field value
    pub const fn as_raw(self) -> u16 {
        self.0
    }
}

bitfield! {
    /// Routing part of the extended identifier.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct RoutingId(u32);
    impl Debug;

    /// Address of the sending board
    pub u8, src, set_src: 6, 0;
    /// Address of the receiving board or [`BROADCAST_ADDRESS`]
    pub u8, dst, set_dst: 13, 7;
    /// Set on replies to a request
    pub is_response, set_response: 14;
    u16, message_type_raw, set_message_type_raw: 26, 15;
}

impl RoutingId {
    /// All fields zero
    pub const ZERO: Self = Self(0);

    /// Identifier of a message sent from `src` to every board.
    pub fn broadcast(message_type: MessageType, src: CanAddress) -> Self {
        Self::request(message_type, src, BROADCAST_ADDRESS)
    }

    /// Identifier of a request from `src` to `dst`.
    pub fn request(message_type: MessageType, src: CanAddress, dst: CanAddress) -> Self {
        let mut id = Self(0);
        id.set_message_type_raw(message_type.as_raw());
        id.set_src(src & BOARD_ADDRESS_MASK as u8);
        id.set_dst(dst & BOARD_ADDRESS_MASK as u8);
        id
    }

    /// Identifier of a response from `src` to `dst`.
    pub fn response(message_type: MessageType, src: CanAddress, dst: CanAddress) -> Self {
        let mut id = Self::request(message_type, src, dst);
        id.set_response(true);
        id
    }

    /// Takes the identifier bits of a received frame, dropping anything above
    /// bit 28.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw & ExtendedId::MAX.as_raw())
    }

    /// The whole 29-bit identifier
    pub fn as_raw(&self) -> u32 {
        self.0
    }

    /// Message type field
    pub fn message_type(&self) -> MessageType {
        MessageType(self.message_type_raw())
    }

    /// `true` if the destination is [`BROADCAST_ADDRESS`]
    pub fn is_broadcast(&self) -> bool {
        self.dst() == BROADCAST_ADDRESS
    }
}

impl From<ExtendedId> for RoutingId {
    fn from(id: ExtendedId) -> Self {
        Self(id.as_raw())
    }
}

impl From<RoutingId> for ExtendedId {
    fn from(id: RoutingId) -> Self {
        // Setters never reach above bit 28, so the value is always in range
        ExtendedId::new(id.0 & ExtendedId::MAX.as_raw()).unwrap_or(ExtendedId::ZERO)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn broadcast_layout() {
        let id = RoutingId::broadcast(MessageType::TIME_SYNC, MASTER_ADDRESS);
        assert_eq!(
            id.as_raw(),
            (0x010 << MESSAGE_TYPE_SHIFT) | (BOARD_ADDRESS_MASK << DST_ADDRESS_SHIFT)
        );
        assert!(id.is_broadcast());
        assert!(!id.is_response());
        assert_eq!(id.src(), MASTER_ADDRESS);
    }

    #[test]
    fn response_sets_flag_only() {
        let req = RoutingId::request(MessageType::TIME_SYNC, 3, MASTER_ADDRESS);
        let resp = RoutingId::response(MessageType::TIME_SYNC, 3, MASTER_ADDRESS);
        assert_eq!(resp.as_raw(), req.as_raw() | RESPONSE_BIT);
        assert!(resp.is_response());
        assert!(!req.is_response());
        assert_eq!(resp.dst(), MASTER_ADDRESS);
        assert_eq!(resp.src(), 3);
    }

    #[test]
    fn addresses_are_truncated_to_seven_bits() {
        let id = RoutingId::request(MessageType::TIME_SYNC, 0x85, 0xff);
        assert_eq!(id.src(), 0x05);
        assert_eq!(id.dst(), BROADCAST_ADDRESS);
    }

    #[test]
    fn raw_drops_bits_above_extended_range() {
        let id = RoutingId::from_raw(0xffff_ffff);
        assert_eq!(id.as_raw(), 0x1fff_ffff);
        let ext: ExtendedId = id.into();
        assert_eq!(ext, ExtendedId::MAX);
    }

    #[test]
    fn message_type_range() {
        assert!(MessageType::new(0xfff).is_some());
        assert!(MessageType::new(0x1000).is_none());
    }
}
