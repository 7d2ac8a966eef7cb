//! Frames received from the bus.

use super::*;

/// Received frame in the peripheral's representation
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Element(RawElement);

impl Element {
    /// Builds an element from its two header words and data field, as read
    /// from the peripheral's receive FIFO.
    pub fn from_raw(header: [u32; 2], data: [u8; MAX_PAYLOAD]) -> Self {
        Self(RawElement { header, data })
    }

    /// Builds a data frame carrying `data`. Drivers that decode elements
    /// themselves and simulated buses use this.
    pub fn data_frame(id: u32, extended: bool, data: &[u8]) -> Result<Self, TooMuchData> {
        let dlc = len_to_dlc(data.len())?;
        let mut raw = RawElement {
            header: [0; 2],
            data: [0; MAX_PAYLOAD],
        };
        raw.data[..data.len()].copy_from_slice(data);
        raw.header[0] = id & 0x1fff_ffff;
        if extended {
            raw.header[0] |= RawElement::XTD;
        }
        raw.header[1] = (dlc as u32) << 16 | RawElement::FDF;
        Ok(Self(raw))
    }

    /// Builds a remote frame requesting `dlc`.
    pub fn remote_frame(id: u32, extended: bool, dlc: u8) -> Self {
        let mut raw = RawElement {
            header: [id & 0x1fff_ffff | RawElement::RTR, ((dlc & 0xf) as u32) << 16],
            data: [0; MAX_PAYLOAD],
        };
        if extended {
            raw.header[0] |= RawElement::XTD;
        }
        Self(raw)
    }

    /// Identifier bits; for a standard frame the 11-bit ID sits in bits 18-28
    pub fn id(&self) -> u32 {
        self.0.id()
    }

    /// Data length code
    pub fn dlc(&self) -> u8 {
        self.0.dlc()
    }

    /// Data length in bytes
    pub fn decoded_len(&self) -> usize {
        dlc_to_len(self.dlc())
    }

    /// Check if the frame uses an extended (29-bit) ID
    pub fn is_extended(&self) -> bool {
        self.0.is_extended()
    }

    /// Remote Transmission Request
    pub fn is_remote_frame(&self) -> bool {
        self.0.is_remote_frame()
    }

    /// True if the header indicates that the frame uses the CAN FD format
    pub fn fd_format(&self) -> bool {
        self.0.fd_format()
    }

    /// Full data field regardless of the length code
    pub fn raw_data(&self) -> &[u8; MAX_PAYLOAD] {
        &self.0.data
    }

    /// Copies the frame into `buffer`. Returns `false`, leaving `buffer`
    /// untouched, for frames the transport does not forward: remote frames
    /// and frames with a standard identifier.
    pub fn copy_into(&self, buffer: &mut MessageBuffer) -> bool {
        if !self.is_extended() || self.is_remote_frame() {
            return false;
        }
        let len = self.decoded_len();
        buffer.id = RoutingId::from_raw(self.id());
        buffer.payload[..len].copy_from_slice(&self.0.data[..len]);
        buffer.data_length = len as u8;
        true
    }
}
