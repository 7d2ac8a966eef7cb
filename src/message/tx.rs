//! Frames to be sent on the bus

use super::*;

/// Frame in the peripheral's transmit buffer representation
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Element(RawElement);

impl Element {
    /// Encodes `buffer` as an extended-ID CAN FD frame. The payload is
    /// padded with zeros up to the length the data length code describes.
    ///
    /// If `store_tx_event` is set, the peripheral records a transmit event
    /// for the frame.
    pub fn fd_frame(
        buffer: &MessageBuffer,
        bit_rate_switching: bool,
        store_tx_event: bool,
    ) -> Result<Self, TooMuchData> {
        let mut t1 = RawElement::FDF;
        if bit_rate_switching {
            t1 |= RawElement::BRS;
        }
        Self::encode(buffer, t1, store_tx_event)
    }

    /// Encodes `buffer` as an extended-ID classic CAN frame. Fails for
    /// payloads over 8 bytes.
    pub fn classic_frame(buffer: &MessageBuffer, store_tx_event: bool) -> Result<Self, TooMuchData> {
        if buffer.data_length() > 8 {
            return Err(TooMuchData);
        }
        Self::encode(buffer, 0, store_tx_event)
    }

    fn encode(buffer: &MessageBuffer, mut t1: u32, store_tx_event: bool) -> Result<Self, TooMuchData> {
        let len = buffer.data_length();
        let dlc = len_to_dlc(len)?;
        let mut data = [0; MAX_PAYLOAD];
        data[..len].copy_from_slice(buffer.data());

        let t0 = buffer.id.as_raw() | RawElement::XTD;
        t1 |= ((dlc & 0xf) as u32) << 16;
        if store_tx_event {
            t1 |= RawElement::EFC;
        }
        Ok(Self(RawElement {
            header: [t0, t1],
            data,
        }))
    }

    /// Header words in the order the peripheral expects them
    pub fn header(&self) -> [u32; 2] {
        self.0.header
    }

    /// Data field, padded to the coded length
    pub fn data(&self) -> &[u8] {
        &self.0.data[..dlc_to_len(self.0.dlc())]
    }

    /// Identifier bits
    pub fn id(&self) -> u32 {
        self.0.id()
    }

    /// Data length code
    pub fn dlc(&self) -> u8 {
        self.0.dlc()
    }

    /// Check if the frame uses an extended (29-bit) ID
    pub fn is_extended(&self) -> bool {
        self.0.is_extended()
    }

    /// True if the frame uses the CAN FD format
    pub fn fd_format(&self) -> bool {
        self.0.fd_format()
    }

    /// `true` if bit rate switching is used
    pub fn bit_rate_switching(&self) -> bool {
        self.0.bit_rate_switching()
    }
}
