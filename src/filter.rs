//! Message filters
//!
//! Only extended-ID filters are used on the expansion bus; frames with a
//! standard ID are rejected by the global filter configuration.

use embedded_can::ExtendedId;

/// 29-bit filter in the peripheral's representation
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FilterExtendedId(pub [u32; 2]);

/// Message filter field for 29-bit RX messages
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExtFilter {
    /// The filter is skipped
    Disabled,
    /// Traditional filter/mask CAN filter
    Classic {
        /// Action to take on a matched element
        action: Action,
        /// ID filter
        filter: ExtendedId,
        /// ID mask
        mask: ExtendedId,
    },
}

impl ExtFilter {
    /// Builds a classic filter from raw identifier bits. Bits above the
    /// 29-bit range are ignored.
    pub fn classic(action: Action, filter: u32, mask: u32) -> Self {
        Self::Classic {
            action,
            filter: truncate(filter),
            mask: truncate(mask),
        }
    }

    /// `true` if a frame with identifier `id` would be accepted into a
    /// receive FIFO by this filter.
    pub fn matches(&self, id: u32) -> bool {
        let id = id & ExtendedId::MAX.as_raw();
        match *self {
            Self::Disabled => false,
            Self::Classic {
                action,
                filter,
                mask,
            } => action.stores() && id & mask.as_raw() == filter.as_raw() & mask.as_raw(),
        }
    }

    /// Receive FIFO a matching frame is stored in, if any
    pub fn target(&self) -> Option<crate::controller::RxFifo> {
        use crate::controller::RxFifo;
        let action = match *self {
            Self::Disabled => return None,
            Self::Classic { action, .. } => action,
        };
        match action {
            Action::StoreFifo0 => Some(RxFifo::Fifo0),
            Action::StoreFifo1 => Some(RxFifo::Fifo1),
            Action::Reject => None,
        }
    }
}

fn truncate(raw: u32) -> ExtendedId {
    ExtendedId::new(raw & ExtendedId::MAX.as_raw()).unwrap_or(ExtendedId::ZERO)
}

/// Filter element configurations
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    /// Store in RX FIFO 0 if filter matches
    StoreFifo0,
    /// Store in RX FIFO 1 if filter matches
    StoreFifo1,
    /// Reject ID if filter matches
    Reject,
}

impl Action {
    fn stores(self) -> bool {
        !matches!(self, Self::Reject)
    }
}

impl From<Action> for u32 {
    fn from(val: Action) -> Self {
        match val {
            Action::StoreFifo0 => 0x1,
            Action::StoreFifo1 => 0x2,
            Action::Reject => 0x3,
        }
    }
}

impl From<ExtFilter> for FilterExtendedId {
    fn from(val: ExtFilter) -> Self {
        let (f0, f1) = match val {
            ExtFilter::Disabled => (0, 0),
            ExtFilter::Classic {
                action,
                filter,
                mask,
            } => {
                let action: u32 = action.into();

                (action << 29 | filter.as_raw(), 2 << 30 | mask.as_raw())
            }
        };
        FilterExtendedId([f0, f1])
    }
}
