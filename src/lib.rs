#![no_std]
#![warn(missing_docs)]
//! # expansion-can
//!
//! ## Overview
//! Transport core of the CAN FD expansion bus that links the main controller
//! board with its peripheral boards.
//!
//! It provides the following features:
//!
//! - a fixed pool of message buffers with move-only [`Buffer`] handles
//! - a FIFO motion queue drained by a [`Sender`] task through a dedicated
//!   transmit buffer
//! - an emergency path ([`Transport::send_urgent`]) on its own transmit
//!   buffer
//! - a periodic time sync [`Broadcaster`]
//! - interrupt-driven [`Receiver`] tasks, one per receive FIFO
//! - fault counting and automatic reinitialisation after bus-off
//!
//! The peripheral driver is not part of this crate. A platform HAL implements
//! [`Controller`] for its CAN peripheral and [`Clock`] for its time base.
//!
//! ## Usage
//!
//! A single [`Transport`] is created at start-up, usually in a `static`,
//! and shared with the tasks and the interrupt handler:
//!
//! ```ignore
//! static TRANSPORT: StaticCell<Transport<Can0, SysClock, 40>> = StaticCell::new();
//!
//! let transport = TRANSPORT.init(Transport::new(can0, clock, TransportConfig::default())?);
//! spawner.spawn(sender_task(transport.sender().unwrap()))?;
//! spawner.spawn(broadcast_task(transport.broadcaster().unwrap()))?;
//! spawner.spawn(receive_task(transport.receiver(RxFifo::Fifo0, dispatch).unwrap()))?;
//!
//! #[interrupt]
//! fn CAN0() {
//!     TRANSPORT.on_interrupt();
//! }
//! ```
//!
//! Each task simply awaits the runner's `run` method. Task priorities are
//! chosen by spawning runners on executors of different priority.
//!
//! Outgoing traffic starts from [`Transport::allocate`]:
//!
//! ```ignore
//! if let Some(mut buffer) = transport.allocate() {
//!     buffer.setup_request(MOVE, transport.local_address(), board);
//!     buffer.set_data(&command)?;
//!     transport.send_motion(buffer);
//! }
//! ```
//!
//! ## Logging
//!
//! Diagnostics go through the [`log`] facade. With the `defmt` feature the
//! public plain-data types also implement `defmt::Format`.

pub mod broadcast;
pub mod config;
pub mod controller;
pub mod filter;
pub mod id;
pub mod interrupt;
pub mod message;
pub mod pool;
pub mod queue;
pub mod receiver;
pub mod transport;
pub mod wake;

pub use broadcast::Broadcaster;
pub use config::{BusConfig, Mode, TransportConfig};
pub use controller::{Clock, Controller, ControllerError, RxFifo, RxFifoStatus, TxSlot};
pub use id::{CanAddress, MessageType, RoutingId};
pub use interrupt::{BusState, FaultCounters, Interrupt, InterruptSet};
pub use message::{MessageBuffer, TimeSync, TooMuchData};
pub use pool::{Buffer, Pool};
pub use queue::Sender;
pub use receiver::{MessageHandler, Receiver};
pub use transport::{TransmitError, Transport};
pub use wake::{WakeSlot, Waiter};
