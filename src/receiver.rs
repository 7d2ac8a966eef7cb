//! Receive FIFO dispatch

use crate::controller::{Clock, Controller, RxFifo};
use crate::pool::Buffer;
use crate::transport::Transport;
use crate::wake::Waiter;
use log::{debug, trace};

/// Consumer of received messages
///
/// The handler takes ownership of the buffer and frees it by dropping it
/// or passing it on.
pub trait MessageHandler<'a, const N: usize> {
    /// Called for every data frame with an extended identifier.
    fn handle(&mut self, buffer: Buffer<'a, N>);
}

impl<'a, const N: usize, F> MessageHandler<'a, N> for F
where
    F: FnMut(Buffer<'a, N>),
{
    fn handle(&mut self, buffer: Buffer<'a, N>) {
        self(buffer)
    }
}

/// Receive task for one FIFO
///
/// Created by [`Transport::receiver`]. Dropping it frees the FIFO for a new
/// receiver.
pub struct Receiver<'a, C, K, H, const N: usize> {
    pub(crate) transport: &'a Transport<C, K, N>,
    pub(crate) fifo: RxFifo,
    pub(crate) waiter: Waiter<'a>,
    pub(crate) handler: H,
}

impl<'a, C, K, H, const N: usize> Receiver<'a, C, K, H, N>
where
    C: Controller,
    K: Clock,
    H: MessageHandler<'a, N>,
{
    /// FIFO this task drains
    pub fn fifo(&self) -> RxFifo {
        self.fifo
    }

    /// Drains the FIFO, then sleeps until the interrupt handler reports a
    /// new message. The fill level is re-read on every pass, so frames that
    /// arrive between interrupts are not lost.
    ///
    /// When the pool is exhausted the element stays in the FIFO and the read
    /// is retried after `rx_retry_delay`.
    pub async fn run(&mut self) -> ! {
        let t = self.transport;
        let fifo = self.fifo;
        loop {
            if t.with_controller(|c| c.rx_status(fifo)).is_empty() {
                self.waiter.wait().await;
                continue;
            }

            let Some(mut buffer) = t.allocate() else {
                debug!("{:?}: no free buffer, retrying", fifo);
                t.clock.delay(t.config.rx_retry_delay).await;
                continue;
            };

            // The FIFO may have been reset by bus-off recovery since the
            // check above
            let element = t.with_controller(|c| {
                let status = c.rx_status(fifo);
                if status.is_empty() {
                    return None;
                }
                let element = c.read_rx(fifo, status.get_index);
                c.acknowledge_rx(fifo, status.get_index);
                Some(element)
            });
            let Some(element) = element else {
                continue;
            };

            if element.copy_into(&mut buffer) {
                self.handler.handle(buffer);
            } else {
                trace!("{:?}: dropped frame {:#x}", fifo, element.id());
            }
        }
    }
}
