//! Periodic time sync broadcast

use crate::controller::{Clock, Controller, TxSlot};
use crate::message::TimeSync;
use crate::transport::Transport;
use log::debug;

/// Time sync task
///
/// Created by [`Transport::broadcaster`].
pub struct Broadcaster<'a, C, K, const N: usize> {
    pub(crate) transport: &'a Transport<C, K, N>,
}

impl<C: Controller, K: Clock, const N: usize> Broadcaster<'_, C, K, N> {
    /// Broadcasts the clock's timestamp every `clock_interval`, starting
    /// immediately. Ticks are scheduled from a fixed start time, so a slow
    /// send does not shift later ticks. A tick that finds the pool empty is
    /// skipped.
    pub async fn run(&mut self) -> ! {
        let t = self.transport;
        let mut next = t.clock.now();
        loop {
            match t.allocate() {
                Some(mut buffer) => {
                    TimeSync {
                        time_sent: t.clock.timestamp(),
                    }
                    .write(&mut buffer, t.local_address());
                    let _ = t.transmit_and_free(TxSlot::TimeSync, buffer).await;
                }
                None => debug!("time sync skipped, no free buffer"),
            }
            next += t.config.clock_interval;
            t.clock.delay_until(next).await;
        }
    }
}
