use devnet_core::{Context, Frequency, Packet, ReceiveError, Receiver};
use std::sync::atomic::{AtomicUsize, Ordering};

/// The command sensors raise when they trip.
pub const ALARM: &str = "alarm";

/// A device that rebroadcasts every alarm it hears onto another frequency.
///
/// Forwarded packets keep the alarm payload and leave from the relay's own
/// address. Non-alarm packets are dropped.
#[derive(Debug)]
pub struct AlarmRelay {
    output: Frequency,
    forwarded: AtomicUsize,
}

impl AlarmRelay {
    pub fn new(output: Frequency) -> Self {
        Self {
            output,
            forwarded: AtomicUsize::new(0),
        }
    }

    pub fn forwarded(&self) -> usize {
        self.forwarded.load(Ordering::Relaxed)
    }
}

impl Receiver for AlarmRelay {
    fn receive(&self, packet: &Packet, context: &Context) -> Result<(), ReceiveError> {
        if packet.payload().command_name() != Some(ALARM) {
            return Ok(());
        }
        context.broadcast(Some(self.output), packet.payload().clone())?;
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
