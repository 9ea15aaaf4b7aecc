use devnet_core::{payload::MESSAGE, Context, Packet, Payload, ReceiveError, Receiver};
use std::sync::atomic::{AtomicUsize, Ordering};

/// The command that asks a device to identify itself.
pub const PING: &str = "ping";
/// The command of the answer to a [`PING`].
pub const PING_RESPONSE: &str = "ping_response";

/// A device that answers pings.
///
/// Every packet with `command = ping` is answered, on the frequency it arrived
/// on, with `command = ping_response` and a `message` naming the device. Other
/// packets are ignored.
#[derive(Debug)]
pub struct PingResponder {
    message: String,
    answered: AtomicUsize,
}

impl PingResponder {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            answered: AtomicUsize::new(0),
        }
    }

    /// How many pings this device has answered.
    pub fn answered(&self) -> usize {
        self.answered.load(Ordering::Relaxed)
    }
}

impl Receiver for PingResponder {
    fn receive(&self, packet: &Packet, context: &Context) -> Result<(), ReceiveError> {
        if packet.payload().command_name() != Some(PING) {
            return Ok(());
        }
        let response = Payload::command(PING_RESPONSE).with(MESSAGE, self.message.as_str());
        context.reply(packet, response)?;
        self.answered.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            responder = %context.recipient().address,
            pinger = %packet.sender(),
            "Pong"
        );
        Ok(())
    }
}
