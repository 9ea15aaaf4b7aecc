use devnet_core::{Context, Packet, ReceiveError, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A device that stores every packet it receives.
#[derive(Debug, Default)]
pub struct Capture {
    packets: Mutex<Vec<Packet>>,
}

impl Capture {
    /// Creates a new capture.
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates a new capture behind a shared handle.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// The packets received so far, oldest first.
    pub fn packets(&self) -> Vec<Packet> {
        self.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// How many received packets carry the given command.
    pub fn count_command(&self, command: &str) -> usize {
        self.lock()
            .iter()
            .filter(|packet| packet.payload().command_name() == Some(command))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Packet>> {
        self.packets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forgets everything received so far.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Receiver for Capture {
    fn receive(&self, packet: &Packet, _context: &Context) -> Result<(), ReceiveError> {
        self.lock().push(packet.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devnet_core::{NetworkConfig, NetworkId, NetworkService, Payload, Registration};
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn keeps_recording_after_a_poisoned_lock() {
        let service = NetworkService::new(NetworkConfig::new().rng_seed(8));
        let capture = Capture::new_shared();
        let sender = service
            .register(Registration::new(NetworkId::WIRED, Capture::new()).frequency(0))
            .unwrap();
        let _capture = service
            .register(Registration::shared(NetworkId::WIRED, capture.clone()).frequency(0))
            .unwrap();

        let poisoned = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = capture.packets.lock().unwrap();
            panic!("poison the capture");
        }));
        assert!(poisoned.is_err());

        sender.broadcast(Payload::command("after")).unwrap();
        service.drain();
        assert_eq!(capture.count(), 1);
        assert_eq!(capture.count_command("after"), 1);
        capture.clear();
        assert_eq!(capture.count(), 0);
    }
}
