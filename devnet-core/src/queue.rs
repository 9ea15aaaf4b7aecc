use crate::{NetworkId, Packet};
use std::collections::VecDeque;

/// Position of a packet in submission order.
pub type Ticket = u64;

/// The FIFO backlog of packets waiting to be drained.
///
/// A single queue serves every network, so packets of one network are always
/// delivered in the order they were submitted.
#[derive(Debug, Default)]
pub struct DeliveryQueue {
    packets: VecDeque<(Ticket, Packet)>,
    next_ticket: Ticket,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends a packet to the tail of the queue.
    pub fn push(&mut self, packet: Packet) -> Ticket {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.packets.push_back((ticket, packet));
        ticket
    }

    /// The ticket the next pushed packet will get. Every packet already in
    /// the queue has a smaller ticket.
    pub fn mark(&self) -> Ticket {
        self.next_ticket
    }

    /// Takes the packet at the head of the queue.
    pub fn pop(&mut self) -> Option<Packet> {
        self.packets.pop_front().map(|(_, packet)| packet)
    }

    /// Takes the head packet only if it was pushed before `mark`.
    pub fn pop_before(&mut self, mark: Ticket) -> Option<Packet> {
        match self.packets.front() {
            Some((ticket, _)) if *ticket < mark => self.pop(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// The number of packets waiting on `network`.
    pub fn pending_on(&self, network: NetworkId) -> usize {
        self.packets
            .iter()
            .filter(|(_, packet)| packet.network() == network)
            .count()
    }

    /// Discards every packet of `network` without delivering it. Returns how
    /// many were discarded.
    pub fn discard(&mut self, network: NetworkId) -> usize {
        let before = self.packets.len();
        self.packets.retain(|(_, packet)| packet.network() != network);
        before - self.packets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Payload;

    fn packet(network: u32, n: u64) -> Packet {
        Packet::broadcast(NetworkId::new(network), 0, "S", Payload::new().with("n", n))
    }

    fn numbers(queue: &mut DeliveryQueue) -> Vec<u64> {
        std::iter::from_fn(|| queue.pop())
            .map(|packet| packet.payload().get("n").unwrap().ok_uint().unwrap())
            .collect()
    }

    #[test]
    fn pops_in_submission_order() {
        let mut queue = DeliveryQueue::new();
        for n in 0..5 {
            queue.push(packet(1, n));
        }
        assert_eq!(numbers(&mut queue), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_before_stops_at_mark() {
        let mut queue = DeliveryQueue::new();
        queue.push(packet(1, 0));
        let mark = queue.mark();
        queue.push(packet(1, 1));
        assert!(queue.pop_before(mark).is_some());
        assert!(queue.pop_before(mark).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn discard_keeps_other_networks_in_order() {
        let mut queue = DeliveryQueue::new();
        for n in 0..6 {
            queue.push(packet((n % 2) as u32, n));
        }
        assert_eq!(queue.pending_on(NetworkId::new(1)), 3);
        assert_eq!(queue.discard(NetworkId::new(1)), 3);
        assert_eq!(queue.len(), 3);
        assert_eq!(numbers(&mut queue), vec![0, 2, 4]);
    }
}
