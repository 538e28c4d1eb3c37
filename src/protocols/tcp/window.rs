use super::{
    segment::SackEdge,
    seq::{seq_gt, seq_leq, seq_lt, seq_max},
};
use crate::clock::Time;
use std::{
    collections::{BTreeMap, VecDeque},
    time::Duration,
};

/// The most edges one acknowledgement carries.
pub const MAX_SACK_EDGES: usize = 4;

/// One segment's worth of data the sender is responsible for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub seq: u32,
    pub payload: Vec<u8>,
    pub fin: bool,
    /// When the segment was last handed to the link layer
    pub sent_at: Option<Time>,
    pub transmissions: u32,
    /// The receiver reported holding this segment
    pub sacked: bool,
    /// Waiting for the pacer to send it
    due: bool,
}

impl Outbound {
    fn new(seq: u32, payload: Vec<u8>, fin: bool) -> Self {
        Self {
            seq,
            payload,
            fin,
            sent_at: None,
            transmissions: 0,
            sacked: false,
            due: false,
        }
    }

    /// The sequence number just past this segment.
    pub fn end(&self) -> u32 {
        self.seq
            .wrapping_add(self.payload.len() as u32)
            .wrapping_add(self.fin as u32)
    }

    /// Whether this segment has been sent before.
    pub fn is_retransmission(&self) -> bool {
        self.transmissions > 1
    }
}

/// The sender's half of a connection.
///
/// Data is split into segments as it is queued. At most `capacity` segments
/// are in the window at a time; the rest wait in a backlog and enter the
/// window as earlier segments are acknowledged.
#[derive(Debug, Clone)]
pub struct SendingWindow {
    capacity: usize,
    /// The sequence number the next queued byte will get
    next_seq: u32,
    backlog: VecDeque<Outbound>,
    in_flight: VecDeque<Outbound>,
}

impl SendingWindow {
    pub fn new(capacity: usize, initial_seq: u32) -> Self {
        Self {
            capacity: capacity.max(1),
            next_seq: initial_seq,
            backlog: VecDeque::new(),
            in_flight: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
    }

    /// The next byte to be sent.
    pub fn sequence_number(&self) -> u32 {
        self.next_seq
    }

    /// The oldest sequence number not yet acknowledged.
    pub fn oldest_unacknowledged(&self) -> u32 {
        self.in_flight
            .front()
            .or_else(|| self.backlog.front())
            .map_or(self.next_seq, |segment| segment.seq)
    }

    /// Splits `data` into segments of at most `mss` bytes and queues them.
    /// Returns how many segments were created.
    pub fn push_data(&mut self, data: &[u8], mss: usize) -> usize {
        let mut count = 0;
        for chunk in data.chunks(mss.max(1)) {
            self.backlog
                .push_back(Outbound::new(self.next_seq, chunk.to_vec(), false));
            self.next_seq = self.next_seq.wrapping_add(chunk.len() as u32);
            count += 1;
        }
        count
    }

    /// Queues the end of the stream.
    pub fn push_fin(&mut self) {
        self.backlog
            .push_back(Outbound::new(self.next_seq, Vec::new(), true));
        self.next_seq = self.next_seq.wrapping_add(1);
    }

    /// Moves segments from the backlog into the window while there is room.
    /// Returns how many entered.
    pub fn refill(&mut self) -> usize {
        let mut count = 0;
        while self.in_flight.len() < self.capacity {
            let Some(mut segment) = self.backlog.pop_front() else {
                break;
            };
            segment.due = true;
            self.in_flight.push_back(segment);
            count += 1;
        }
        count
    }

    /// Removes every segment the cumulative acknowledgement `ack` covers and
    /// returns them. Acknowledging the same number twice removes nothing the
    /// second time.
    pub fn acknowledge(&mut self, ack: u32) -> Vec<Outbound> {
        let mut acknowledged = Vec::new();
        while let Some(front) = self.in_flight.front() {
            if !seq_leq(front.end(), ack) {
                break;
            }
            if let Some(segment) = self.in_flight.pop_front() {
                acknowledged.push(segment);
            }
        }
        acknowledged
    }

    /// Marks every segment wholly inside one of `edges` as held by the
    /// receiver, so it is never retransmitted.
    pub fn mark_sacked(&mut self, edges: &[SackEdge]) {
        for segment in self.in_flight.iter_mut() {
            let held = edges
                .iter()
                .any(|edge| seq_leq(edge.left, segment.seq) && seq_leq(segment.end(), edge.right));
            if held && segment.sent_at.is_some() {
                segment.sacked = true;
                segment.due = false;
            }
        }
    }

    /// Schedules every segment that has gone unacknowledged for at least
    /// `rto` to be sent again. Returns how many were scheduled.
    pub fn schedule_retransmissions(&mut self, now: Time, rto: Duration) -> usize {
        let mut count = 0;
        for segment in self.in_flight.iter_mut() {
            let expired = segment
                .sent_at
                .is_some_and(|sent_at| now.saturating_since(sent_at) >= rto);
            if expired && !segment.due && !segment.sacked {
                segment.due = true;
                count += 1;
            }
        }
        count
    }

    /// Takes the oldest segment waiting to be sent and records that it was
    /// sent at `now`.
    pub fn next_due(&mut self, now: Time) -> Option<Outbound> {
        let segment = self.in_flight.iter_mut().find(|segment| segment.due)?;
        segment.due = false;
        segment.sent_at = Some(now);
        segment.transmissions += 1;
        Some(segment.clone())
    }

    pub fn has_due(&self) -> bool {
        self.in_flight.iter().any(|segment| segment.due)
    }

    /// The segments currently in the window, oldest first.
    pub fn segments(&self) -> impl Iterator<Item = &Outbound> {
        self.in_flight.iter()
    }

    /// The number of segments in the window.
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// The number of segments waiting for room in the window.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Whether everything ever queued has been acknowledged.
    pub fn is_drained(&self) -> bool {
        self.in_flight.is_empty() && self.backlog.is_empty()
    }

    pub fn reset(&mut self, capacity: usize, initial_seq: u32) {
        *self = Self::new(capacity, initial_seq);
    }
}

/// What [`ReceivingWindow::receive`] made of a segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Receipt {
    /// Bytes that are now in order and ready for the application
    pub delivered: Vec<u8>,
    /// Nothing in the segment was new
    pub duplicate: bool,
    /// The peer's end of stream was reached
    pub fin: bool,
}

/// The receiver's half of a connection.
#[derive(Debug, Clone)]
pub struct ReceivingWindow {
    capacity: usize,
    ack_number: u32,
    /// Data beyond `ack_number`, keyed by sequence number
    buffer: BTreeMap<u32, Vec<u8>>,
    /// Disjoint, ordered blocks of `buffer`
    sack: Vec<SackEdge>,
    /// Where the peer's FIN sits, if it arrived out of order
    fin_at: Option<u32>,
}

impl ReceivingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ack_number: 0,
            buffer: BTreeMap::new(),
            sack: Vec::new(),
            fin_at: None,
        }
    }

    /// Starts the window just past the peer's connection request.
    pub fn synchronize(&mut self, initial_seq: u32) {
        self.ack_number = initial_seq.wrapping_add(1);
    }

    /// The next sequence number expected from the peer.
    pub fn ack_number(&self) -> u32 {
        self.ack_number
    }

    pub fn sack_edges(&self) -> &[SackEdge] {
        &self.sack
    }

    /// The number of segments the window can still buffer.
    pub fn advertised(&self) -> u16 {
        let free = self.capacity.saturating_sub(self.buffer.len()).max(1);
        free.min(u16::MAX as usize) as u16
    }

    /// Takes in a segment that occupies sequence space.
    pub fn receive(&mut self, seq: u32, payload: &[u8], fin: bool) -> Receipt {
        let mut receipt = Receipt::default();
        let end = seq.wrapping_add(payload.len() as u32);

        if seq_gt(seq, self.ack_number) {
            if !payload.is_empty() {
                if self.buffer.contains_key(&seq) {
                    receipt.duplicate = true;
                } else {
                    self.buffer.insert(seq, payload.to_vec());
                    self.record_sack_edge(seq, end);
                }
            }
            if fin {
                self.fin_at = Some(end);
            }
            return receipt;
        }

        let fresh = seq_lt(self.ack_number, end);
        let fin_now = fin && (fresh || end == self.ack_number);
        if !fresh && !fin_now {
            receipt.duplicate = true;
            return receipt;
        }
        if fresh {
            let skip = self.ack_number.wrapping_sub(seq) as usize;
            receipt.delivered.extend_from_slice(&payload[skip..]);
            self.ack_number = end;
        }
        if fin_now {
            self.fin_at = Some(end);
        }
        receipt.delivered.extend(self.merge_sack_edges());
        if self.fin_at == Some(self.ack_number) {
            self.ack_number = self.ack_number.wrapping_add(1);
            self.fin_at = None;
            receipt.fin = true;
        }
        receipt
    }

    /// Records that `[left, right)` is held beyond the acknowledgement
    /// number, merging it with any edge it touches.
    pub fn record_sack_edge(&mut self, left: u32, right: u32) {
        if left == right || seq_leq(right, self.ack_number) {
            return;
        }
        let ack = self.ack_number;
        let mut edge = SackEdge::new(left, right);
        let mut edges = Vec::with_capacity(self.sack.len() + 1);
        for existing in self.sack.drain(..) {
            if seq_lt(existing.right, edge.left) || seq_lt(edge.right, existing.left) {
                edges.push(existing);
            } else {
                let left = if seq_lt(existing.left, edge.left) {
                    existing.left
                } else {
                    edge.left
                };
                edge = SackEdge::new(left, seq_max(existing.right, edge.right));
            }
        }
        edges.push(edge);
        edges.sort_by_key(|edge| edge.left.wrapping_sub(ack));
        self.sack = edges;
    }

    /// Advances the acknowledgement number across every edge it has reached,
    /// removing those edges and returning the buffered bytes they covered.
    /// Running it again without new data changes nothing.
    pub fn merge_sack_edges(&mut self) -> Vec<u8> {
        let mut delivered = Vec::new();
        while let Some(edge) = self.sack.first().copied() {
            if seq_lt(self.ack_number, edge.left) {
                break;
            }
            self.sack.remove(0);
            if seq_lt(self.ack_number, edge.right) {
                delivered.extend(self.drain_buffer(edge.right));
                self.ack_number = edge.right;
            }
        }
        let ack = self.ack_number;
        self.buffer
            .retain(|seq, data| seq_lt(ack, seq.wrapping_add(data.len() as u32)));
        delivered
    }

    /// Takes the buffered bytes from the acknowledgement number up to `right`.
    fn drain_buffer(&mut self, right: u32) -> Vec<u8> {
        let mut out = Vec::new();
        let mut position = self.ack_number;
        while let Some(entry) = self.buffer.first_entry() {
            if !seq_lt(*entry.key(), right) {
                break;
            }
            let (seq, data) = entry.remove_entry();
            let end = seq.wrapping_add(data.len() as u32);
            if seq_leq(seq, position) && seq_lt(position, end) {
                out.extend_from_slice(&data[position.wrapping_sub(seq) as usize..]);
                position = end;
            }
        }
        out
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_data_by_mss() {
        let mut window = SendingWindow::new(20, 1);
        assert_eq!(window.push_data(&[7; 250], 100), 3);
        assert_eq!(window.refill(), 3);
        let sizes: Vec<_> = window.segments().map(|s| s.payload.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        let seqs: Vec<_> = window.segments().map(|s| s.seq).collect();
        assert_eq!(seqs, vec![1, 101, 201]);
        assert_eq!(window.sequence_number(), 251);
    }

    #[test]
    fn window_never_exceeds_capacity() {
        let mut window = SendingWindow::new(2, 1);
        window.push_data(&[0; 50], 10);
        assert_eq!(window.refill(), 2);
        assert_eq!(window.len(), 2);
        assert_eq!(window.backlog_len(), 3);

        assert_eq!(window.acknowledge(11).len(), 1);
        assert_eq!(window.refill(), 1);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn segments_are_acknowledged_once() {
        let mut window = SendingWindow::new(8, 1);
        window.push_data(&[0; 30], 10);
        window.refill();
        while window.next_due(Time::ZERO).is_some() {}

        assert_eq!(window.acknowledge(21).len(), 2);
        assert!(window.acknowledge(21).is_empty());
        assert!(window.acknowledge(15).is_empty());
        assert_eq!(window.oldest_unacknowledged(), 21);
        assert_eq!(window.acknowledge(31).len(), 1);
        assert!(window.is_drained());
    }

    #[test]
    fn expired_segments_are_resent_unless_sacked() {
        let rto = Duration::from_millis(200);
        let mut window = SendingWindow::new(8, 1);
        window.push_data(&[0; 30], 10);
        window.refill();
        while window.next_due(Time::ZERO).is_some() {}

        window.mark_sacked(&[SackEdge::new(11, 21)]);
        assert_eq!(window.schedule_retransmissions(Time::from_millis(100), rto), 0);
        assert_eq!(window.schedule_retransmissions(Time::from_millis(200), rto), 2);

        let resent = window.next_due(Time::from_millis(200));
        assert!(resent.as_ref().is_some_and(|s| s.seq == 1 && s.is_retransmission()));
        let resent = window.next_due(Time::from_millis(200));
        assert!(resent.is_some_and(|s| s.seq == 21));
        assert!(window.next_due(Time::from_millis(200)).is_none());
    }

    #[test]
    fn out_of_order_data_is_held_until_the_gap_fills() {
        let mut window = ReceivingWindow::new(8);
        window.synchronize(0);

        let receipt = window.receive(11, b"bbbbbbbbbb", false);
        assert!(receipt.delivered.is_empty());
        assert_eq!(window.sack_edges(), &[SackEdge::new(11, 21)]);
        assert_eq!(window.ack_number(), 1);

        let receipt = window.receive(1, b"aaaaaaaaaa", false);
        assert_eq!(receipt.delivered, b"aaaaaaaaaabbbbbbbbbb".to_vec());
        assert_eq!(window.ack_number(), 21);
        assert!(window.sack_edges().is_empty());

        let receipt = window.receive(1, b"aaaaaaaaaa", false);
        assert!(receipt.duplicate);
        assert!(receipt.delivered.is_empty());
    }

    #[test]
    fn merging_edges_is_idempotent() {
        let mut window = ReceivingWindow::new(8);
        window.synchronize(99);
        window.record_sack_edge(100, 150);
        window.merge_sack_edges();
        assert_eq!(window.ack_number(), 150);
        assert!(window.sack_edges().is_empty());

        window.merge_sack_edges();
        assert_eq!(window.ack_number(), 150);
    }

    #[test]
    fn adjacent_edges_coalesce() {
        let mut window = ReceivingWindow::new(8);
        window.synchronize(0);
        window.record_sack_edge(40, 50);
        window.record_sack_edge(20, 30);
        window.record_sack_edge(30, 40);
        window.record_sack_edge(70, 80);
        assert_eq!(
            window.sack_edges(),
            &[SackEdge::new(20, 50), SackEdge::new(70, 80)]
        );
    }

    #[test]
    fn fin_is_consumed_in_order() {
        let mut window = ReceivingWindow::new(8);
        window.synchronize(0);

        let receipt = window.receive(6, b"world", true);
        assert!(!receipt.fin);
        let receipt = window.receive(1, b"hello", false);
        assert_eq!(receipt.delivered, b"helloworld".to_vec());
        assert!(receipt.fin);
        assert_eq!(window.ack_number(), 12);

        assert!(window.receive(6, b"world", true).duplicate);
    }
}
