use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::{
    buffer::PacketBuffer,
    packet::{DeviceId, Packet},
    quantities::Tick,
};

/// Flow-control state a device keeps per peer: the configured send rate
/// toward the peer, the credit slice of the local input buffer reserved for
/// traffic arriving from the peer, the currently usable permission to send to
/// the peer, and the queue of packets waiting on that permission.
#[derive(Debug)]
pub struct Peer {
    id: DeviceId,
    send_rate: u32,
    credit: u32,
    target_credit: u32,
    out_buffer: PacketBuffer,
}

impl Peer {
    fn new(id: DeviceId, send_rate: u32) -> Peer {
        Peer {
            id,
            send_rate,
            credit: 0,
            target_credit: 0,
            out_buffer: PacketBuffer::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &DeviceId {
        &self.id
    }

    #[must_use]
    pub const fn send_rate(&self) -> u32 {
        self.send_rate
    }

    #[must_use]
    pub const fn credit(&self) -> u32 {
        self.credit
    }

    #[must_use]
    pub const fn target_credit(&self) -> u32 {
        self.target_credit
    }

    #[must_use]
    pub const fn out_buffer(&self) -> &PacketBuffer {
        &self.out_buffer
    }

    pub(crate) fn set_credit(&mut self, credit: u32) {
        self.credit = credit;
    }

    pub(crate) fn set_target_credit(&mut self, target_credit: u32) {
        self.target_credit = target_credit;
    }

    /// Returns one unit of send permission, up to the ceiling the receiving
    /// peer has allocated for this flow.
    pub(crate) fn replenish_target_credit(&mut self, ceiling: u32) {
        self.target_credit = (self.target_credit + 1).min(ceiling);
    }

    pub(crate) fn spend_target_credit(&mut self) {
        debug_assert!(self.target_credit > 0);
        self.target_credit -= 1;
    }

    pub(crate) fn freeze(&mut self) {
        self.send_rate = 0;
    }

    pub(crate) fn push_outbound(&mut self, packet: Packet) {
        self.out_buffer.push(packet);
    }

    pub(crate) fn pop_outbound(&mut self) -> Option<Packet> {
        self.out_buffer.pop()
    }
}

/// One endpoint on the switch. Owns its input buffer, one output buffer per
/// peer, and the per-tick series the visualization layer consumes.
///
/// Peers iterate in sorted id order (the order of the config's send-rate
/// table); results are reproducible because that order never changes during
/// a run.
#[derive(Debug)]
pub struct Device {
    id: DeviceId,
    capacity: usize,
    process_rate: u32,
    peers: Vec<Peer>,
    peer_index: FxHashMap<DeviceId, usize>,
    in_buffer: PacketBuffer,
    processed: u64,
    buffer_occupancy: Vec<usize>,
    class_occupancy: Vec<Vec<usize>>,
    output_buffer_size: Vec<usize>,
    dropped_packets: BTreeMap<Tick, u32>,
}

impl Device {
    /// The input buffer holds twice the configured nominal capacity; the
    /// doubled value is what credit allocation divides among peers.
    #[must_use]
    pub fn new(
        id: DeviceId,
        buffer_capacity: usize,
        send_rates: &BTreeMap<DeviceId, u32>,
        process_rate: u32,
        class_count: usize,
    ) -> Device {
        let peers: Vec<Peer> = send_rates
            .iter()
            .map(|(peer, rate)| Peer::new(peer.clone(), *rate))
            .collect();
        let peer_index = peers
            .iter()
            .enumerate()
            .map(|(index, peer)| (peer.id().clone(), index))
            .collect();
        Device {
            id,
            capacity: buffer_capacity * 2,
            process_rate,
            peers,
            peer_index,
            in_buffer: PacketBuffer::new(),
            processed: 0,
            buffer_occupancy: Vec::new(),
            class_occupancy: vec![Vec::new(); class_count],
            output_buffer_size: Vec::new(),
            dropped_packets: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &DeviceId {
        &self.id
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub const fn process_rate(&self) -> u32 {
        self.process_rate
    }

    #[must_use]
    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn peer_at(&self, index: usize) -> &Peer {
        &self.peers[index]
    }

    #[must_use]
    pub fn peer(&self, id: &DeviceId) -> Option<&Peer> {
        let index = self.peer_index.get(id).copied()?;
        Some(&self.peers[index])
    }

    pub(crate) fn peer_at_mut(&mut self, index: usize) -> &mut Peer {
        &mut self.peers[index]
    }

    pub(crate) fn peer_mut(&mut self, id: &DeviceId) -> Option<&mut Peer> {
        let index = self.peer_index.get(id).copied()?;
        Some(&mut self.peers[index])
    }

    #[must_use]
    pub const fn in_buffer(&self) -> &PacketBuffer {
        &self.in_buffer
    }

    /// Accepts the packet if the input buffer has a free slot, recording a
    /// zero-drop entry for the tick if none exists yet. A full buffer counts
    /// one drop against the tick and hands the packet back so the caller can
    /// reinject it on the original sender's outbound queue.
    pub fn receive_packet(&mut self, packet: Packet, time: Tick) -> Option<Packet> {
        if self.in_buffer.len() < self.capacity {
            self.in_buffer.push(packet);
            self.dropped_packets.entry(time).or_insert(0);
            None
        } else {
            *self.dropped_packets.entry(time).or_insert(0) += 1;
            Some(packet)
        }
    }

    pub(crate) fn pop_input(&mut self) -> Option<Packet> {
        let packet = self.in_buffer.pop();
        if packet.is_some() {
            self.processed += 1;
        }
        packet
    }

    /// Appends this tick's input occupancy samples: the aggregate count and
    /// one count per packet class.
    pub fn track_buffer(&mut self) {
        self.buffer_occupancy.push(self.in_buffer.len());
        let mut counts = vec![0_usize; self.class_occupancy.len()];
        for packet in self.in_buffer.iter() {
            counts[packet.class().index()] += 1;
        }
        for (series, count) in self.class_occupancy.iter_mut().zip(counts) {
            series.push(count);
        }
    }

    /// Appends this tick's aggregate outbound backlog sample.
    pub fn track_output_buffer(&mut self) {
        self.output_buffer_size.push(self.total_output_backlog());
    }

    #[must_use]
    pub fn total_output_backlog(&self) -> usize {
        self.peers.iter().map(|peer| peer.out_buffer.len()).sum()
    }

    #[must_use]
    pub fn buffer_occupancy(&self) -> &[usize] {
        &self.buffer_occupancy
    }

    #[must_use]
    pub fn class_occupancy(&self) -> &[Vec<usize>] {
        &self.class_occupancy
    }

    #[must_use]
    pub fn output_buffer_size(&self) -> &[usize] {
        &self.output_buffer_size
    }

    #[must_use]
    pub const fn dropped_packets(&self) -> &BTreeMap<Tick, u32> {
        &self.dropped_packets
    }

    #[must_use]
    pub fn dropped_total(&self) -> u64 {
        self.dropped_packets.values().map(|count| u64::from(*count)).sum()
    }

    #[must_use]
    pub const fn processed(&self) -> u64 {
        self.processed
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::{
        packet::{ClassTable, DeviceId, Packet, PacketClass, PacketFactory},
        quantities::{Priority, Tick},
    };

    use super::Device;

    fn table() -> ClassTable {
        ClassTable::new([
            PacketClass {
                name: "bulk".to_owned(),
                frequency: 1,
                priority: Priority::new(0),
                size: 1.0,
            },
            PacketClass {
                name: "urgent".to_owned(),
                frequency: 1,
                priority: Priority::new(9),
                size: 0.1,
            },
        ])
    }

    fn device(buffer_capacity: usize) -> Device {
        let mut send_rates = BTreeMap::new();
        send_rates.insert(DeviceId::from("b"), 1);
        Device::new(DeviceId::from("a"), buffer_capacity, &send_rates, 1, 2)
    }

    fn mint(factory: &mut PacketFactory, class_index: usize) -> Packet {
        let table = table();
        let (class_id, class) = table.iter().nth(class_index).unwrap();
        factory.mint(
            class_id,
            class,
            DeviceId::from("b"),
            DeviceId::from("a"),
            Tick::ZERO,
        )
    }

    #[test]
    fn capacity_is_double_the_configured_value() {
        assert_eq!(device(2).capacity(), 4);
    }

    #[test]
    fn class_series_exist_before_any_traffic() {
        let device = device(2);
        assert_eq!(device.class_occupancy().len(), 2);
        assert!(device.class_occupancy().iter().all(Vec::is_empty));
    }

    #[test]
    fn receive_fills_then_rejects_at_capacity() {
        let mut factory = PacketFactory::new();
        let mut device = device(1);
        assert!(device.receive_packet(mint(&mut factory, 0), Tick::ZERO).is_none());
        assert!(device.receive_packet(mint(&mut factory, 0), Tick::ZERO).is_none());
        let rejected = device.receive_packet(mint(&mut factory, 0), Tick::ZERO);
        assert!(rejected.is_some());
        assert_eq!(device.in_buffer().len(), device.capacity());
        assert_eq!(device.dropped_packets()[&Tick::ZERO], 1);
    }

    #[test]
    fn accepting_after_a_drop_keeps_the_tick_count() {
        let mut factory = PacketFactory::new();
        let mut device = device(1);
        device.receive_packet(mint(&mut factory, 0), Tick::ZERO);
        device.receive_packet(mint(&mut factory, 0), Tick::ZERO);
        assert!(device.receive_packet(mint(&mut factory, 0), Tick::ZERO).is_some());
        let accepted = device.pop_input();
        assert!(accepted.is_some());
        assert!(device.receive_packet(mint(&mut factory, 0), Tick::ZERO).is_none());
        assert_eq!(device.dropped_packets()[&Tick::ZERO], 1);
    }

    #[test]
    fn track_buffer_counts_each_class() {
        let mut factory = PacketFactory::new();
        let mut device = device(2);
        device.receive_packet(mint(&mut factory, 0), Tick::ZERO);
        device.receive_packet(mint(&mut factory, 1), Tick::ZERO);
        device.receive_packet(mint(&mut factory, 1), Tick::ZERO);
        device.track_buffer();
        assert_eq!(device.buffer_occupancy(), &[3]);
        assert_eq!(device.class_occupancy()[0], vec![1]);
        assert_eq!(device.class_occupancy()[1], vec![2]);
    }
}
