use std::{
    cmp::Reverse,
    fmt::{self, Display, Formatter},
};

use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::{
    device::Device,
    packet::{ClassTable, DeviceId, Packet, PacketFactory},
    quantities::Tick,
    util::logging::Logger,
};

/// A wiring problem detected while connecting devices. Credit allocation
/// reads every peer's rate table, so an inconsistent topology must be
/// rejected before the simulation starts rather than discovered mid-run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectError {
    DuplicateDevice(DeviceId),
    MissingDevice(DeviceId),
    UnknownPeer { device: DeviceId, peer: DeviceId },
    MissingReverseRate { device: DeviceId, peer: DeviceId },
}

impl Display for ConnectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::DuplicateDevice(id) => {
                write!(f, "device {id} is already connected")
            }
            ConnectError::MissingDevice(id) => {
                write!(f, "membership lists device {id} but it was not supplied")
            }
            ConnectError::UnknownPeer { device, peer } => {
                write!(
                    f,
                    "device {device} sends to {peer}, which is not connected to the switch"
                )
            }
            ConnectError::MissingReverseRate { device, peer } => {
                write!(f, "device {peer} has no send-rate entry back to {device}")
            }
        }
    }
}

impl std::error::Error for ConnectError {}

/// Divides `capacity` among peers in proportion to their receive rates,
/// flooring each share and then handing the remainder out one unit at a time
/// in descending rate order (ties go to the earlier peer). A zero total
/// means nothing will arrive and every share is zero.
fn allocate_credits(capacity: usize, receive_rates: &[u32]) -> Vec<u32> {
    let total: u64 = receive_rates.iter().map(|rate| u64::from(*rate)).sum();
    if total == 0 {
        return vec![0; receive_rates.len()];
    }
    let capacity = capacity as u64;
    let mut credits: Vec<u32> = receive_rates
        .iter()
        .map(|rate| (capacity * u64::from(*rate) / total) as u32)
        .collect();
    let mut remainder = capacity - credits.iter().map(|credit| u64::from(*credit)).sum::<u64>();
    for (index, _) in receive_rates
        .iter()
        .enumerate()
        .sorted_by_key(|(_, rate)| Reverse(**rate))
    {
        if remainder == 0 {
            break;
        }
        credits[index] += 1;
        remainder -= 1;
    }
    credits
}

/// The single switch of the simulated network: a stateless relay between
/// devices and the authority that allocates credits. It exclusively owns
/// every connected device, so any cross-device operation (forwarding, credit
/// replenishment, drop reinjection) goes through its registry instead of
/// through back-references between devices.
///
/// Devices iterate in connection order; the driver relies on that order
/// being fixed to keep runs reproducible.
pub struct Switch<L> {
    id: String,
    membership: Vec<DeviceId>,
    devices: Vec<Device>,
    index: FxHashMap<DeviceId, usize>,
    classes: ClassTable,
    logger: L,
}

impl<L> Switch<L>
where
    L: Logger,
{
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        membership: Vec<DeviceId>,
        classes: ClassTable,
        logger: L,
    ) -> Switch<L> {
        Switch {
            id: id.into(),
            membership,
            devices: Vec::new(),
            index: FxHashMap::default(),
            classes,
            logger,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn classes(&self) -> &ClassTable {
        &self.classes
    }

    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    #[must_use]
    pub fn device(&self, id: &DeviceId) -> Option<&Device> {
        self.index.get(id).map(|index| &self.devices[*index])
    }

    #[must_use]
    pub fn total_output_backlog(&self) -> usize {
        self.devices
            .iter()
            .map(Device::total_output_backlog)
            .sum()
    }

    /// Registers each supplied device whose id is in the configured
    /// membership list, then validates that every registered device's rate
    /// table can be satisfied: each peer must itself be registered and must
    /// carry a reverse entry for the device, since credit allocation reads
    /// both directions.
    pub fn connect_devices(&mut self, devices: Vec<Device>) -> Result<(), ConnectError> {
        for device in devices {
            if !self.membership.contains(device.id()) {
                continue;
            }
            if self.index.contains_key(device.id()) {
                return Err(ConnectError::DuplicateDevice(device.id().clone()));
            }
            log!(
                self.logger,
                "switch {} connected to device {}",
                self.id,
                device.id()
            );
            self.index.insert(device.id().clone(), self.devices.len());
            self.devices.push(device);
        }
        for id in &self.membership {
            if !self.index.contains_key(id) {
                return Err(ConnectError::MissingDevice(id.clone()));
            }
        }
        for device in &self.devices {
            for peer in device.peers() {
                let Some(peer_index) = self.index.get(peer.id()) else {
                    return Err(ConnectError::UnknownPeer {
                        device: device.id().clone(),
                        peer: peer.id().clone(),
                    });
                };
                if self.devices[*peer_index].peer(device.id()).is_none() {
                    return Err(ConnectError::MissingReverseRate {
                        device: device.id().clone(),
                        peer: peer.id().clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Recomputes every device's credit allotments from the rates its peers
    /// currently direct at it.
    pub fn init_credits(&mut self) {
        for index in 0..self.devices.len() {
            let device_id = self.devices[index].id().clone();
            let receive_rates: Vec<u32> = self.devices[index]
                .peers()
                .iter()
                .map(|peer| {
                    self.devices[self.index[peer.id()]]
                        .peer(&device_id)
                        .expect("peer validated at connect time")
                        .send_rate()
                })
                .collect();
            let credits = allocate_credits(self.devices[index].capacity(), &receive_rates);
            let device = &mut self.devices[index];
            for (peer_index, credit) in credits.into_iter().enumerate() {
                device.peer_at_mut(peer_index).set_credit(credit);
            }
        }
    }

    /// Couples the two sides of each flow: a device's permission to send to
    /// a peer starts at exactly the credit that peer allocated to receiving
    /// from it.
    pub fn init_target_credits(&mut self) {
        for index in 0..self.devices.len() {
            let device_id = self.devices[index].id().clone();
            let targets: Vec<u32> = self.devices[index]
                .peers()
                .iter()
                .map(|peer| {
                    self.devices[self.index[peer.id()]]
                        .peer(&device_id)
                        .expect("peer validated at connect time")
                        .credit()
                })
                .collect();
            let device = &mut self.devices[index];
            for (peer_index, target) in targets.into_iter().enumerate() {
                device.peer_at_mut(peer_index).set_target_credit(target);
            }
        }
    }

    /// Fills the device's output buffers from the class table: one batch of
    /// `frequency` packets per class, per peer the device actively sends to.
    /// Runs in the main simulation phase only, never during cooldown.
    pub fn generate_packets(&mut self, index: usize, time: Tick, factory: &mut PacketFactory) {
        let source = self.devices[index].id().clone();
        for peer_index in 0..self.devices[index].peer_count() {
            let peer = self.devices[index].peer_at(peer_index);
            let destination = peer.id().clone();
            if peer.send_rate() == 0 {
                continue;
            }
            let classes = &self.classes;
            for (class_id, class) in classes.iter() {
                for _ in 0..class.frequency {
                    let packet =
                        factory.mint(class_id, class, source.clone(), destination.clone(), time);
                    self.devices[index]
                        .peer_at_mut(peer_index)
                        .push_outbound(packet);
                    log!(
                        self.logger,
                        "packet generated from {} to {}",
                        source,
                        destination
                    );
                }
            }
        }
    }

    /// Attempts up to `send_rate` transmissions per peer, each gated on an
    /// available target credit. During cooldown, a peer that still has
    /// credit but nothing queued is terminal: its send rate freezes to zero
    /// and credits are recomputed switch-wide.
    pub fn send_packets(&mut self, index: usize, time: Tick, cooldown: bool) {
        for peer_index in 0..self.devices[index].peer_count() {
            let rate = self.devices[index].peer_at(peer_index).send_rate();
            for _ in 0..rate {
                let peer = self.devices[index].peer_at_mut(peer_index);
                if peer.target_credit() == 0 {
                    continue;
                }
                if let Some(packet) = peer.pop_outbound() {
                    peer.spend_target_credit();
                    log!(
                        self.logger,
                        "packet {} sent from {} to {}",
                        packet.id(),
                        packet.source(),
                        packet.destination()
                    );
                    self.forward_packet(packet, time);
                } else if cooldown {
                    self.freeze_send_rate(index, peer_index);
                    break;
                }
            }
        }
    }

    /// Drains up to `process_rate` packets from the device's input buffer in
    /// priority order. Each processed packet returns one unit of send
    /// permission to its origin, capped by the credit this device allocated
    /// to that origin — the receiving side's processing capacity is what
    /// replenishes the sender.
    pub fn process_packets(&mut self, index: usize) {
        for _ in 0..self.devices[index].process_rate() {
            let Some(packet) = self.devices[index].pop_input() else {
                break;
            };
            let receiver = self.devices[index].id().clone();
            let ceiling = self.devices[index]
                .peer(packet.source())
                .expect("peer validated at connect time")
                .credit();
            let origin = self.index[packet.source()];
            self.devices[origin]
                .peer_mut(&receiver)
                .expect("peer validated at connect time")
                .replenish_target_credit(ceiling);
            log!(
                self.logger,
                "packet {} processed by {}",
                packet.id(),
                receiver
            );
        }
    }

    /// Routes a packet to its destination's input buffer. The switch holds
    /// no queue of its own; a rejected packet goes straight back to the
    /// sender's outbound queue for a later retry.
    pub fn forward_packet(&mut self, packet: Packet, time: Tick) {
        let destination = *self
            .index
            .get(packet.destination())
            .expect("destination is not connected to this switch");
        log!(
            self.logger,
            "packet {} forwarded from {} to {}",
            packet.id(),
            packet.source(),
            packet.destination()
        );
        let receiver = self.devices[destination].id().clone();
        match self.devices[destination].receive_packet(packet, time) {
            None => log!(self.logger, "packet received by {}", receiver),
            Some(rejected) => {
                log!(
                    self.logger,
                    "packet {} dropped by {}, queued at {} for retransmission",
                    rejected.id(),
                    receiver,
                    rejected.source()
                );
                let origin = self.index[rejected.source()];
                self.devices[origin]
                    .peer_mut(&receiver)
                    .expect("peer validated at connect time")
                    .push_outbound(rejected);
            }
        }
    }

    pub fn track_buffer(&mut self, index: usize) {
        self.devices[index].track_buffer();
    }

    pub fn track_output_buffer(&mut self, index: usize) {
        self.devices[index].track_output_buffer();
    }

    fn freeze_send_rate(&mut self, index: usize, peer_index: usize) {
        let device_id = self.devices[index].id().clone();
        let peer_id = self.devices[index].peer_at(peer_index).id().clone();
        self.devices[index].peer_at_mut(peer_index).freeze();
        log!(
            self.logger,
            "device {} froze its send rate to {}",
            device_id,
            peer_id
        );
        self.init_credits();
        self.init_target_credits();
    }
}
