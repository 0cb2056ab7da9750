use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::{
    device::Device,
    packet::{ClassTable, DeviceId, PacketClass},
    quantities::Priority,
    switch::Switch,
    util::logging::Logger,
};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeviceConfig {
    pub id: DeviceId,
    pub buffer_capacity: usize,
    pub send_rates: BTreeMap<DeviceId, u32>,
    pub process_rate: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SwitchConfig {
    pub id: String,
    pub connected_device_ids: Vec<DeviceId>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClassConfig {
    pub packet_freq: u32,
    pub packet_priority: u32,
    pub packet_size: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SimulationConfig {
    pub devices: Vec<DeviceConfig>,
    pub switches: Vec<SwitchConfig>,
    pub packet_classes: BTreeMap<String, ClassConfig>,
    pub duration: u64,
    pub max_cool_down_ticks: u64,
}

impl Default for SimulationConfig {
    /// Two devices exchanging one packet per tick: the smallest topology
    /// that exercises credits, sending, and processing.
    fn default() -> SimulationConfig {
        let device = |id: &str, peer: &str| DeviceConfig {
            id: DeviceId::from(id),
            buffer_capacity: 2,
            send_rates: BTreeMap::from([(DeviceId::from(peer), 1)]),
            process_rate: 1,
        };
        SimulationConfig {
            devices: vec![device("a", "b"), device("b", "a")],
            switches: vec![SwitchConfig {
                id: "s0".to_owned(),
                connected_device_ids: vec![DeviceId::from("a"), DeviceId::from("b")],
            }],
            packet_classes: BTreeMap::from([(
                "1".to_owned(),
                ClassConfig {
                    packet_freq: 1,
                    packet_priority: 0,
                    packet_size: 0.5,
                },
            )]),
            duration: 20,
            max_cool_down_ticks: 100_000,
        }
    }
}

impl SimulationConfig {
    /// Classes in sorted name order, so class ids are stable for a given
    /// config regardless of the order the file listed them in.
    #[must_use]
    pub fn class_table(&self) -> ClassTable {
        ClassTable::new(self.packet_classes.iter().map(|(name, class)| PacketClass {
            name: name.clone(),
            frequency: class.packet_freq,
            priority: Priority::new(class.packet_priority),
            size: class.packet_size,
        }))
    }

    /// Wires the first configured switch to its member devices, failing on
    /// any topology inconsistency before the simulation starts.
    pub fn build<L>(&self, logger: L) -> Result<Switch<L>>
    where
        L: Logger,
    {
        let switch_config = self
            .switches
            .first()
            .ok_or_else(|| anyhow!("config declares no switches"))?;
        let mut switch = Switch::new(
            switch_config.id.clone(),
            switch_config.connected_device_ids.clone(),
            self.class_table(),
            logger,
        );
        let devices = self
            .devices
            .iter()
            .map(|device| {
                Device::new(
                    device.id.clone(),
                    device.buffer_capacity,
                    &device.send_rates,
                    device.process_rate,
                    self.packet_classes.len(),
                )
            })
            .collect();
        switch.connect_devices(devices)?;
        Ok(switch)
    }
}
