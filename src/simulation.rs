use std::fmt::{self, Display, Formatter};

use crate::{packet::PacketFactory, quantities::Tick, switch::Switch, util::logging::Logger};

/// The cool-down phase reached its safety bound with packets still queued.
///
/// Cool-down relies on drop-and-reinject cycles eventually quiescing; a
/// topology that can no longer deliver a reinjected packet (for example, a
/// frozen sender whose queue was refilled by a late drop) would otherwise
/// loop forever. The bound converts that hang into a reportable condition;
/// all buffers and counters remain introspectable afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DidNotConverge {
    pub tick: Tick,
}

impl Display for DidNotConverge {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "cool-down did not converge by tick {}", self.tick)
    }
}

impl std::error::Error for DidNotConverge {}

/// Runs the main phase for `duration` ticks. Each tick walks the devices in
/// registry order and runs the fixed per-device sequence: generate, send,
/// track input occupancy, track output occupancy, process. The sequence
/// completes for one device before the next device starts, so a credit
/// recomputation mid-tick is seen by devices later in the order.
pub fn run_simulation<L, M>(
    switch: &mut Switch<L>,
    factory: &mut PacketFactory,
    duration: u64,
    mut logger: M,
) -> Tick
where
    L: Logger,
    M: Logger,
{
    log!(logger, "starting simulation");
    switch.init_credits();
    switch.init_target_credits();
    let mut time = Tick::ZERO;
    while time.value() < duration {
        for index in 0..switch.device_count() {
            switch.generate_packets(index, time, factory);
            switch.send_packets(index, time, false);
            switch.track_buffer(index);
            switch.track_output_buffer(index);
            switch.process_packets(index);
        }
        time = time.next();
    }
    log!(logger, "simulation complete at {}", time);
    time
}

/// Winds the network down from `start`: no new packets are generated, and a
/// device that still holds credit for an empty queue freezes that flow.
/// Ticks advance until every output buffer on the switch is empty, or until
/// `max_ticks` cool-down ticks have elapsed.
pub fn run_cool_down_simulation<L, M>(
    switch: &mut Switch<L>,
    start: Tick,
    max_ticks: u64,
    mut logger: M,
) -> Result<Tick, DidNotConverge>
where
    L: Logger,
    M: Logger,
{
    log!(logger, "starting cool-down simulation");
    switch.init_credits();
    switch.init_target_credits();
    let deadline = start.value() + max_ticks;
    let mut time = start;
    loop {
        for index in 0..switch.device_count() {
            switch.send_packets(index, time, true);
            switch.track_buffer(index);
            switch.track_output_buffer(index);
            switch.process_packets(index);
        }
        time = time.next();
        if switch.total_output_backlog() == 0 {
            log!(logger, "cool-down complete at {}", time);
            return Ok(time);
        }
        if time.value() >= deadline {
            return Err(DidNotConverge { tick: time });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use crate::{
        device::Device,
        packet::{ClassTable, DeviceId, PacketClass, PacketFactory},
        quantities::{Priority, Tick},
        switch::Switch,
        util::logging::{NothingLogger, RecordingLogger},
    };

    use super::{run_cool_down_simulation, run_simulation, DidNotConverge};

    fn classes() -> ClassTable {
        ClassTable::new([PacketClass {
            name: "1".to_owned(),
            frequency: 1,
            priority: Priority::new(0),
            size: 0.5,
        }])
    }

    fn device(id: &str, peer: &str, rate: u32, buffer_capacity: usize, process_rate: u32) -> Device {
        let mut send_rates = BTreeMap::new();
        send_rates.insert(DeviceId::from(peer), rate);
        Device::new(DeviceId::from(id), buffer_capacity, &send_rates, process_rate, 1)
    }

    fn symmetric_pair(process_rate: u32) -> Switch<NothingLogger> {
        let mut switch = Switch::new(
            "s0",
            vec![DeviceId::from("a"), DeviceId::from("b")],
            classes(),
            NothingLogger::new(),
        );
        switch
            .connect_devices(vec![
                device("a", "b", 1, 2, process_rate),
                device("b", "a", 1, 2, process_rate),
            ])
            .unwrap();
        switch
    }

    #[test]
    fn two_devices_exchange_without_drops() {
        let mut switch = symmetric_pair(1);
        let mut factory = PacketFactory::new();
        run_simulation(&mut switch, &mut factory, 1, NothingLogger::new());

        for id in ["a", "b"] {
            let device = switch.device(&DeviceId::from(id)).unwrap();
            let peer = &device.peers()[0];
            assert_eq!(peer.credit(), 4);
            assert!(device.in_buffer().len() <= 1);
            assert_eq!(device.dropped_packets()[&Tick::ZERO], 0);
        }
    }

    #[test]
    fn occupancy_and_credits_stay_bounded() {
        let mut switch = symmetric_pair(1);
        let mut factory = PacketFactory::new();
        let finish = run_simulation(&mut switch, &mut factory, 20, NothingLogger::new());

        assert_eq!(finish, Tick::new(20));
        for device in switch.devices() {
            assert_eq!(device.buffer_occupancy().len(), 20);
            assert!(device
                .buffer_occupancy()
                .iter()
                .all(|occupancy| *occupancy <= device.capacity()));
            for peer in device.peers() {
                assert!(peer.target_credit() <= peer.credit());
            }
        }
    }

    #[test]
    fn packets_are_processed_or_still_buffered() {
        let mut switch = symmetric_pair(1);
        let mut factory = PacketFactory::new();
        run_simulation(&mut switch, &mut factory, 5, NothingLogger::new());

        let processed: u64 = switch.devices().iter().map(Device::processed).sum();
        let buffered: u64 = switch
            .devices()
            .iter()
            .map(|device| device.in_buffer().len() as u64)
            .sum::<u64>()
            + switch.total_output_backlog() as u64;
        assert_eq!(factory.minted(), processed + buffered);
    }

    #[test]
    fn cool_down_drains_every_output_buffer() {
        let mut switch = symmetric_pair(1);
        let mut factory = PacketFactory::new();
        let start = run_simulation(&mut switch, &mut factory, 3, NothingLogger::new());
        let finish =
            run_cool_down_simulation(&mut switch, start, 1_000, NothingLogger::new()).unwrap();

        assert_eq!(switch.total_output_backlog(), 0);
        for device in switch.devices() {
            // one occupancy sample per elapsed tick, cool-down included
            assert_eq!(device.buffer_occupancy().len() as u64, finish.value());
            assert_eq!(device.output_buffer_size().len() as u64, finish.value());
        }
    }

    #[test]
    fn cool_down_on_an_idle_network_freezes_every_flow() {
        let mut switch = symmetric_pair(1);
        let mut factory = PacketFactory::new();
        let start = run_simulation(&mut switch, &mut factory, 0, NothingLogger::new());
        let mut narration = RecordingLogger::new();
        let finish =
            run_cool_down_simulation(&mut switch, start, 10, &mut narration).unwrap();

        assert_eq!(finish, Tick::new(1));
        for device in switch.devices() {
            assert!(device.peers().iter().all(|peer| peer.send_rate() == 0));
        }
        assert!(narration
            .messages()
            .iter()
            .any(|msg| msg == "cool-down complete at 1"));
    }

    #[test]
    fn cool_down_without_processing_reports_non_convergence() {
        // nothing is ever processed, so credits are never returned: the
        // senders exhaust their targets, the queued packets stall, and the
        // cool-down loop can only hit its safety bound
        let mut switch = symmetric_pair(0);
        let mut factory = PacketFactory::new();
        let start = run_simulation(&mut switch, &mut factory, 5, NothingLogger::new());
        let result = run_cool_down_simulation(&mut switch, start, 5, NothingLogger::new());

        assert_eq!(result, Err(DidNotConverge { tick: Tick::new(10) }));
        assert!(switch.total_output_backlog() > 0);
    }
}
