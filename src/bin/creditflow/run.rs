use std::{collections::BTreeMap, fs::File, path::Path};

use anyhow::{Context, Result};
use serde::Serialize;
use tabled::{Table, Tabled};

use creditflow::{
    config::SimulationConfig,
    packet::PacketFactory,
    quantities::Tick,
    simulation::{run_cool_down_simulation, run_simulation},
    switch::Switch,
    util::logging::{Logger, NothingLogger, PrintLogger},
    Config,
};

#[derive(Tabled)]
struct DeviceRow {
    device: String,
    capacity: usize,
    processed: u64,
    dropped: u64,
    #[tabled(rename = "peak in")]
    peak_input: usize,
    #[tabled(rename = "peak out")]
    peak_output: usize,
}

/// The shape the external plotting layer consumes: per device, the input
/// occupancy series (aggregate and per class), the outbound backlog series,
/// and the tick-indexed drop counts.
#[derive(Serialize)]
struct DeviceSeries<'a> {
    buffer_occupancy: &'a [usize],
    class_occupancy: BTreeMap<&'a str, &'a [usize]>,
    output_buffer_size: &'a [usize],
    dropped_packets: &'a BTreeMap<Tick, u32>,
}

pub(super) fn run(config: &Path, output: Option<&Path>, quiet: bool) -> Result<()> {
    let config = SimulationConfig::load(config)?;
    if quiet {
        run_with(&config, output, NothingLogger::new(), NothingLogger::new())
    } else {
        run_with(
            &config,
            output,
            PrintLogger::new("switch".to_owned()),
            PrintLogger::new("driver".to_owned()),
        )
    }
}

fn run_with<L>(
    config: &SimulationConfig,
    output: Option<&Path>,
    switch_logger: L,
    mut driver_logger: L,
) -> Result<()>
where
    L: Logger,
{
    let mut switch = config.build(switch_logger)?;
    let mut factory = PacketFactory::new();
    let start = run_simulation(
        &mut switch,
        &mut factory,
        config.duration,
        &mut driver_logger,
    );
    let cool_down = run_cool_down_simulation(
        &mut switch,
        start,
        config.max_cool_down_ticks,
        &mut driver_logger,
    );

    let rows: Vec<DeviceRow> = switch
        .devices()
        .iter()
        .map(|device| DeviceRow {
            device: device.id().to_string(),
            capacity: device.capacity(),
            processed: device.processed(),
            dropped: device.dropped_total(),
            peak_input: device.buffer_occupancy().iter().max().copied().unwrap_or(0),
            peak_output: device
                .output_buffer_size()
                .iter()
                .max()
                .copied()
                .unwrap_or(0),
        })
        .collect();
    println!("{}", Table::new(rows));

    // series are written even when cool-down stalled
    if let Some(path) = output {
        write_series(&switch, path)?;
    }

    let finish = cool_down.context("cool-down phase stalled")?;
    println!(
        "finished at tick {} after generating {} packets",
        finish,
        factory.minted()
    );
    Ok(())
}

fn write_series<L>(switch: &Switch<L>, path: &Path) -> Result<()>
where
    L: Logger,
{
    let class_names: Vec<&str> = switch
        .classes()
        .iter()
        .map(|(_, class)| class.name.as_str())
        .collect();
    let series: BTreeMap<&str, DeviceSeries> = switch
        .devices()
        .iter()
        .map(|device| {
            (
                device.id().as_str(),
                DeviceSeries {
                    buffer_occupancy: device.buffer_occupancy(),
                    class_occupancy: class_names
                        .iter()
                        .copied()
                        .zip(device.class_occupancy().iter().map(Vec::as_slice))
                        .collect(),
                    output_buffer_size: device.output_buffer_size(),
                    dropped_packets: device.dropped_packets(),
                },
            )
        })
        .collect();
    let mut file = File::create(path)?;
    Ok(serde_json::to_writer_pretty(&mut file, &series)?)
}
