use std::path::Path;

use anyhow::Result;
use creditflow::{config::SimulationConfig, Config};

pub(super) fn gen_config(output: &Path) -> Result<()> {
    SimulationConfig::default().save(output)
}
