use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Discrete simulation time, counted in whole ticks from simulation start.
#[derive(
    Clone, Copy, Debug, Default, Display, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct Tick(u64);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    #[must_use]
    pub const fn new(tick: u64) -> Tick {
        Tick(tick)
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Tick {
        Tick(self.0 + 1)
    }
}

/// Scheduling urgency of a packet. Higher values drain first.
#[derive(
    Clone, Copy, Debug, Default, Display, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct Priority(u32);

impl Priority {
    #[must_use]
    pub const fn new(priority: u32) -> Priority {
        Priority(priority)
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}
