//! Core simulation engine for partitioned firefly synchronisation.
//!
//! A [`World`] tiles a toroidal plane with [`Cell`]s. Each tick runs a parallel
//! move phase whose cell crossings are applied serially afterwards, advances the
//! clock, then runs a parallel blink phase in which cells forward blink notices
//! to one another until no cell has work left.

mod cell;
mod driver;
mod firefly;
mod quiescence;
mod snapshot;
mod world;

pub use cell::Cell;
pub use driver::{DriverError, WorldDriver};
pub use firefly::{BlinkNotice, BlinkRules, FIRST_BLINK_MIN_DELAY, Firefly, Reassignment};
pub use firefly_grid::{
    CellBounds, CellCoord, Direction, GridError, GridGeometry, Heading, trig_table,
};
pub use snapshot::{FireflySnapshot, WorldSnapshot};
pub use world::World;

use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Caller-assigned firefly identifier.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct FireflyId(pub u64);

impl fmt::Display for FireflyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of completed simulation steps.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Errors that can occur when building or editing a world.
#[derive(Debug, Error, PartialEq)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("firefly {0} already exists")]
    DuplicateFirefly(FireflyId),
    #[error("firefly {0} does not exist")]
    UnknownFirefly(FireflyId),
}

/// Static configuration for a firefly world. Times are in microseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FireflyConfig {
    /// Number of cells along x.
    pub cells_wide: u32,
    /// Number of cells along y.
    pub cells_high: u32,
    /// Edge length of one square cell in world units.
    pub cell_size: f32,
    /// Clock value before the first tick.
    pub clock_start: i64,
    /// Clock advance per tick.
    pub tick_length: i64,
    /// How far one nearby blink pulls a deadline forward.
    pub nudge_amount: i64,
    /// Toroidal Manhattan distance under which blinks are seen.
    pub nudge_radius: f32,
    /// Refractory time after a blink during which nudges are ignored.
    pub blink_cooldown: i64,
    /// Shortest period handed out when hatching.
    pub period_min: i64,
    /// Longest period handed out when hatching.
    pub period_max: i64,
    /// Optional RNG seed for reproducible worlds.
    pub rng_seed: Option<u64>,
    /// Number of tick reports kept in memory.
    pub history_capacity: usize,
}

impl Default for FireflyConfig {
    fn default() -> Self {
        Self {
            cells_wide: 10,
            cells_high: 10,
            cell_size: 100.0,
            clock_start: 1_000_000,
            tick_length: 25_000,
            nudge_amount: 50_000,
            nudge_radius: 50.0,
            blink_cooldown: 500_000,
            period_min: 900_000,
            period_max: 1_100_000,
            rng_seed: None,
            history_capacity: 256,
        }
    }
}

impl FireflyConfig {
    /// Check every parameter and return the grid geometry it describes.
    pub fn validate(&self) -> Result<GridGeometry, WorldError> {
        let geometry = GridGeometry::new(self.cells_wide, self.cells_high, self.cell_size)?;
        if self.tick_length < 0 || self.nudge_amount < 0 || self.blink_cooldown < 0 {
            return Err(WorldError::InvalidConfig(
                "tick_length, nudge_amount and blink_cooldown must be non-negative",
            ));
        }
        if !self.nudge_radius.is_finite() || self.nudge_radius < 0.0 {
            return Err(WorldError::InvalidConfig(
                "nudge_radius must be finite and non-negative",
            ));
        }
        if self.period_min <= 0 {
            return Err(WorldError::InvalidConfig("period_min must be positive"));
        }
        if self.period_min > self.period_max {
            return Err(WorldError::InvalidConfig(
                "period_min must not exceed period_max",
            ));
        }
        if self.history_capacity == 0 {
            return Err(WorldError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        Ok(geometry)
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Outcome of one [`World::step`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TickReport {
    pub tick: Tick,
    /// Clock value the blink phase ran at.
    pub clock: i64,
    pub blinks: usize,
    /// Fireflies that changed cell during the move phase.
    pub reassignments: usize,
    /// Blink notices sent to a neighbouring cell.
    pub forwarded: usize,
}
