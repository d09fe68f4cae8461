//! Read-only views of the simulation handed to observers after each tick.

use firefly_grid::{CellCoord, Heading};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use crate::{FireflyId, Tick};
use crate::firefly::BlinkNotice;

/// Copy of one firefly's observable state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FireflySnapshot {
    pub id: FireflyId,
    pub x: f32,
    pub y: f32,
    pub heading: Heading,
    pub period: i64,
    pub last_blink: i64,
    pub next_blink: i64,
    pub nudgeable: bool,
    pub cell: CellCoord,
}

impl FireflySnapshot {
    #[must_use]
    pub const fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    /// Fraction of the period elapsed since the last blink, in `[0, 1)`.
    #[must_use]
    pub fn phase(&self, clock: i64) -> f64 {
        let elapsed = (clock - self.last_blink).rem_euclid(self.period);
        elapsed as f64 / self.period as f64
    }

    /// Whether the firefly blinked within `window` before `clock`.
    #[must_use]
    pub const fn blinked_within(&self, clock: i64, window: i64) -> bool {
        self.last_blink <= clock && clock - self.last_blink < window
    }

    #[must_use]
    pub const fn notice(&self) -> BlinkNotice {
        BlinkNotice {
            id: self.id,
            x: self.x,
            y: self.y,
        }
    }
}

/// Whole-world state after a completed tick, fireflies ordered by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldSnapshot {
    pub tick: Tick,
    pub clock: i64,
    pub fireflies: Vec<FireflySnapshot>,
}

impl WorldSnapshot {
    #[must_use]
    pub fn get(&self, id: FireflyId) -> Option<&FireflySnapshot> {
        self.fireflies
            .binary_search_by_key(&id, |firefly| firefly.id)
            .ok()
            .map(|index| &self.fireflies[index])
    }

    /// Kuramoto order parameter of the blink phases: 1 when every firefly is
    /// in phase, near 0 when phases are spread evenly. Empty worlds report 0.
    #[must_use]
    pub fn phase_coherence(&self) -> f64 {
        if self.fireflies.is_empty() {
            return 0.0;
        }
        let (sum_cos, sum_sin) = self
            .fireflies
            .iter()
            .map(|firefly| TAU * firefly.phase(self.clock))
            .fold((0.0, 0.0), |(c, s), theta| (c + theta.cos(), s + theta.sin()));
        let n = self.fireflies.len() as f64;
        (sum_cos / n).hypot(sum_sin / n)
    }

    /// Number of fireflies that blinked within `window` before the snapshot clock.
    #[must_use]
    pub fn recently_blinked(&self, window: i64) -> usize {
        self.fireflies
            .iter()
            .filter(|firefly| firefly.blinked_within(self.clock, window))
            .count()
    }
}
