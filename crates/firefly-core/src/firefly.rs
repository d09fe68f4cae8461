//! Individual oscillating agents.

use firefly_grid::{CellCoord, GridGeometry, Heading};
use rand::{Rng, RngCore, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::FireflyId;
use crate::snapshot::FireflySnapshot;

/// Earliest first blink after spawning, in clock units.
pub const FIRST_BLINK_MIN_DELAY: i64 = 1_000;

/// Read-only view of the world parameters an agent needs while blinking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlinkRules {
    /// Current virtual clock.
    pub clock: i64,
    /// How far a nudge pulls a deadline forward.
    pub nudge_amount: i64,
    /// Toroidal Manhattan distance under which a blink is seen.
    pub nudge_radius: f32,
    /// Time after a blink during which nudges are ignored.
    pub blink_cooldown: i64,
}

/// Value snapshot of a blink, routed between cells during the blink phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BlinkNotice {
    pub id: FireflyId,
    pub x: f32,
    pub y: f32,
}

impl BlinkNotice {
    #[must_use]
    pub const fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }
}

/// Pending transfer of a firefly between cells, applied after the move phase joins.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reassignment {
    pub firefly: FireflyId,
    pub from: CellCoord,
    pub to: CellCoord,
}

/// An autonomous oscillator wandering the torus.
#[derive(Debug, Clone)]
pub struct Firefly {
    id: FireflyId,
    x: f32,
    y: f32,
    heading: Heading,
    period: i64,
    last_blink: i64,
    next_blink: i64,
    nudgeable: bool,
    /// Cell that currently lists this firefly; lookup only.
    cell: CellCoord,
    rng: SmallRng,
}

impl Firefly {
    /// Create a firefly, wrapping its position and scheduling the first blink
    /// somewhere within one period of the current clock.
    pub(crate) fn new(
        id: FireflyId,
        position: (f32, f32),
        heading: Heading,
        period: i64,
        geometry: &GridGeometry,
        rules: &BlinkRules,
        rng: &mut dyn RngCore,
    ) -> Self {
        debug_assert!(period > 0, "period must be positive");
        let (x, y) = geometry.wrap_position(position.0, position.1);
        let first_delay = rng.random_range(FIRST_BLINK_MIN_DELAY.min(period)..=period);
        let mut firefly = Self {
            id,
            x,
            y,
            heading,
            period,
            last_blink: 0,
            next_blink: 0,
            nudgeable: false,
            cell: geometry.cell_of(x, y),
            rng: SmallRng::seed_from_u64(rng.next_u64()),
        };
        firefly.set_next_blink(rules.clock + first_delay);
        firefly.reset_nudgeable(rules);
        firefly
    }

    #[must_use]
    pub const fn id(&self) -> FireflyId {
        self.id
    }

    #[must_use]
    pub const fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    #[must_use]
    pub const fn heading(&self) -> Heading {
        self.heading
    }

    #[must_use]
    pub const fn period(&self) -> i64 {
        self.period
    }

    #[must_use]
    pub const fn last_blink(&self) -> i64 {
        self.last_blink
    }

    #[must_use]
    pub const fn next_blink(&self) -> i64 {
        self.next_blink
    }

    #[must_use]
    pub const fn is_nudgeable(&self) -> bool {
        self.nudgeable
    }

    /// Cell the world currently files this firefly under.
    #[must_use]
    pub const fn cell(&self) -> CellCoord {
        self.cell
    }

    pub(crate) fn set_cell(&mut self, cell: CellCoord) {
        self.cell = cell;
    }

    pub(crate) fn set_heading(&mut self, heading: Heading) {
        self.heading = heading;
    }

    /// Schedule the next blink at `next_blink`, keeping `next - last == period`.
    pub fn set_next_blink(&mut self, next_blink: i64) {
        self.next_blink = next_blink;
        self.last_blink = next_blink - self.period;
    }

    /// Jitter the heading by up to one degree, take a unit step and wrap.
    ///
    /// Returns the transfer needed when the step leaves the current cell; the
    /// membership change itself is left to the world.
    pub fn advance(&mut self, geometry: &GridGeometry) -> Option<Reassignment> {
        self.heading = self.heading.turned(self.rng.random_range(-1..=1));
        let (dx, dy) = self.heading.unit_vector();
        (self.x, self.y) = geometry.wrap_position(self.x + dx, self.y + dy);

        // cell_of is authoritative; bounds and division can disagree by one ulp at an edge
        let to = geometry.cell_of(self.x, self.y);
        if to == self.cell {
            return None;
        }
        Some(Reassignment {
            firefly: self.id,
            from: self.cell,
            to,
        })
    }

    /// React to a blink seen at `other`: pull the deadline forward when close
    /// enough, then check whether that makes this firefly blink.
    pub fn nudge(
        &mut self,
        other: &BlinkNotice,
        geometry: &GridGeometry,
        rules: &BlinkRules,
    ) -> bool {
        if geometry.toroidal_manhattan(self.position(), other.position()) < rules.nudge_radius {
            self.set_next_blink(self.next_blink - rules.nudge_amount);
        }
        self.check_blink(rules)
    }

    /// Blink if the deadline has been reached. Returns whether it blinked.
    pub fn check_blink(&mut self, rules: &BlinkRules) -> bool {
        if self.next_blink > rules.clock {
            return false;
        }
        self.last_blink = self.next_blink;
        self.next_blink += self.period;
        self.nudgeable = false;
        true
    }

    /// Leave the refractory window once the cooldown since the last blink has elapsed.
    pub fn reset_nudgeable(&mut self, rules: &BlinkRules) {
        if self.nudgeable {
            return;
        }
        if rules.clock - self.last_blink > rules.blink_cooldown {
            self.nudgeable = true;
        }
    }

    /// Recompute nudgeability from scratch after the deadline was moved by hand.
    pub(crate) fn refresh_nudgeable(&mut self, rules: &BlinkRules) {
        self.nudgeable = false;
        self.reset_nudgeable(rules);
    }

    /// Value snapshot used to notify peers of a blink.
    #[must_use]
    pub const fn notice(&self) -> BlinkNotice {
        BlinkNotice {
            id: self.id,
            x: self.x,
            y: self.y,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> FireflySnapshot {
        FireflySnapshot {
            id: self.id,
            x: self.x,
            y: self.y,
            heading: self.heading,
            period: self.period,
            last_blink: self.last_blink,
            next_blink: self.next_blink,
            nudgeable: self.nudgeable,
            cell: self.cell,
        }
    }
}

impl fmt::Display for Firefly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>4}: {:>8.2} x {:>8.2} @ {:>4}",
            self.id.0,
            self.x,
            self.y,
            self.heading.degrees()
        )
    }
}
