//! Cells own a rectangle of the world and the fireflies currently inside it.

use firefly_grid::{CellBounds, CellCoord, Direction, GridGeometry};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::FireflyId;
use crate::firefly::{BlinkNotice, BlinkRules, Firefly, Reassignment};
use crate::quiescence::Quiescence;
use crate::snapshot::FireflySnapshot;

#[derive(Debug, Default)]
struct Members {
    fireflies: HashMap<FireflyId, Firefly>,
    /// Whether this tick's deadline scan already ran.
    scanned: bool,
}

#[derive(Debug)]
struct Mailbox {
    queue: VecDeque<BlinkNotice>,
    idle: bool,
}

/// One partition of the grid.
///
/// Members are only touched by the task currently working this cell; the
/// mailbox is the one part other cells write to during the blink phase.
#[derive(Debug)]
pub struct Cell {
    coord: CellCoord,
    bounds: CellBounds,
    members: Mutex<Members>,
    mailbox: Mutex<Mailbox>,
}

impl Cell {
    pub(crate) fn new(coord: CellCoord, bounds: CellBounds) -> Self {
        Self {
            coord,
            bounds,
            members: Mutex::new(Members::default()),
            mailbox: Mutex::new(Mailbox {
                queue: VecDeque::new(),
                idle: true,
            }),
        }
    }

    fn lock_members(&self) -> MutexGuard<'_, Members> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn members_mut(&mut self) -> &mut Members {
        self.members.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_mailbox(&self) -> MutexGuard<'_, Mailbox> {
        self.mailbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mailbox_mut(&mut self) -> &mut Mailbox {
        self.mailbox.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub const fn coord(&self) -> CellCoord {
        self.coord
    }

    #[must_use]
    pub const fn bounds(&self) -> CellBounds {
        self.bounds
    }

    /// Number of member fireflies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_members().fireflies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, id: FireflyId) -> bool {
        self.lock_members().fireflies.contains_key(&id)
    }

    /// Member ids in ascending order.
    #[must_use]
    pub fn member_ids(&self) -> Vec<FireflyId> {
        let mut ids: Vec<FireflyId> = self.lock_members().fireflies.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Notices waiting to be processed.
    #[must_use]
    pub fn pending_notices(&self) -> usize {
        self.lock_mailbox().queue.len()
    }

    /// Whether the cell has reported it has no blink work left.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.lock_mailbox().idle
    }

    pub(crate) fn enter(&mut self, firefly: Firefly) {
        let id = firefly.id();
        let previous = self.members_mut().fireflies.insert(id, firefly);
        debug_assert!(previous.is_none(), "firefly {id} entered cell {} twice", self.coord);
    }

    pub(crate) fn leave(&mut self, id: FireflyId) -> Option<Firefly> {
        self.members_mut().fireflies.remove(&id)
    }

    pub(crate) fn member_mut(&mut self, id: FireflyId) -> Option<&mut Firefly> {
        self.members_mut().fireflies.get_mut(&id)
    }

    pub(crate) fn snapshot_member(&self, id: FireflyId) -> Option<FireflySnapshot> {
        self.lock_members().fireflies.get(&id).map(Firefly::snapshot)
    }

    pub(crate) fn snapshots(&self) -> Vec<FireflySnapshot> {
        self.lock_members()
            .fireflies
            .values()
            .map(Firefly::snapshot)
            .collect()
    }

    /// Move every member one step; returns the transfers to apply afterwards.
    pub(crate) fn advance_members(&mut self, geometry: &GridGeometry) -> Vec<Reassignment> {
        self.members_mut()
            .fireflies
            .values_mut()
            .filter_map(|firefly| firefly.advance(geometry))
            .collect()
    }

    /// Mark the cell busy for a new blink phase.
    pub(crate) fn begin_blink_phase(&mut self) {
        self.members_mut().scanned = false;
        self.mailbox_mut().idle = false;
    }

    /// Drop whatever is left in the queue and go idle until the next phase.
    pub(crate) fn end_blink_phase(&mut self) {
        let mailbox = self.mailbox_mut();
        mailbox.queue.clear();
        mailbox.idle = true;
    }

    /// Queue a notice. Wakes the cell if it was idle, registering the new work
    /// with `quiescence` under the mailbox lock; returns whether it woke.
    pub(crate) fn post(&self, notice: BlinkNotice, quiescence: &Quiescence) -> bool {
        let mut mailbox = self.lock_mailbox();
        mailbox.queue.push_back(notice);
        if !mailbox.idle {
            return false;
        }
        mailbox.idle = false;
        quiescence.register();
        true
    }

    pub(crate) fn take_notices(&self) -> Vec<BlinkNotice> {
        self.lock_mailbox().queue.drain(..).collect()
    }

    /// Go idle if nothing arrived since the last drain; returns whether it did.
    pub(crate) fn settle(&self, quiescence: &Quiescence) -> bool {
        let mut mailbox = self.lock_mailbox();
        if !mailbox.queue.is_empty() {
            return false;
        }
        debug_assert!(!mailbox.idle, "cell {} settled twice", self.coord);
        mailbox.idle = true;
        quiescence.complete();
        true
    }

    /// Run one pass of blink work: the deadline scan on the first pass of the
    /// tick, then the nudges carried by `notices`. Returns the blinks it caused.
    pub(crate) fn process(
        &self,
        notices: &[BlinkNotice],
        geometry: &GridGeometry,
        rules: &BlinkRules,
    ) -> Vec<BlinkNotice> {
        let mut members = self.lock_members();
        let mut fired = Vec::new();

        if !members.scanned {
            members.scanned = true;
            for firefly in members.fireflies.values_mut() {
                firefly.reset_nudgeable(rules);
                if firefly.check_blink(rules) {
                    fired.push(firefly.notice());
                }
            }
        }

        for notice in notices {
            for firefly in members.fireflies.values_mut() {
                if firefly.id() == notice.id || !firefly.is_nudgeable() {
                    continue;
                }
                if firefly.nudge(notice, geometry, rules) {
                    fired.push(firefly.notice());
                }
            }
        }
        fired
    }

    /// Edges of this cell that `notice` is within `border` of.
    pub(crate) fn bordering(
        &self,
        notice: &BlinkNotice,
        border: f32,
    ) -> impl Iterator<Item = Direction> + '_ {
        let (x, y) = notice.position();
        Direction::ALL
            .into_iter()
            .filter(move |&direction| self.bounds.edge_distance(x, y, direction) < border)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members = self.lock_members();
        write!(
            f,
            "{} [{:.2}, {:.2}) x [{:.2}, {:.2}): {} fireflies",
            self.coord,
            self.bounds.left,
            self.bounds.right,
            self.bounds.bottom,
            self.bounds.top,
            members.fireflies.len()
        )?;
        let mut fireflies: Vec<&Firefly> = members.fireflies.values().collect();
        fireflies.sort_unstable_by_key(|firefly| firefly.id());
        for firefly in fireflies {
            write!(f, "\n  {firefly}")?;
        }
        Ok(())
    }
}
