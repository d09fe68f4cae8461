//! The coordinator: owns the cells, the clock and the per-tick protocols.

use firefly_grid::{CellCoord, Direction, GridGeometry, Heading, trig_table};
use rand::{Rng, rngs::SmallRng};
use rayon::prelude::*;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error, trace};

use crate::cell::Cell;
use crate::firefly::{BlinkNotice, BlinkRules, Firefly, Reassignment};
use crate::quiescence::Quiescence;
use crate::snapshot::{FireflySnapshot, WorldSnapshot};
use crate::{FireflyConfig, FireflyId, Tick, TickReport, WorldError};

/// Counters shared by the tasks of one blink phase.
#[derive(Debug, Default)]
struct Tally {
    blinks: AtomicUsize,
    forwarded: AtomicUsize,
}

/// A toroidal world partitioned into cells.
#[derive(Debug)]
pub struct World {
    config: FireflyConfig,
    geometry: GridGeometry,
    /// Row-major, indexed by [`GridGeometry::offset`].
    cells: Vec<Cell>,
    tick: Tick,
    clock: i64,
    rng: SmallRng,
    /// Owning cell of every firefly.
    locations: HashMap<FireflyId, CellCoord>,
    next_id: u64,
    quiescence: Quiescence,
    history: VecDeque<TickReport>,
}

impl World {
    /// Build an empty world, refusing degenerate configurations.
    pub fn new(config: FireflyConfig) -> Result<Self, WorldError> {
        let geometry = config.validate()?;
        trig_table();
        let cells = geometry
            .coords()
            .map(|coord| Cell::new(coord, geometry.cell_bounds(coord)))
            .collect();
        let rng = config.seeded_rng();
        let history_capacity = config.history_capacity;
        Ok(Self {
            clock: config.clock_start,
            config,
            geometry,
            cells,
            tick: Tick::zero(),
            rng,
            locations: HashMap::new(),
            next_id: 0,
            quiescence: Quiescence::default(),
            history: VecDeque::with_capacity(history_capacity),
        })
    }

    fn rules(&self) -> BlinkRules {
        BlinkRules {
            clock: self.clock,
            nudge_amount: self.config.nudge_amount,
            nudge_radius: self.config.nudge_radius,
            blink_cooldown: self.config.blink_cooldown,
        }
    }

    /// Distance from a cell edge under which a blink is forwarded across it.
    fn border(&self) -> f32 {
        self.config.nudge_radius / 2.0
    }

    fn cell_mut(&mut self, coord: CellCoord) -> &mut Cell {
        let offset = self.geometry.offset(coord);
        &mut self.cells[offset]
    }

    fn cell_ref(&self, coord: CellCoord) -> &Cell {
        &self.cells[self.geometry.offset(coord)]
    }

    /// Create one firefly at `(x, y)` and file it under the cell containing it.
    ///
    /// Position and heading are normalised; the first blink lands somewhere in
    /// the next `period` of clock time.
    pub fn spawn_firefly(
        &mut self,
        x: f32,
        y: f32,
        heading: Heading,
        id: FireflyId,
        period: i64,
    ) -> Result<FireflyId, WorldError> {
        if self.locations.contains_key(&id) {
            return Err(WorldError::DuplicateFirefly(id));
        }
        if period <= 0 {
            return Err(WorldError::InvalidConfig("period must be positive"));
        }
        let rules = self.rules();
        let firefly = Firefly::new(
            id,
            (x, y),
            heading,
            period,
            &self.geometry,
            &rules,
            &mut self.rng,
        );
        self.enter(firefly);
        Ok(id)
    }

    /// Hatch `n` fireflies with ids following the largest id seen so far.
    pub fn hatch_fireflies(&mut self, n: usize) -> Result<Vec<FireflyId>, WorldError> {
        self.hatch_fireflies_from(n, self.next_id)
    }

    /// Hatch `n` fireflies with sequential ids from `id_start`, uniformly placed,
    /// oriented and tuned. Nothing is hatched if any id is already taken or the
    /// range runs past `u64::MAX`.
    pub fn hatch_fireflies_from(
        &mut self,
        n: usize,
        id_start: u64,
    ) -> Result<Vec<FireflyId>, WorldError> {
        let ids: Vec<FireflyId> = match n.checked_sub(1) {
            None => Vec::new(),
            Some(extra) => {
                let last = u64::try_from(extra)
                    .ok()
                    .and_then(|extra| id_start.checked_add(extra))
                    .ok_or(WorldError::InvalidConfig("firefly id range overflows u64"))?;
                (id_start..=last).map(FireflyId).collect()
            }
        };
        if let Some(&taken) = ids.iter().find(|id| self.locations.contains_key(*id)) {
            return Err(WorldError::DuplicateFirefly(taken));
        }

        let (width, height) = (self.geometry.width(), self.geometry.height());
        let (period_min, period_max) = (self.config.period_min, self.config.period_max);
        for &id in &ids {
            let x = self.rng.random_range(0.0..width);
            let y = self.rng.random_range(0.0..height);
            let heading = Heading::from_degrees(self.rng.random_range(0..360));
            let period = self.rng.random_range(period_min..=period_max);
            self.spawn_firefly(x, y, heading, id, period)?;
        }
        debug!(count = n, first = id_start, total = self.locations.len(), "hatched fireflies");
        Ok(ids)
    }

    /// Single-writer entry of a freshly created firefly into its cell.
    fn enter(&mut self, firefly: Firefly) {
        let id = firefly.id();
        let coord = firefly.cell();
        self.next_id = self.next_id.max(id.0.saturating_add(1));
        self.locations.insert(id, coord);
        self.cell_mut(coord).enter(firefly);
    }

    /// Move a firefly between cells and update its back-reference.
    pub fn change_cell(&mut self, change: Reassignment) -> Result<(), WorldError> {
        let Some(&current) = self.locations.get(&change.firefly) else {
            return Err(WorldError::UnknownFirefly(change.firefly));
        };
        debug_assert_eq!(current, change.from, "stale reassignment for {}", change.firefly);
        let Some(mut firefly) = self.cell_mut(current).leave(change.firefly) else {
            return Err(WorldError::UnknownFirefly(change.firefly));
        };
        firefly.set_cell(change.to);
        self.cell_mut(change.to).enter(firefly);
        self.locations.insert(change.firefly, change.to);
        trace!(firefly = %change.firefly, from = %change.from, to = %change.to, "changed cell");
        Ok(())
    }

    /// Advance the simulation by one tick: move, then blink.
    pub fn step(&mut self) -> TickReport {
        let reassignments = self.move_fireflies();
        let (blinks, forwarded) = self.blink_phase();
        self.tick = self.tick.next();

        let report = TickReport {
            tick: self.tick,
            clock: self.clock,
            blinks,
            reassignments,
            forwarded,
        };
        debug!(
            tick = report.tick.0,
            clock = report.clock,
            blinks,
            reassignments,
            forwarded,
            "tick complete"
        );
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(report);
        report
    }

    /// Move every firefly in parallel, then apply the cell crossings serially.
    /// Returns the number of crossings.
    pub fn move_fireflies(&mut self) -> usize {
        let geometry = self.geometry;
        let changes: Vec<Reassignment> = self
            .cells
            .par_iter_mut()
            .flat_map_iter(|cell| cell.advance_members(&geometry))
            .collect();

        let count = changes.len();
        for change in changes {
            let applied = self.change_cell(change);
            debug_assert!(applied.is_ok(), "reassignment {change:?} failed: {applied:?}");
            if let Err(err) = applied {
                error!(?change, %err, "dropped cell reassignment");
            }
        }
        count
    }

    /// Advance the clock and run the blink phase to quiescence. Returns the
    /// number of blinks fired.
    pub fn clock_tick(&mut self) -> usize {
        self.blink_phase().0
    }

    /// Returns blinks fired and notices forwarded to other cells.
    ///
    /// Woken cells are spawned onto the same scope, so the scope's join is the
    /// phase barrier. The quiescence counter must read zero once it returns.
    fn blink_phase(&mut self) -> (usize, usize) {
        self.clock += self.config.tick_length;
        for cell in &mut self.cells {
            cell.begin_blink_phase();
        }
        self.quiescence.arm(self.cells.len());

        let tally = Tally::default();
        {
            let this = &*self;
            let tally = &tally;
            rayon::scope(|scope| {
                for cell in &this.cells {
                    scope.spawn(move |scope| this.run_cell(scope, cell, tally));
                }
            });
            let outstanding = this.quiescence.outstanding();
            debug_assert_eq!(outstanding, 0, "blink phase joined with work outstanding");
            if outstanding != 0 {
                error!(
                    outstanding,
                    tick = this.tick.0,
                    "blink phase joined with work outstanding"
                );
            }
        }

        for cell in &mut self.cells {
            cell.end_blink_phase();
        }
        (
            tally.blinks.into_inner(),
            tally.forwarded.into_inner(),
        )
    }

    /// Work one cell until its queue stays empty.
    fn run_cell<'s>(&'s self, scope: &rayon::Scope<'s>, cell: &'s Cell, tally: &'s Tally) {
        let rules = self.rules();
        let border = self.border();
        loop {
            let notices = cell.take_notices();
            let fired = cell.process(&notices, &self.geometry, &rules);
            tally.blinks.fetch_add(fired.len(), Ordering::Relaxed);
            for notice in &fired {
                self.broadcast(scope, cell, notice, border, tally);
            }
            if cell.settle(&self.quiescence) {
                return;
            }
        }
    }

    /// Deliver a blink to the cell it happened in and to each distinct neighbour
    /// whose shared edge lies within `border` of it.
    fn broadcast<'s>(
        &'s self,
        scope: &rayon::Scope<'s>,
        cell: &Cell,
        notice: &BlinkNotice,
        border: f32,
        tally: &'s Tally,
    ) {
        let origin = cell.coord();
        let mut targets = vec![origin];
        for direction in cell.bordering(notice, border) {
            let neighbour = self.geometry.neighbor(origin, direction);
            if !targets.contains(&neighbour) {
                targets.push(neighbour);
            }
        }
        tally.forwarded.fetch_add(targets.len() - 1, Ordering::Relaxed);
        for coord in targets {
            let target = self.cell_ref(coord);
            if target.post(*notice, &self.quiescence) {
                trace!(cell = %coord, firefly = %notice.id, "woke idle cell");
                scope.spawn(move |scope| self.run_cell(scope, target, tally));
            }
        }
    }

    /// Queue `notice` on the neighbour of `from` in `direction`. Returns whether
    /// the neighbour was idle and has been woken.
    ///
    /// Outside a blink phase the notice waits for the next one.
    pub fn send_blink_to(
        &self,
        notice: BlinkNotice,
        from: CellCoord,
        direction: Direction,
    ) -> bool {
        let neighbour = self.geometry.neighbor(from, direction);
        self.cell_ref(neighbour).post(notice, &self.quiescence)
    }

    #[must_use]
    pub fn manhattan_dist(&self, a: (f32, f32), b: (f32, f32)) -> f32 {
        self.geometry.toroidal_manhattan(a, b)
    }

    #[must_use]
    pub fn move_wrap_cell(&self, coord: CellCoord, dcx: i64, dcy: i64) -> CellCoord {
        self.geometry.move_wrap_cell(coord, dcx, dcy)
    }

    fn firefly_mut(&mut self, id: FireflyId) -> Result<&mut Firefly, WorldError> {
        let coord = *self
            .locations
            .get(&id)
            .ok_or(WorldError::UnknownFirefly(id))?;
        self.cell_mut(coord)
            .member_mut(id)
            .ok_or(WorldError::UnknownFirefly(id))
    }

    /// Reschedule a firefly's next blink and re-check whether it may be nudged.
    pub fn schedule_blink(&mut self, id: FireflyId, next_blink: i64) -> Result<(), WorldError> {
        let rules = self.rules();
        let firefly = self.firefly_mut(id)?;
        firefly.set_next_blink(next_blink);
        firefly.refresh_nudgeable(&rules);
        Ok(())
    }

    pub fn set_heading(&mut self, id: FireflyId, heading: Heading) -> Result<(), WorldError> {
        self.firefly_mut(id)?.set_heading(heading);
        Ok(())
    }

    #[must_use]
    pub fn firefly(&self, id: FireflyId) -> Option<FireflySnapshot> {
        let coord = self.locations.get(&id)?;
        self.cell_ref(*coord).snapshot_member(id)
    }

    /// Every firefly's state, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        let mut fireflies: Vec<FireflySnapshot> =
            self.cells.iter().flat_map(Cell::snapshots).collect();
        fireflies.sort_unstable_by_key(|firefly| firefly.id);
        WorldSnapshot {
            tick: self.tick,
            clock: self.clock,
            fireflies,
        }
    }

    /// Cell at `coord`, if it lies on the grid.
    #[must_use]
    pub fn cell(&self, coord: CellCoord) -> Option<&Cell> {
        if coord.cx >= self.geometry.cells_wide() || coord.cy >= self.geometry.cells_high() {
            return None;
        }
        Some(self.cell_ref(coord))
    }

    /// All cells in row-major order.
    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    #[must_use]
    pub fn firefly_count(&self) -> usize {
        self.locations.len()
    }

    /// Cells the current blink phase is still waiting on.
    #[must_use]
    pub fn outstanding_work(&self) -> usize {
        self.quiescence.outstanding()
    }

    #[must_use]
    pub const fn clock(&self) -> i64 {
        self.clock
    }

    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub const fn config(&self) -> &FireflyConfig {
        &self.config
    }

    #[must_use]
    pub const fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    /// Most recent tick reports, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickReport> {
        self.history.iter()
    }
}

impl fmt::Display for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "world {}x{} cells of {} at clock {}",
            self.geometry.cells_wide(),
            self.geometry.cells_high(),
            self.geometry.cell_size(),
            self.clock
        )?;
        for cell in &self.cells {
            write!(f, "\n{cell}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FireflyConfig {
        FireflyConfig {
            cells_wide: 4,
            cells_high: 3,
            cell_size: 50.0,
            rng_seed: Some(0xF1EF),
            history_capacity: 4,
            ..FireflyConfig::default()
        }
    }

    fn assert_consistent(world: &World) {
        let mut members = 0;
        for cell in world.cells() {
            for id in cell.member_ids() {
                let firefly = world.firefly(id).expect("located");
                assert_eq!(firefly.cell, cell.coord());
                let (x, y) = firefly.position();
                assert_eq!(world.geometry().cell_of(x, y), cell.coord(), "{id} misfiled");
                members += 1;
            }
        }
        assert_eq!(members, world.firefly_count());
    }

    #[test]
    fn new_world_allocates_every_cell() {
        let world = World::new(config()).expect("world");
        assert_eq!(world.cells().len(), 12);
        assert_eq!(world.clock(), 1_000_000);
        assert_eq!(world.tick(), Tick::zero());
        assert!(world.cells().iter().all(Cell::is_idle));
        assert!(world.cell(CellCoord::new(3, 2)).is_some());
        assert!(world.cell(CellCoord::new(4, 0)).is_none());
    }

    #[test]
    fn spawn_rejects_duplicates_and_bad_periods() {
        let mut world = World::new(config()).expect("world");
        world
            .spawn_firefly(10.0, 10.0, Heading::EAST, FireflyId(1), 1_000_000)
            .expect("spawn");
        assert_eq!(
            world.spawn_firefly(20.0, 20.0, Heading::EAST, FireflyId(1), 1_000_000),
            Err(WorldError::DuplicateFirefly(FireflyId(1)))
        );
        assert!(matches!(
            world.spawn_firefly(20.0, 20.0, Heading::EAST, FireflyId(2), 0),
            Err(WorldError::InvalidConfig(_))
        ));
        assert_eq!(world.firefly_count(), 1);
    }

    #[test]
    fn hatch_continues_after_existing_ids() {
        let mut world = World::new(config()).expect("world");
        let first = world.hatch_fireflies(5).expect("hatch");
        assert_eq!(first.first(), Some(&FireflyId(0)));
        let second = world.hatch_fireflies(3).expect("hatch");
        assert_eq!(second, vec![FireflyId(5), FireflyId(6), FireflyId(7)]);
        assert_eq!(
            world.hatch_fireflies_from(2, 7),
            Err(WorldError::DuplicateFirefly(FireflyId(7)))
        );
        assert_eq!(world.firefly_count(), 8);
        assert_consistent(&world);

        for firefly in world.snapshot().fireflies {
            assert!((900_000..=1_100_000).contains(&firefly.period));
            assert!(firefly.next_blink > world.clock());
        }
    }

    #[test]
    fn ids_near_the_top_of_the_range_do_not_overflow() {
        let mut world = World::new(config()).expect("world");
        assert_eq!(
            world.hatch_fireflies_from(2, u64::MAX),
            Err(WorldError::InvalidConfig("firefly id range overflows u64"))
        );
        assert_eq!(world.firefly_count(), 0);

        let last = FireflyId(u64::MAX);
        world
            .spawn_firefly(10.0, 10.0, Heading::EAST, last, 1_000_000)
            .expect("spawn");
        assert!(world.firefly(last).is_some());
        assert_eq!(
            world.hatch_fireflies(1),
            Err(WorldError::DuplicateFirefly(last))
        );
        assert_eq!(world.firefly_count(), 1);
    }

    #[test]
    fn movement_keeps_membership_consistent() {
        let mut world = World::new(config()).expect("world");
        world.hatch_fireflies(60).expect("hatch");
        let mut crossings = 0;
        for _ in 0..200 {
            crossings += world.step().reassignments;
            assert_consistent(&world);
        }
        assert!(crossings > 0, "fireflies should wander between cells");
        assert_eq!(world.tick(), Tick(200));
        assert_eq!(world.clock(), 1_000_000 + 200 * 25_000);
    }

    #[test]
    fn change_cell_rejects_unknown_fireflies() {
        let mut world = World::new(config()).expect("world");
        let change = Reassignment {
            firefly: FireflyId(3),
            from: CellCoord::new(0, 0),
            to: CellCoord::new(1, 0),
        };
        assert_eq!(
            world.change_cell(change),
            Err(WorldError::UnknownFirefly(FireflyId(3)))
        );
    }

    #[test]
    fn history_is_bounded() {
        let mut world = World::new(config()).expect("world");
        for _ in 0..6 {
            world.step();
        }
        let ticks: Vec<u64> = world.history().map(|report| report.tick.0).collect();
        assert_eq!(ticks, vec![3, 4, 5, 6]);
        assert_eq!(world.outstanding_work(), 0);
        assert!(world.cells().iter().all(|cell| cell.is_idle() && cell.pending_notices() == 0));
    }

    #[test]
    fn schedule_blink_keeps_deadline_invariant() {
        let mut world = World::new(config()).expect("world");
        let id = world
            .spawn_firefly(60.0, 60.0, Heading::NORTH, FireflyId(4), 800_000)
            .expect("spawn");
        world.schedule_blink(id, 2_000_000).expect("schedule");
        let firefly = world.firefly(id).expect("firefly");
        assert_eq!(firefly.next_blink, 2_000_000);
        assert_eq!(firefly.last_blink, 1_200_000);
        assert!(!firefly.nudgeable, "last blink lies in the future");
        assert!(world.schedule_blink(FireflyId(99), 0).is_err());
    }

    #[test]
    fn display_lists_cells_and_members() {
        let mut world = World::new(config()).expect("world");
        world
            .spawn_firefly(60.0, 10.0, Heading::from_degrees(30), FireflyId(12), 1_000_000)
            .expect("spawn");
        let rendered = world.to_string();
        assert!(rendered.starts_with("world 4x3 cells of 50 at clock 1000000"));
        assert_eq!(rendered.lines().count(), 1 + 12 + 1);
        assert!(rendered.contains("(1, 0)"));
        assert!(rendered.contains("  12:"));
    }
}
