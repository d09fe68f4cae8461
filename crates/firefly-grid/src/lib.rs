//! Toroidal grid geometry shared by the firefly simulation crates.
//!
//! The world is a rectangle of `cells_wide × cells_high` square cells that wraps on
//! both axes. Everything here is pure arithmetic: positions are wrapped into
//! `[0, extent)`, distances take the shorter way around the torus, and headings are
//! quantised to whole degrees so the hot path can read a precomputed cos/sin table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Number of distinct headings stored in the trigonometric cache.
pub const DEGREES_PER_TURN: u16 = 360;

/// Errors emitted while building grid geometry.
#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    /// Indicates configuration values that cannot describe a grid (e.g., zero cells).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Wrap a single coordinate into `[0, extent)`.
#[must_use]
pub fn wrap_coordinate(value: f32, extent: f32) -> f32 {
    debug_assert!(extent > 0.0, "extent must be positive");
    if !value.is_finite() {
        return 0.0;
    }
    let mut wrapped = value.rem_euclid(extent);
    // rem_euclid rounds tiny negatives up to exactly `extent`
    if wrapped >= extent {
        wrapped -= extent;
    }
    wrapped
}

/// Orientation quantised to whole degrees, always in `[0, 360)`.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Heading(u16);

impl Heading {
    /// Heading pointing along +x.
    pub const EAST: Self = Self(0);
    /// Heading pointing along +y.
    pub const NORTH: Self = Self(90);
    /// Heading pointing along -x.
    pub const WEST: Self = Self(180);
    /// Heading pointing along -y.
    pub const SOUTH: Self = Self(270);

    /// Normalise an arbitrary number of degrees into `[0, 360)`.
    #[must_use]
    pub fn from_degrees(degrees: i32) -> Self {
        Self(degrees.rem_euclid(i32::from(DEGREES_PER_TURN)) as u16)
    }

    /// Degrees in `[0, 360)`.
    #[must_use]
    pub const fn degrees(self) -> u16 {
        self.0
    }

    /// Rotate by `delta` degrees, wrapping around the full turn.
    #[must_use]
    pub fn turned(self, delta: i32) -> Self {
        Self::from_degrees(i32::from(self.0) + delta)
    }

    /// Cached `(cos, sin)` of this heading.
    #[must_use]
    pub fn unit_vector(self) -> (f32, f32) {
        trig_table().unit_vector(self)
    }
}

impl fmt::Display for Heading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.0)
    }
}

/// Cosine and sine for every whole degree.
#[derive(Debug)]
pub struct TrigTable {
    cos: [f32; DEGREES_PER_TURN as usize],
    sin: [f32; DEGREES_PER_TURN as usize],
}

impl TrigTable {
    fn build() -> Self {
        let mut cos = [0.0; DEGREES_PER_TURN as usize];
        let mut sin = [0.0; DEGREES_PER_TURN as usize];
        for degree in 0..usize::from(DEGREES_PER_TURN) {
            let radians = (degree as f64).to_radians();
            cos[degree] = radians.cos() as f32;
            sin[degree] = radians.sin() as f32;
        }
        Self { cos, sin }
    }

    /// Cached cosine of `heading`.
    #[must_use]
    pub fn cos(&self, heading: Heading) -> f32 {
        self.cos[usize::from(heading.degrees())]
    }

    /// Cached sine of `heading`.
    #[must_use]
    pub fn sin(&self, heading: Heading) -> f32 {
        self.sin[usize::from(heading.degrees())]
    }

    /// Cached `(cos, sin)` pair of `heading`.
    #[must_use]
    pub fn unit_vector(&self, heading: Heading) -> (f32, f32) {
        let degree = usize::from(heading.degrees());
        (self.cos[degree], self.sin[degree])
    }
}

/// Process-wide trigonometric cache, built on first use and read-only afterwards.
pub fn trig_table() -> &'static TrigTable {
    static TABLE: OnceLock<TrigTable> = OnceLock::new();
    TABLE.get_or_init(TrigTable::build)
}

/// Integer coordinates of a cell inside the grid.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct CellCoord {
    pub cx: u32,
    pub cy: u32,
}

impl CellCoord {
    /// Construct a new cell coordinate.
    #[must_use]
    pub const fn new(cx: u32, cy: u32) -> Self {
        Self { cx, cy }
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.cx, self.cy)
    }
}

/// Cardinal neighbour of a cell.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Direction {
    Left,
    Right,
    Bottom,
    Top,
}

impl Direction {
    /// All four cardinal directions.
    pub const ALL: [Self; 4] = [Self::Left, Self::Right, Self::Bottom, Self::Top];

    /// Grid offset of the neighbour in this direction.
    #[must_use]
    pub const fn delta(self) -> (i64, i64) {
        match self {
            Self::Left => (-1, 0),
            Self::Right => (1, 0),
            Self::Bottom => (0, -1),
            Self::Top => (0, 1),
        }
    }
}

/// Axis-aligned rectangle covered by a cell, half-open on the high edges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CellBounds {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
}

impl CellBounds {
    /// Whether `(x, y)` lies inside the rectangle.
    #[must_use]
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x < self.right && y >= self.bottom && y < self.top
    }

    /// Distance from `(x, y)` to the edge facing `direction`.
    #[must_use]
    pub fn edge_distance(&self, x: f32, y: f32, direction: Direction) -> f32 {
        match direction {
            Direction::Left => x - self.left,
            Direction::Right => self.right - x,
            Direction::Bottom => y - self.bottom,
            Direction::Top => self.top - y,
        }
    }
}

/// Dimensions of the toroidal world and the cell grid laid over it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GridGeometry {
    cells_wide: u32,
    cells_high: u32,
    cell_size: f32,
    width: f32,
    height: f32,
    half_width: f32,
    half_height: f32,
}

impl GridGeometry {
    /// Build the geometry, rejecting degenerate grids.
    pub fn new(cells_wide: u32, cells_high: u32, cell_size: f32) -> Result<Self, GridError> {
        if cells_wide == 0 || cells_high == 0 {
            return Err(GridError::InvalidConfig("grid dimensions must be non-zero"));
        }
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(GridError::InvalidConfig("cell_size must be positive"));
        }
        let width = cells_wide as f32 * cell_size;
        let height = cells_high as f32 * cell_size;
        Ok(Self {
            cells_wide,
            cells_high,
            cell_size,
            width,
            height,
            half_width: width / 2.0,
            half_height: height / 2.0,
        })
    }

    #[must_use]
    pub const fn cells_wide(&self) -> u32 {
        self.cells_wide
    }

    #[must_use]
    pub const fn cells_high(&self) -> u32 {
        self.cells_high
    }

    #[must_use]
    pub const fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// World extent along x.
    #[must_use]
    pub const fn width(&self) -> f32 {
        self.width
    }

    /// World extent along y.
    #[must_use]
    pub const fn height(&self) -> f32 {
        self.height
    }

    /// Total number of cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cells_wide as usize * self.cells_high as usize
    }

    /// Wrap a position into `[0, width) × [0, height)`.
    #[must_use]
    pub fn wrap_position(&self, x: f32, y: f32) -> (f32, f32) {
        (
            wrap_coordinate(x, self.width),
            wrap_coordinate(y, self.height),
        )
    }

    /// Manhattan distance on the torus; each axis takes the shorter way around.
    /// Points outside the world are wrapped first.
    #[must_use]
    pub fn toroidal_manhattan(&self, a: (f32, f32), b: (f32, f32)) -> f32 {
        let mut dx = (a.0 - b.0).rem_euclid(self.width);
        if dx > self.half_width {
            dx = self.width - dx;
        }
        let mut dy = (a.1 - b.1).rem_euclid(self.height);
        if dy > self.half_height {
            dy = self.height - dy;
        }
        dx + dy
    }

    /// Shift `coord` by `(dcx, dcy)` cells, wrapping around the grid.
    #[must_use]
    pub fn move_wrap_cell(&self, coord: CellCoord, dcx: i64, dcy: i64) -> CellCoord {
        let cx = (i64::from(coord.cx) + dcx).rem_euclid(i64::from(self.cells_wide));
        let cy = (i64::from(coord.cy) + dcy).rem_euclid(i64::from(self.cells_high));
        CellCoord::new(cx as u32, cy as u32)
    }

    /// Neighbouring cell in `direction`.
    #[must_use]
    pub fn neighbor(&self, coord: CellCoord, direction: Direction) -> CellCoord {
        let (dcx, dcy) = direction.delta();
        self.move_wrap_cell(coord, dcx, dcy)
    }

    /// Cell containing an already wrapped position.
    #[must_use]
    pub fn cell_of(&self, x: f32, y: f32) -> CellCoord {
        let cx = ((x / self.cell_size) as u32).min(self.cells_wide - 1);
        let cy = ((y / self.cell_size) as u32).min(self.cells_high - 1);
        CellCoord::new(cx, cy)
    }

    /// World-space rectangle covered by `coord`.
    #[must_use]
    pub fn cell_bounds(&self, coord: CellCoord) -> CellBounds {
        let left = coord.cx as f32 * self.cell_size;
        let bottom = coord.cy as f32 * self.cell_size;
        CellBounds {
            left,
            right: left + self.cell_size,
            bottom,
            top: bottom + self.cell_size,
        }
    }

    /// Flat row-major offset of `coord`.
    #[inline]
    #[must_use]
    pub fn offset(&self, coord: CellCoord) -> usize {
        debug_assert!(coord.cx < self.cells_wide && coord.cy < self.cells_high);
        coord.cy as usize * self.cells_wide as usize + coord.cx as usize
    }

    /// Inverse of [`GridGeometry::offset`].
    #[must_use]
    pub fn coord_at(&self, offset: usize) -> CellCoord {
        let wide = self.cells_wide as usize;
        CellCoord::new((offset % wide) as u32, (offset / wide) as u32)
    }

    /// Iterate every cell coordinate in row-major order.
    pub fn coords(&self) -> impl Iterator<Item = CellCoord> + '_ {
        (0..self.cell_count()).map(|offset| self.coord_at(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_10x10() -> GridGeometry {
        GridGeometry::new(10, 10, 100.0).expect("geometry")
    }

    #[test]
    fn trig_table_matches_exact_values() {
        let table = trig_table();
        for degree in 0..360 {
            let heading = Heading::from_degrees(degree);
            let radians = f64::from(degree).to_radians();
            assert!((f64::from(table.cos(heading)) - radians.cos()).abs() < 1e-6);
            assert!((f64::from(table.sin(heading)) - radians.sin()).abs() < 1e-6);
        }

        let half_sqrt3 = 3.0_f32.sqrt() / 2.0;
        let cases = [
            (0, 1.0, 0.0),
            (30, half_sqrt3, 0.5),
            (60, 0.5, half_sqrt3),
            (90, 0.0, 1.0),
            (150, -half_sqrt3, 0.5),
            (180, -1.0, 0.0),
            (240, -0.5, -half_sqrt3),
            (270, 0.0, -1.0),
            (330, half_sqrt3, -0.5),
        ];
        for (degree, cos, sin) in cases {
            let (c, s) = Heading::from_degrees(degree).unit_vector();
            assert!((c - cos).abs() < 1e-6, "cos({degree}) = {c}");
            assert!((s - sin).abs() < 1e-6, "sin({degree}) = {s}");
        }
    }

    #[test]
    fn trig_table_is_shared() {
        assert!(std::ptr::eq(trig_table(), trig_table()));
    }

    #[test]
    fn heading_normalises_into_full_turn() {
        let cases = [
            (0, 0),
            (15, 15),
            (179, 179),
            (359, 359),
            (360, 0),
            (720, 0),
            (-360, 0),
            (-1, 359),
            (-721, 359),
        ];
        for (input, expected) in cases {
            let heading = Heading::from_degrees(input);
            assert_eq!(heading.degrees(), expected, "input {input}");
            assert_eq!(Heading::from_degrees(i32::from(heading.degrees())), heading);
        }
        assert_eq!(Heading::EAST.turned(-1), Heading::from_degrees(359));
        assert_eq!(Heading::from_degrees(359).turned(1), Heading::EAST);
    }

    #[test]
    fn wrap_position_lands_inside_world() {
        let grid = grid_10x10();
        let cases = [
            ((0.0, 0.0), (0.0, 0.0)),
            ((1010.0, 1010.0), (10.0, 10.0)),
            ((-10.0, -10.0), (990.0, 990.0)),
            ((1000.0, -1000.0), (0.0, 0.0)),
            ((5000.5, 250.0), (0.5, 250.0)),
        ];
        for ((x, y), (ex, ey)) in cases {
            let (wx, wy) = grid.wrap_position(x, y);
            assert!((wx - ex).abs() < 1e-3, "x {x} wrapped to {wx}");
            assert!((wy - ey).abs() < 1e-3, "y {y} wrapped to {wy}");
            assert_eq!(grid.wrap_position(wx, wy), (wx, wy), "wrapping is idempotent");
        }

        let (tiny, _) = grid.wrap_position(-1e-9, 0.0);
        assert!((0.0..grid.width()).contains(&tiny));
        assert_eq!(wrap_coordinate(f32::NAN, 10.0), 0.0);
    }

    #[test]
    fn toroidal_distance_prefers_wraparound() {
        let grid = grid_10x10();
        let cases = [
            ((99.5, 99.5), (99.5, 99.5), 0.0),
            ((50.0, 50.0), (50.0, 950.0), 100.0),
            ((50.0, 850.0), (50.0, 950.0), 100.0),
            ((50.0, 50.0), (950.0, 50.0), 100.0),
            ((50.0, 50.0), (950.0, 950.0), 200.0),
            ((50.0, 50.0), (150.0, 150.0), 200.0),
            ((0.0, 0.0), (500.0, 0.0), 500.0),
        ];
        for (a, b, expected) in cases {
            let forward = grid.toroidal_manhattan(a, b);
            let backward = grid.toroidal_manhattan(b, a);
            assert!((forward - expected).abs() < 1e-4, "{a:?} -> {b:?} = {forward}");
            assert!((forward - backward).abs() < 1e-6, "distance must be symmetric");
        }
    }

    #[test]
    fn toroidal_manhattan_wraps_points_outside_the_world() {
        let grid = grid_10x10();
        let cases = [
            ((0.0, 0.0), (2500.0, 0.0), 500.0),
            ((0.0, 0.0), (-2900.0, 0.0), 100.0),
            ((1010.0, 20.0), (0.0, -30.0), 60.0),
        ];
        for (a, b, expected) in cases {
            let distance = grid.toroidal_manhattan(a, b);
            assert!(distance >= 0.0, "{a:?} -> {b:?} = {distance}");
            assert!((distance - expected).abs() < 1e-3, "{a:?} -> {b:?} = {distance}");
        }
    }

    #[test]
    fn move_wrap_cell_handles_large_deltas() {
        let grid = grid_10x10();
        let origin = CellCoord::new(0, 0);
        let cases = [
            ((0, 0), (0, 0)),
            ((-1, -1), (9, 9)),
            ((-101, -101), (9, 9)),
            ((10, 10), (0, 0)),
            ((100, 100), (0, 0)),
            ((13, -7), (3, 3)),
        ];
        for ((dcx, dcy), (cx, cy)) in cases {
            assert_eq!(
                grid.move_wrap_cell(origin, dcx, dcy),
                CellCoord::new(cx, cy),
                "delta ({dcx}, {dcy})"
            );
        }
    }

    #[test]
    fn neighbors_wrap_at_grid_edges() {
        let grid = grid_10x10();
        let corner = CellCoord::new(0, 0);
        assert_eq!(grid.neighbor(corner, Direction::Left), CellCoord::new(9, 0));
        assert_eq!(grid.neighbor(corner, Direction::Right), CellCoord::new(1, 0));
        assert_eq!(grid.neighbor(corner, Direction::Bottom), CellCoord::new(0, 9));
        assert_eq!(grid.neighbor(corner, Direction::Top), CellCoord::new(0, 1));
    }

    #[test]
    fn cell_lookup_and_bounds_agree() {
        let grid = grid_10x10();
        let coord = grid.cell_of(250.0, 999.9);
        assert_eq!(coord, CellCoord::new(2, 9));
        let bounds = grid.cell_bounds(coord);
        assert!(bounds.contains(250.0, 999.9));
        assert!(!bounds.contains(300.0, 950.0));
        assert!((bounds.edge_distance(250.0, 999.9, Direction::Left) - 50.0).abs() < 1e-3);
        assert!((bounds.edge_distance(250.0, 950.0, Direction::Top) - 50.0).abs() < 1e-3);

        for (offset, coord) in grid.coords().enumerate() {
            assert_eq!(grid.offset(coord), offset);
        }
        assert_eq!(grid.coords().count(), 100);
    }

    #[test]
    fn degenerate_grids_are_rejected() {
        assert!(GridGeometry::new(0, 4, 10.0).is_err());
        assert!(GridGeometry::new(4, 0, 10.0).is_err());
        assert!(GridGeometry::new(4, 4, 0.0).is_err());
        assert!(GridGeometry::new(4, 4, -1.0).is_err());
        assert!(GridGeometry::new(4, 4, f32::NAN).is_err());
        let grid = GridGeometry::new(4, 2, 25.0).expect("geometry");
        assert_eq!((grid.width(), grid.height()), (100.0, 50.0));
    }
}
