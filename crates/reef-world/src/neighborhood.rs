//! 26-connected Moore neighborhood in three dimensions.

use reef_core::{Coord, Layout};

/// Neighbor offsets `(dx, dy, dz)` in enumeration order.
///
/// Face neighbors come first (z, then y, then x), followed by the edge and
/// corner diagonals. Seeded runs rely on this order staying fixed.
pub const OFFSETS: [(i8, i8, i8); 26] = [
    (0, 0, 1),
    (0, 0, -1),
    (0, 1, 0),
    (0, -1, 0),
    (1, 0, 0),
    (-1, 0, 0),
    (0, 1, -1),
    (0, 1, 1),
    (0, -1, -1),
    (0, -1, 1),
    (1, 1, 0),
    (1, -1, 0),
    (1, 0, -1),
    (1, 0, 1),
    (-1, 1, 0),
    (-1, -1, 0),
    (-1, 0, -1),
    (-1, 0, 1),
    (1, 1, -1),
    (1, 1, 1),
    (1, -1, -1),
    (1, -1, 1),
    (-1, 1, -1),
    (-1, 1, 1),
    (-1, -1, -1),
    (-1, -1, 1),
];

/// Coordinates of every in-bounds neighbor of `coord`, in [`OFFSETS`] order.
///
/// # Panics
///
/// Panics if `coord` itself lies outside `layout`.
pub fn neighbors(layout: &Layout, coord: Coord) -> impl Iterator<Item = Coord> + '_ {
    assert!(
        layout.contains(coord),
        "neighborhood of {} requested outside a {}x{}x{} grid",
        coord,
        layout.length,
        layout.width,
        layout.height
    );

    OFFSETS
        .iter()
        .filter_map(move |&(dx, dy, dz)| coord.offset(dx, dy, dz))
        .filter(move |candidate| layout.contains(*candidate))
}
