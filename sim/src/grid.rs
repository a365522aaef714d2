//! Grid addressing for belt cells.
//!
//! The world is a lattice of integer cells. `y` is vertical; belts only
//! turn in the horizontal plane, but a straight cell may face up or down.

use crate::curve::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer cell coordinate.
///
/// Ordering (x, then y, then z) is the stable sort key used wherever
/// iteration order matters, most importantly for network members.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl GridPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The neighbouring cell across `facing`.
    #[inline]
    pub fn relative(self, facing: Facing) -> Self {
        let (dx, dy, dz) = facing.offset();
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// World-space centre of the cell floor.
    #[inline]
    pub fn center(self) -> Vec3 {
        Vec3::new(self.x as f64 + 0.5, self.y as f64, self.z as f64 + 0.5)
    }
}

impl fmt::Display for GridPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// One of the six cell faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Facing {
    North,
    South,
    East,
    West,
    Up,
    Down,
}

impl Facing {
    pub const HORIZONTAL: [Facing; 4] = [Facing::North, Facing::East, Facing::South, Facing::West];

    /// Unit step toward this face. North is -z, East is +x.
    pub fn offset(self) -> (i32, i32, i32) {
        match self {
            Facing::North => (0, 0, -1),
            Facing::South => (0, 0, 1),
            Facing::East => (1, 0, 0),
            Facing::West => (-1, 0, 0),
            Facing::Up => (0, 1, 0),
            Facing::Down => (0, -1, 0),
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Facing::North => Facing::South,
            Facing::South => Facing::North,
            Facing::East => Facing::West,
            Facing::West => Facing::East,
            Facing::Up => Facing::Down,
            Facing::Down => Facing::Up,
        }
    }

    /// Rotation about the vertical axis. Vertical faces are unchanged.
    pub fn clockwise(self) -> Self {
        match self {
            Facing::North => Facing::East,
            Facing::East => Facing::South,
            Facing::South => Facing::West,
            Facing::West => Facing::North,
            other => other,
        }
    }

    pub fn counter_clockwise(self) -> Self {
        match self {
            Facing::North => Facing::West,
            Facing::West => Facing::South,
            Facing::South => Facing::East,
            Facing::East => Facing::North,
            other => other,
        }
    }

    #[inline]
    pub fn is_horizontal(self) -> bool {
        !matches!(self, Facing::Up | Facing::Down)
    }

    pub fn vector(self) -> Vec3 {
        let (x, y, z) = self.offset();
        Vec3::new(x as f64, y as f64, z as f64)
    }
}
