//! Lattice primitives: points, connection ids and growth contexts.
//!
//! Every path node sits on a [`Point`] of the integer lattice. Nodes are
//! linked along one of a small universe of travel vectors, named by a
//! [`ConnectionId`]; the negated id is the reverse direction. A
//! [`GrowthContext`] selects which deterministic branching sequence applies
//! as the distance from the root grows.
//!
//! The engine never interprets connection ids itself: it stores them, compares
//! them and asks the branching oracle what they mean.

use std::fmt;
use std::num::NonZeroI8;
use std::ops::{Add, Neg, Sub};

/// Base unit of the lattice. Points whose coordinates are all multiples of
/// this value are "main points", the only anchors a branching rule uses.
pub const LATTICE_UNIT: i32 = 3;

/// A point of the 3-D integer lattice. Equality is exact.
#[derive(
    Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Point {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Point {
    /// The lattice origin.
    pub const ORIGIN: Point = Point { x: 0, y: 0, z: 0 };

    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Point { x, y, z }
    }

    /// True when every coordinate is a multiple of [`LATTICE_UNIT`].
    #[inline]
    pub fn is_main_point(&self) -> bool {
        self.x % LATTICE_UNIT == 0 && self.y % LATTICE_UNIT == 0 && self.z % LATTICE_UNIT == 0
    }

    /// Sum of the three coordinates.
    #[inline]
    pub fn coord_sum(&self) -> i64 {
        self.x as i64 + self.y as i64 + self.z as i64
    }

    /// Manhattan distance to `other`.
    #[inline]
    pub fn manhattan(&self, other: Point) -> u64 {
        let d = *self - other;
        d.x.unsigned_abs() as u64 + d.y.unsigned_abs() as u64 + d.z.unsigned_abs() as u64
    }
}

impl Add for Point {
    type Output = Point;
    #[inline]
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point {
    type Output = Point;
    #[inline]
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Point {
    type Output = Point;
    #[inline]
    fn neg(self) -> Point {
        Point::new(-self.x, -self.y, -self.z)
    }
}

impl fmt::Debug for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {} {}]", self.x, self.y, self.z)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identifier of one travel vector. Zero is not a valid id; the negated id
/// names the reverse direction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ConnectionId(NonZeroI8);

impl ConnectionId {
    /// Creates a connection id, returning `None` for 0 or `i8::MIN` (which has
    /// no reverse).
    #[inline]
    pub fn new(raw: i8) -> Option<Self> {
        if raw == i8::MIN {
            return None;
        }
        NonZeroI8::new(raw).map(ConnectionId)
    }

    #[inline]
    pub const fn get(self) -> i8 {
        self.0.get()
    }

    /// The id of the opposite travel direction.
    #[inline]
    pub fn reverse(self) -> Self {
        // i8::MIN is rejected by `new`, so the negation never overflows or hits zero.
        ConnectionId(self.0.checked_neg().unwrap_or(self.0))
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{:+03}", self.get())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Parameters selecting the deterministic branching-rule sequence of a path
/// context.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct GrowthContext {
    pub id: i32,
    pub growth_type: u8,
    pub growth_index: i32,
}

impl GrowthContext {
    pub const fn new(id: i32, growth_type: u8, growth_index: i32) -> Self {
        GrowthContext {
            id,
            growth_type,
            growth_index,
        }
    }
}

impl fmt::Display for GrowthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GC{}-{}-{}", self.id, self.growth_type, self.growth_index)
    }
}
