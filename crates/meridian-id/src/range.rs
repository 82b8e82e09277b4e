//! Clockwise identifier ranges.

use std::fmt;

use crate::{Distance, Id};

/// A half-open clockwise arc `[ccw, cw)` of the ring.
///
/// Two degenerate forms exist: the full ring and the empty range. Both are
/// anchored at a point so that halves and merges stay well-defined.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IdRange {
    ccw: Id,
    cw: Id,
    full: bool,
}

impl IdRange {
    /// The arc from `ccw` (inclusive) clockwise to `cw` (exclusive).
    ///
    /// Equal ends give the empty range.
    pub const fn new(ccw: Id, cw: Id) -> Self {
        Self { ccw, cw, full: false }
    }

    /// The whole ring, anchored at `at`.
    pub const fn full(at: Id) -> Self {
        Self { ccw: at, cw: at, full: true }
    }

    /// The empty range at `at`.
    pub const fn empty(at: Id) -> Self {
        Self { ccw: at, cw: at, full: false }
    }

    /// Counter-clockwise (inclusive) end.
    pub const fn ccw(&self) -> Id {
        self.ccw
    }

    /// Clockwise (exclusive) end.
    pub const fn cw(&self) -> Id {
        self.cw
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.ccw == self.cw
    }

    /// Whether `id` falls inside the arc.
    pub fn contains(&self, id: &Id) -> bool {
        if self.full {
            return true;
        }
        if self.is_empty() {
            return false;
        }
        self.ccw.cw_distance(id) < self.ccw.cw_distance(&self.cw)
    }

    /// Clockwise midpoint of the arc.
    pub fn midpoint(&self) -> Id {
        let span = if self.full {
            Distance::HALF_RING
        } else {
            self.ccw.cw_distance(&self.cw).halved()
        };
        self.ccw.add_distance(span)
    }

    /// The half of the arc adjacent to the counter-clockwise end.
    pub fn ccw_half(&self) -> IdRange {
        IdRange::new(self.ccw, self.midpoint())
    }

    /// The half of the arc adjacent to the clockwise end.
    pub fn cw_half(&self) -> IdRange {
        let mid = self.midpoint();
        IdRange::new(mid, self.cw)
    }

    /// Join two ranges that share an end point.
    ///
    /// Returns `None` when the ranges are not adjacent.
    pub fn merge(&self, other: &IdRange) -> Option<IdRange> {
        if self.full || other.full {
            return Some(IdRange::full(self.ccw));
        }
        if self.is_empty() {
            return Some(*other);
        }
        if other.is_empty() {
            return Some(*self);
        }
        if self.cw == other.ccw {
            if other.cw == self.ccw {
                return Some(IdRange::full(self.ccw));
            }
            return Some(IdRange::new(self.ccw, other.cw));
        }
        if other.cw == self.ccw {
            return Some(IdRange::new(other.ccw, self.cw));
        }
        None
    }
}

impl fmt::Debug for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.full {
            write!(f, "IdRange(full @ {:?})", self.ccw)
        } else {
            write!(f, "IdRange[{:?}, {:?})", self.ccw, self.cw)
        }
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.full {
            write!(f, "[full ring]")
        } else {
            write!(f, "[{}, {})", self.ccw, self.cw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_is_half_open() {
        let r = IdRange::new(Id::new(10), Id::new(20));
        assert!(r.contains(&Id::new(10)));
        assert!(r.contains(&Id::new(19)));
        assert!(!r.contains(&Id::new(20)));
        assert!(!r.contains(&Id::new(9)));
    }

    #[test]
    fn wrapping_range() {
        let r = IdRange::new(Id::MAX, Id::new(2));
        assert!(r.contains(&Id::MAX));
        assert!(r.contains(&Id::ZERO));
        assert!(!r.contains(&Id::new(2)));
    }

    #[test]
    fn degenerate_forms() {
        let at = Id::new(7);
        assert!(IdRange::full(at).contains(&Id::new(12345)));
        assert!(!IdRange::empty(at).contains(&at));
        assert!(IdRange::empty(at).is_empty());
        assert!(!IdRange::full(at).is_empty());
    }

    #[test]
    fn halves_split_at_midpoint() {
        let r = IdRange::new(Id::new(0), Id::new(100));
        assert_eq!(r.ccw_half(), IdRange::new(Id::new(0), Id::new(50)));
        assert_eq!(r.cw_half(), IdRange::new(Id::new(50), Id::new(100)));
    }

    #[test]
    fn merge_adjacent() {
        let a = IdRange::new(Id::new(0), Id::new(50));
        let b = IdRange::new(Id::new(50), Id::new(80));
        assert_eq!(a.merge(&b), Some(IdRange::new(Id::new(0), Id::new(80))));
        assert_eq!(b.merge(&a), Some(IdRange::new(Id::new(0), Id::new(80))));

        let c = IdRange::new(Id::new(90), Id::new(95));
        assert_eq!(a.merge(&c), None);
    }

    #[test]
    fn merge_closing_the_ring_is_full() {
        let a = IdRange::new(Id::new(0), Id::new(50));
        let b = IdRange::new(Id::new(50), Id::new(0));
        assert!(a.merge(&b).unwrap().is_full());
    }
}
