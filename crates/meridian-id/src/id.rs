//! Identifiers on the 128-bit ring.
//!
//! An [`Id`] is an unsigned 128-bit value interpreted as a point on a circle
//! of circumference 2^128. Routing treats an identifier two ways at once:
//!
//! - as a string of base-2^b **digits** (digit 0 is least significant), which
//!   indexes the prefix routing table;
//! - as a **position** on the ring, which orders leaf-set members and decides
//!   which live node is numerically closest to a key.
//!
//! All operations are total. Out-of-range digit positions or digit widths are
//! caller bugs and panic.

use std::fmt;
use std::str::FromStr;

use crate::error::ParseIdError;

/// Bit width of every identifier.
pub const ID_BITS: u32 = 128;

/// Widest supported digit (columns per routing-table row = 2^b).
pub const MAX_DIGIT_BITS: u8 = 8;

const HALF_RING: u128 = 1 << (ID_BITS - 1);

/// A position on the identifier ring.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Id(u128);

/// Magnitude of separation between two identifiers.
///
/// Only ordering is meaningful to callers; the raw value is exposed for
/// midpoint computation and display.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Distance(u128);

impl Distance {
    /// No separation.
    pub const ZERO: Self = Self(0);

    /// Half the ring, the largest possible [`Id::distance`].
    pub const HALF_RING: Self = Self(HALF_RING);

    /// Raw value.
    pub const fn as_u128(&self) -> u128 {
        self.0
    }

    /// Half of this distance, rounded down.
    pub const fn halved(&self) -> Self {
        Self(self.0 / 2)
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({:#034x})", self.0)
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Number of digit positions in an identifier for `digit_bits`-wide digits.
///
/// This is also the number of rows in a routing table. When `digit_bits`
/// does not divide [`ID_BITS`] the most significant digit is narrower.
pub fn num_digits(digit_bits: u8) -> usize {
    check_digit_bits(digit_bits);
    ID_BITS.div_ceil(u32::from(digit_bits)) as usize
}

#[inline]
fn check_digit_bits(digit_bits: u8) {
    assert!(
        (1..=MAX_DIGIT_BITS).contains(&digit_bits),
        "digit width {} outside 1..={}",
        digit_bits,
        MAX_DIGIT_BITS
    );
}

impl Id {
    /// The identifier 0.
    pub const ZERO: Self = Self(0);

    /// The largest identifier, one step counter-clockwise of [`Id::ZERO`].
    pub const MAX: Self = Self(u128::MAX);

    /// Create from a raw value.
    pub const fn new(value: u128) -> Self {
        Self(value)
    }

    /// Raw value.
    pub const fn as_u128(&self) -> u128 {
        self.0
    }

    /// Create from 16 big-endian bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }

    /// Big-endian bytes.
    pub const fn to_bytes(&self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    /// Derive an identifier from arbitrary material with Blake3.
    ///
    /// Applications use this to map names to routable keys.
    pub fn hash(data: &[u8]) -> Self {
        let digest = blake3::hash(data);
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        Self::from_bytes(bytes)
    }

    /// Full 32-character lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parse the 32-character hex form produced by [`Id::to_hex`].
    pub fn from_hex(s: &str) -> Result<Self, ParseIdError> {
        let bytes = hex::decode(s)?;
        let bytes: [u8; 16] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| ParseIdError::Length(b.len()))?;
        Ok(Self::from_bytes(bytes))
    }

    /// The digit at position `index` (0 = least significant) in base 2^`digit_bits`.
    ///
    /// # Panics
    ///
    /// If `digit_bits` is outside `1..=8` or `index >= num_digits(digit_bits)`.
    pub fn digit(&self, index: usize, digit_bits: u8) -> u8 {
        let rows = num_digits(digit_bits);
        assert!(index < rows, "digit index {} out of range (rows = {})", index, rows);
        let shift = index as u32 * u32::from(digit_bits);
        let mask = (1u128 << digit_bits) - 1;
        ((self.0 >> shift) & mask) as u8
    }

    /// A copy of this identifier with digit `index` replaced by `value`.
    ///
    /// Bits of `value` beyond the digit width (or beyond the ring, for the
    /// narrow top digit) are discarded.
    pub fn with_digit(self, index: usize, value: u8, digit_bits: u8) -> Self {
        let rows = num_digits(digit_bits);
        assert!(index < rows, "digit index {} out of range (rows = {})", index, rows);
        let shift = index as u32 * u32::from(digit_bits);
        let mask = ((1u128 << digit_bits) - 1) << shift;
        let value = (u128::from(value) << shift) & mask;
        Self((self.0 & !mask) | value)
    }

    /// Index of the most significant bit at which the identifiers differ.
    pub fn msdb(&self, other: &Id) -> Option<u32> {
        let diff = self.0 ^ other.0;
        if diff == 0 {
            None
        } else {
            Some(ID_BITS - 1 - diff.leading_zeros())
        }
    }

    /// Index of the most significant differing digit, or `None` when equal.
    ///
    /// Identifiers sharing a longer high-order prefix have a smaller index.
    pub fn msdd(&self, other: &Id, digit_bits: u8) -> Option<usize> {
        check_digit_bits(digit_bits);
        self.msdb(other)
            .map(|bit| (bit / u32::from(digit_bits)) as usize)
    }

    /// Shortest distance around the ring, in either direction.
    ///
    /// Symmetric: `a.distance(&b) == b.distance(&a)`.
    pub fn distance(&self, other: &Id) -> Distance {
        let d = self.0.wrapping_sub(other.0);
        Distance(d.min(d.wrapping_neg()))
    }

    /// Distance the long way around the ring.
    pub fn long_distance(&self, other: &Id) -> Distance {
        let d = self.0.wrapping_sub(other.0);
        Distance(d.max(d.wrapping_neg()))
    }

    /// Distance walked clockwise (increasing values) from `self` to `other`.
    pub fn cw_distance(&self, other: &Id) -> Distance {
        Distance(other.0.wrapping_sub(self.0))
    }

    /// Distance walked counter-clockwise (decreasing values) from `self` to `other`.
    pub fn ccw_distance(&self, other: &Id) -> Distance {
        Distance(self.0.wrapping_sub(other.0))
    }

    /// Whether `other` lies in the clockwise half-ring starting at `self`.
    ///
    /// True when walking clockwise from `self` reaches `other` within half a
    /// ring, i.e. `other - self` is in `(0, 2^127]`. The exact antipode is
    /// clockwise of both ends.
    pub fn clockwise(&self, other: &Id) -> bool {
        let d = other.0.wrapping_sub(self.0);
        d != 0 && d <= HALF_RING
    }

    /// Whether `self` lies in the clockwise interval `[ccw, cw)`.
    ///
    /// When `ccw == cw` the interval is the single point `ccw`.
    pub fn is_between(&self, ccw: &Id, cw: &Id) -> bool {
        if ccw == cw {
            return self == ccw;
        }
        ccw.cw_distance(self) < ccw.cw_distance(cw)
    }

    /// Move `distance` clockwise.
    pub fn add_distance(&self, distance: Distance) -> Id {
        Id(self.0.wrapping_add(distance.0))
    }
}

/// Free-standing orientation predicate: is `candidate` clockwise of `base`?
///
/// Leaf-set halves use this to decide which side a handle belongs on.
pub fn is_clockwise(base: &Id, candidate: &Id) -> bool {
    base.clockwise(candidate)
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({:#034x})", self.0)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Show first 8 hex chars
        write!(f, "<{}..>", &self.to_hex()[..8])
    }
}

impl FromStr for Id {
    type Err = ParseIdError;

    /// Accepts an optional `0x` prefix and up to 32 hex digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.is_empty() || digits.len() > 32 {
            return Err(ParseIdError::Length(digits.len()));
        }
        u128::from_str_radix(digits, 16)
            .map(Id)
            .map_err(|_| ParseIdError::InvalidDigit)
    }
}

impl From<u128> for Id {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl From<Id> for u128 {
    fn from(id: Id) -> Self {
        id.0
    }
}
