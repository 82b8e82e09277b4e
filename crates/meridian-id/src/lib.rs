//! Meridian Identifier Space
//!
//! Every node and every routable key in the Meridian overlay is a point on a
//! ring of 2^128 identifiers.
//!
//! # Two Views of One Number
//!
//! - **Digits**: an identifier read in base 2^b (default b = 4). The most
//!   significant differing digit (MSDD) between the local node and a key
//!   selects the routing-table row; the key's digit at that row selects the
//!   column. Each hop fixes at least one more digit, giving O(log N) hops.
//! - **Ring position**: [`Id::distance`] is the shortest way around the ring,
//!   used to pick the numerically closest live node as a key's terminus.
//!   [`Id::clockwise`] orients a candidate relative to a base, which is how
//!   leaf-set members are split into two halves.
//!
//! ```text
//!             clockwise →
//!   ... ─ ccw[1] ─ ccw[0] ─ [ local ] ─ cw[0] ─ cw[1] ─ ...
//! ```

mod error;
mod id;
mod range;

pub use error::ParseIdError;
pub use id::{is_clockwise, num_digits, Distance, Id, ID_BITS, MAX_DIGIT_BITS};
pub use range::IdRange;

/// Default digit width in bits (routing-table columns = 16).
pub const DEFAULT_DIGIT_BITS: u8 = 4;

// Compile-time check that the default digit width is supported
const _: () = assert!(DEFAULT_DIGIT_BITS >= 1 && DEFAULT_DIGIT_BITS <= MAX_DIGIT_BITS);
