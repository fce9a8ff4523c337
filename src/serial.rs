//! Serial number arithmetic.
//!
//! SOA serials are 32-bit sequence numbers that wrap around.  Comparing them
//! follows [RFC 1982]: a serial is "before" another if the forward distance
//! between them, modulo 2^32, is less than half the number space.
//!
//! [RFC 1982]: https://datatracker.ietf.org/doc/html/rfc1982

use std::cmp::Ordering;

//----------- less() -----------------------------------------------------------

/// Whether serial `a` strictly precedes serial `b`.
///
/// The difference `b - a` is computed with wraparound and interpreted as a
/// signed 32-bit number; `a` precedes `b` iff that number is positive.  For
/// serials exactly 2^31 apart, the result is `false` in both directions.
pub const fn less(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) > 0
}

//----------- compare() --------------------------------------------------------

/// Compare two serials.
///
/// Returns [`None`] if the serials are exactly 2^31 apart, in which case
/// RFC 1982 leaves their ordering undefined.
pub const fn compare(a: u32, b: u32) -> Option<Ordering> {
    if a == b {
        Some(Ordering::Equal)
    } else if less(a, b) {
        Some(Ordering::Less)
    } else if less(b, a) {
        Some(Ordering::Greater)
    } else {
        None
    }
}

//============ Tests ===========================================================
