//! Difficulty adjustment.
//!
//! Each block rescales its predecessor's base target by the observed block
//! spacing relative to [`BLOCK_TIME`], bounded to a factor of two in either
//! direction and never below one.

use num_bigint::BigUint;

use crate::constants::{BLOCK_TIME, MAX_BASE_TARGET};

/// Base target of a block forged `elapsed` seconds after a block whose base target is `cur`.
pub fn next_base_target(cur: i64, elapsed: i64) -> i64 {
    // the narrowing cast keeps the low 64 bits of the quotient
    let mut new = (i128::from(cur) * i128::from(elapsed) / i128::from(BLOCK_TIME)) as i64;
    if new < 0 || new > MAX_BASE_TARGET {
        new = MAX_BASE_TARGET;
    }
    if new < cur / 2 {
        new = cur / 2;
    }
    if new == 0 {
        new = 1;
    }
    let mut twofold = cur.wrapping_mul(2);
    if twofold < 0 {
        twofold = MAX_BASE_TARGET;
    }
    if new > twofold {
        new = twofold;
    }
    new
}

/// Work contributed by a block with the given base target: `2^64 / base_target`.
pub fn block_difficulty(base_target: i64) -> BigUint {
    // base targets produced by `next_base_target` are always >= 1
    (BigUint::from(1u8) << 64u32) / BigUint::from(base_target.max(1) as u64)
}

pub fn next_cumulative_difficulty(previous: &BigUint, base_target: i64) -> BigUint {
    previous + block_difficulty(base_target)
}
