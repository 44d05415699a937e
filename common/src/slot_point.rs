//! Slot Clock
//!
//! A wrapping slot counter over the 1024-frame SFN cycle, parameterized by numerology

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use crate::types::SubcarrierSpacing;

/// Identifies a transmission slot as `(numerology, count)` where `count` runs over
/// `[0, 1024 * 10 * 2^mu)` and wraps.
///
/// Ordering is defined by the signed shortest distance on the wrap circle, so it is
/// only meaningful for slots less than half a cycle apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotPoint {
    numerology: u8,
    count: u32,
}

impl SlotPoint {
    /// Number of system frames before the SFN wraps
    pub const NOF_SFNS: u32 = 1024;
    /// Subframes (1 ms) per frame
    pub const NOF_SUBFRAMES_PER_FRAME: u32 = 10;
    /// Largest supported numerology
    pub const MAX_NUMEROLOGY: u8 = 4;

    /// Create a slot point from a numerology and an absolute slot count
    pub fn new(numerology: u8, count: u32) -> Self {
        debug_assert!(numerology <= Self::MAX_NUMEROLOGY, "invalid numerology {}", numerology);
        let numerology = numerology.min(Self::MAX_NUMEROLOGY);
        Self {
            numerology,
            count: count % Self::modulus(numerology),
        }
    }

    fn slots_per_frame(numerology: u8) -> u32 {
        Self::NOF_SUBFRAMES_PER_FRAME << numerology
    }

    fn modulus(numerology: u8) -> u32 {
        Self::NOF_SFNS * Self::slots_per_frame(numerology)
    }

    pub fn numerology(&self) -> u8 {
        self.numerology
    }

    /// Subcarrier spacing matching the numerology
    pub fn scs(&self) -> SubcarrierSpacing {
        SubcarrierSpacing::from_numerology(self.numerology).unwrap_or(SubcarrierSpacing::Scs15)
    }

    /// Absolute slot count within the SFN cycle
    pub fn to_uint(&self) -> u32 {
        self.count
    }

    pub fn nof_slots_per_frame(&self) -> u32 {
        Self::slots_per_frame(self.numerology)
    }

    /// System frame number
    pub fn sfn(&self) -> u32 {
        self.count / self.nof_slots_per_frame()
    }

    /// Slot index within the frame
    pub fn slot_index(&self) -> u32 {
        self.count % self.nof_slots_per_frame()
    }
}

impl Add<u32> for SlotPoint {
    type Output = SlotPoint;

    fn add(self, rhs: u32) -> SlotPoint {
        let modulus = Self::modulus(self.numerology);
        let count = (self.count as u64 + rhs as u64) % modulus as u64;
        SlotPoint { numerology: self.numerology, count: count as u32 }
    }
}

impl AddAssign<u32> for SlotPoint {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl Sub<u32> for SlotPoint {
    type Output = SlotPoint;

    fn sub(self, rhs: u32) -> SlotPoint {
        let modulus = Self::modulus(self.numerology);
        let rhs = rhs % modulus;
        SlotPoint {
            numerology: self.numerology,
            count: (self.count + modulus - rhs) % modulus,
        }
    }
}

impl Sub<SlotPoint> for SlotPoint {
    type Output = i32;

    /// Signed shortest distance from `rhs` to `self`
    fn sub(self, rhs: SlotPoint) -> i32 {
        debug_assert_eq!(
            self.numerology, rhs.numerology,
            "comparing slots of different numerologies"
        );
        let modulus = Self::modulus(self.numerology) as i64;
        let mut diff = (self.count as i64 - rhs.count as i64).rem_euclid(modulus);
        if diff >= modulus / 2 {
            diff -= modulus;
        }
        diff as i32
    }
}

impl PartialOrd for SlotPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SlotPoint {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.numerology != other.numerology {
            return self.numerology.cmp(&other.numerology);
        }
        (*self - *other).cmp(&0)
    }
}

impl fmt::Display for SlotPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sfn(), self.slot_index())
    }
}
