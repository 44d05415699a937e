//! Common Utilities
//!
//! Provides slot timing helpers used across the scheduler stack

use std::time::Duration;

use crate::types::SubcarrierSpacing;

/// Time utilities for slot/frame calculations
pub mod time {
    use super::*;

    /// Slot duration as a `Duration`, exact for every numerology
    pub fn slot_duration(scs: SubcarrierSpacing) -> Duration {
        // 1 ms subframe split into 2^mu slots
        Duration::from_nanos(1_000_000 >> scs.numerology())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_duration() {
        assert_eq!(time::slot_duration(SubcarrierSpacing::Scs15), Duration::from_millis(1));
        assert_eq!(time::slot_duration(SubcarrierSpacing::Scs30), Duration::from_micros(500));
        assert_eq!(time::slot_duration(SubcarrierSpacing::Scs120), Duration::from_micros(125));
        assert_eq!(time::slot_duration(SubcarrierSpacing::Scs240), Duration::from_nanos(62_500));
    }
}
