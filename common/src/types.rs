//! Common Types for the 5G Scheduler
//!
//! Defines fundamental types used throughout the scheduler stack

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use std::fmt;

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// Lowest C-RNTI value (TS 38.321 Table 7.1-1)
    pub const MIN_CRNTI: Rnti = Rnti(0x0001);
    /// Highest C-RNTI value (TS 38.321 Table 7.1-1)
    pub const MAX_CRNTI: Rnti = Rnti(0xFFEF);

    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Whether the value lies in the C-RNTI range
    pub fn is_crnti(&self) -> bool {
        (Self::MIN_CRNTI.0..=Self::MAX_CRNTI.0).contains(&self.0)
    }
}

impl fmt::Display for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Index of a cell within the DU cell group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellIndex(pub u8);

impl fmt::Display for CellIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a UE within the DU
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UeIndex(pub u16);

/// Physical Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value (0-1007)
    pub const MAX: u16 = 1007;

    /// Create a new PCI with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }
}

/// Subcarrier spacing values in kHz
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize,
)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Parse from a value in kHz
    pub fn from_khz(khz: u32) -> Option<Self> {
        Self::from_u32(khz)
    }

    /// Numerology (mu) of this spacing
    pub fn numerology(&self) -> u8 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
            SubcarrierSpacing::Scs240 => 4,
        }
    }

    /// Spacing for a given numerology
    pub fn from_numerology(numerology: u8) -> Option<Self> {
        match numerology {
            0 => Some(SubcarrierSpacing::Scs15),
            1 => Some(SubcarrierSpacing::Scs30),
            2 => Some(SubcarrierSpacing::Scs60),
            3 => Some(SubcarrierSpacing::Scs120),
            4 => Some(SubcarrierSpacing::Scs240),
            _ => None,
        }
    }
}

/// Bandwidth values in MHz
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bandwidth {
    /// 5 MHz
    Bw5,
    /// 10 MHz
    Bw10,
    /// 15 MHz
    Bw15,
    /// 20 MHz
    Bw20,
    /// 25 MHz
    Bw25,
    /// 30 MHz
    Bw30,
    /// 40 MHz
    Bw40,
    /// 50 MHz
    Bw50,
    /// 60 MHz
    Bw60,
    /// 80 MHz
    Bw80,
    /// 100 MHz
    Bw100,
}

impl Bandwidth {
    /// Parse from a value in MHz
    pub fn from_mhz(mhz: u32) -> Option<Self> {
        let bw = match mhz {
            5 => Bandwidth::Bw5,
            10 => Bandwidth::Bw10,
            15 => Bandwidth::Bw15,
            20 => Bandwidth::Bw20,
            25 => Bandwidth::Bw25,
            30 => Bandwidth::Bw30,
            40 => Bandwidth::Bw40,
            50 => Bandwidth::Bw50,
            60 => Bandwidth::Bw60,
            80 => Bandwidth::Bw80,
            100 => Bandwidth::Bw100,
            _ => return None,
        };
        Some(bw)
    }

    /// Transmission bandwidth in PRBs, TS 38.104 Table 5.3.2-1 (FR1)
    pub fn nof_prbs(&self, scs: SubcarrierSpacing) -> Option<u16> {
        let nof_prbs = match (self, scs) {
            (Bandwidth::Bw5, SubcarrierSpacing::Scs15) => 25,
            (Bandwidth::Bw5, SubcarrierSpacing::Scs30) => 11,
            (Bandwidth::Bw10, SubcarrierSpacing::Scs15) => 52,
            (Bandwidth::Bw10, SubcarrierSpacing::Scs30) => 24,
            (Bandwidth::Bw10, SubcarrierSpacing::Scs60) => 11,
            (Bandwidth::Bw15, SubcarrierSpacing::Scs15) => 79,
            (Bandwidth::Bw15, SubcarrierSpacing::Scs30) => 38,
            (Bandwidth::Bw15, SubcarrierSpacing::Scs60) => 18,
            (Bandwidth::Bw20, SubcarrierSpacing::Scs15) => 106,
            (Bandwidth::Bw20, SubcarrierSpacing::Scs30) => 51,
            (Bandwidth::Bw20, SubcarrierSpacing::Scs60) => 24,
            (Bandwidth::Bw25, SubcarrierSpacing::Scs15) => 133,
            (Bandwidth::Bw25, SubcarrierSpacing::Scs30) => 65,
            (Bandwidth::Bw25, SubcarrierSpacing::Scs60) => 31,
            (Bandwidth::Bw30, SubcarrierSpacing::Scs15) => 160,
            (Bandwidth::Bw30, SubcarrierSpacing::Scs30) => 78,
            (Bandwidth::Bw30, SubcarrierSpacing::Scs60) => 38,
            (Bandwidth::Bw40, SubcarrierSpacing::Scs15) => 216,
            (Bandwidth::Bw40, SubcarrierSpacing::Scs30) => 106,
            (Bandwidth::Bw40, SubcarrierSpacing::Scs60) => 51,
            (Bandwidth::Bw50, SubcarrierSpacing::Scs15) => 270,
            (Bandwidth::Bw50, SubcarrierSpacing::Scs30) => 133,
            (Bandwidth::Bw50, SubcarrierSpacing::Scs60) => 65,
            (Bandwidth::Bw60, SubcarrierSpacing::Scs30) => 162,
            (Bandwidth::Bw60, SubcarrierSpacing::Scs60) => 79,
            (Bandwidth::Bw80, SubcarrierSpacing::Scs30) => 217,
            (Bandwidth::Bw80, SubcarrierSpacing::Scs60) => 107,
            (Bandwidth::Bw100, SubcarrierSpacing::Scs30) => 273,
            (Bandwidth::Bw100, SubcarrierSpacing::Scs60) => 135,
            _ => return None,
        };
        Some(nof_prbs)
    }
}

/// Contiguous interval of PRBs `[start, stop)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PrbInterval {
    /// First PRB
    pub start: u16,
    /// One past the last PRB
    pub stop: u16,
}

impl PrbInterval {
    pub fn new(start: u16, stop: u16) -> Self {
        debug_assert!(start <= stop, "invalid PRB interval [{}, {})", start, stop);
        Self { start, stop }
    }

    /// Number of PRBs in the interval
    pub fn length(&self) -> u16 {
        self.stop.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    pub fn overlaps(&self, other: &PrbInterval) -> bool {
        self.start < other.stop && other.start < self.stop
    }
}

impl fmt::Display for PrbInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

/// Range of OFDM symbols within a slot `[start, stop)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfdmSymbolRange {
    /// First symbol
    pub start: u8,
    /// One past the last symbol
    pub stop: u8,
}

impl OfdmSymbolRange {
    /// Number of symbols in a slot with normal cyclic prefix
    pub const NOF_SYMBOLS_PER_SLOT: u8 = 14;

    pub fn new(start: u8, stop: u8) -> Self {
        debug_assert!(start <= stop && stop <= Self::NOF_SYMBOLS_PER_SLOT);
        Self { start, stop }
    }

    /// Whole slot
    pub fn full_slot() -> Self {
        Self { start: 0, stop: Self::NOF_SYMBOLS_PER_SLOT }
    }

    /// Number of symbols in the range
    pub fn length(&self) -> u8 {
        self.stop.saturating_sub(self.start)
    }

    pub fn overlaps(&self, other: &OfdmSymbolRange) -> bool {
        self.start < other.stop && other.start < self.stop
    }
}

impl Default for OfdmSymbolRange {
    fn default() -> Self {
        Self::full_slot()
    }
}
