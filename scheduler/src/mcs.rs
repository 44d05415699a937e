//! MCS and Transport Block Size
//!
//! Approximate TBS derivation from MCS, PRBs and symbols (TS 38.214 Section 5.1.3)

/// (modulation order, target code rate x 1024) per MCS index, TS 38.214 Table 5.1.3.1-1
const MCS_TABLE_QAM64: [(u32, u32); 29] = [
    (2, 120),
    (2, 157),
    (2, 193),
    (2, 251),
    (2, 308),
    (2, 379),
    (2, 449),
    (2, 526),
    (2, 602),
    (2, 679),
    (4, 340),
    (4, 378),
    (4, 434),
    (4, 490),
    (4, 553),
    (4, 616),
    (4, 658),
    (6, 438),
    (6, 466),
    (6, 517),
    (6, 567),
    (6, 616),
    (6, 666),
    (6, 719),
    (6, 772),
    (6, 822),
    (6, 873),
    (6, 910),
    (6, 948),
];

/// Highest MCS index of the 64QAM table
pub const MAX_MCS: u8 = 28;

/// REs per PRB per slot are capped at 156
const MAX_RE_PER_PRB: u32 = 156;

/// DMRS REs per PRB assuming one single-symbol DMRS, type 1
const DMRS_RE_PER_PRB: u32 = 12;

/// Transport block size in bytes, without the TBS quantization steps
pub fn tbs_bytes(mcs: u8, nof_prbs: u16, nof_symbols: u8) -> u32 {
    let (qm, rate_x1024) = MCS_TABLE_QAM64[mcs.min(MAX_MCS) as usize];
    let re_per_prb = (12 * nof_symbols as u32).saturating_sub(DMRS_RE_PER_PRB).min(MAX_RE_PER_PRB);
    let nof_re = re_per_prb * nof_prbs as u32;
    let info_bits = nof_re as u64 * qm as u64 * rate_x1024 as u64 / 1024;
    (info_bits / 8) as u32
}
