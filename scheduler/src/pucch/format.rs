//! PUCCH Format Capacity
//!
//! UCI payload limits of the PUCCH formats (TS 38.212 Section 6.3.1, TS 38.213 Section 9.2.5)

use interfaces::{PucchFormatParams, PucchResource, UciBits};

/// Maximum HARQ-ACK bits carried by Format 0 and Format 1
pub const MAX_HARQ_BITS_FORMAT_0_1: u16 = 2;

/// Data subcarriers per PRB for Format 2 (4 of 12 subcarriers carry DMRS)
const FORMAT2_DATA_SC_PER_PRB: u32 = 8;

const NOF_SUBCARRIERS_PER_PRB: u32 = 12;

/// QPSK
const BITS_PER_SYMBOL: u32 = 2;

/// CRC attached to a UCI payload of `payload_bits` (TS 38.212 Section 6.3.1.2.1)
pub fn uci_crc_bits(payload_bits: u16) -> u16 {
    match payload_bits {
        0..=11 => 0,
        12..=19 => 6,
        _ => 11,
    }
}

/// DMRS symbols of a Format 3/4 resource (TS 38.211 Table 6.4.1.3.3.2-1, no hopping)
fn format_3_4_dmrs_symbols(nof_symbols: u32, additional_dmrs: bool) -> u32 {
    match nof_symbols {
        0..=4 => 1,
        5..=9 => 2,
        _ if additional_dmrs => 4,
        _ => 2,
    }
}

/// Number of coded bits available for UCI on a Format 2/3/4 resource
pub fn coded_bits(res: &PucchResource) -> u32 {
    let nof_prbs = res.prbs.length() as u32;
    let nof_symbols = res.symbols.length() as u32;
    match res.params {
        PucchFormatParams::Format0 { .. } | PucchFormatParams::Format1 { .. } => 0,
        PucchFormatParams::Format2 { .. } => {
            nof_prbs * FORMAT2_DATA_SC_PER_PRB * nof_symbols * BITS_PER_SYMBOL
        }
        PucchFormatParams::Format3 { additional_dmrs, .. } => {
            let dmrs = format_3_4_dmrs_symbols(nof_symbols, additional_dmrs);
            let data_symbols = nof_symbols.saturating_sub(dmrs);
            nof_prbs * NOF_SUBCARRIERS_PER_PRB * data_symbols * BITS_PER_SYMBOL
        }
        PucchFormatParams::Format4 { occ_length, .. } => {
            let dmrs = format_3_4_dmrs_symbols(nof_symbols, false);
            let data_symbols = nof_symbols.saturating_sub(dmrs);
            NOF_SUBCARRIERS_PER_PRB * data_symbols * BITS_PER_SYMBOL / (occ_length.max(1) as u32)
        }
    }
}

/// Payload plus CRC bits that fit within the resource's maximum code rate
fn max_coded_payload(res: &PucchResource) -> u32 {
    let rate = match res.params {
        PucchFormatParams::Format2 { max_code_rate }
        | PucchFormatParams::Format3 { max_code_rate, .. }
        | PucchFormatParams::Format4 { max_code_rate, .. } => max_code_rate.as_f32(),
        _ => return 0,
    };
    (coded_bits(res) as f32 * rate + 1e-3).floor() as u32
}

/// Largest UCI payload the resource can carry
pub fn max_payload_bits(res: &PucchResource) -> u16 {
    if res.format().is_small_payload() {
        return MAX_HARQ_BITS_FORMAT_0_1;
    }
    let limit = max_coded_payload(res);
    let mut bits: u16 = 0;
    while ((bits + 1) as u32 + uci_crc_bits(bits + 1) as u32) <= limit {
        bits += 1;
    }
    bits
}

/// Whether the resource can carry `uci`
pub fn fits(res: &PucchResource, uci: &UciBits) -> bool {
    if res.format().is_small_payload() {
        return uci.csi_part1 == 0 && uci.harq_ack <= MAX_HARQ_BITS_FORMAT_0_1;
    }
    let total = uci.total();
    (total as u32 + uci_crc_bits(total) as u32) <= max_coded_payload(res)
}
