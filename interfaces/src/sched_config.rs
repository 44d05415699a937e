//! Scheduler Configuration Messages
//!
//! Cell and UE configuration requests handed to the scheduler by the
//! configuration collaborators. Fragments of the serving cell configuration
//! are plain values so that the scheduler can intern and share them.

use common::types::{CellIndex, OfdmSymbolRange, Pci, PrbInterval, Rnti, SubcarrierSpacing, UeIndex};
use serde::{Deserialize, Serialize};

use crate::InterfaceError;

/// Maximum number of HARQ processes per direction (TS 38.331 nrofHARQ-ProcessesForPDSCH)
pub const MAX_NOF_HARQS: u8 = 16;

/// Maximum number of resources addressable by the 3-bit PUCCH resource indicator
pub const MAX_PUCCH_RES_PER_SET: usize = 8;

/// Bandwidth part configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BwpConfig {
    /// BWP identifier
    pub bwp_id: u8,
    /// Subcarrier spacing of the BWP
    pub scs: SubcarrierSpacing,
    /// Common resource blocks spanned by the BWP
    pub crbs: PrbInterval,
    /// Extended cyclic prefix
    #[serde(default)]
    pub extended_cp: bool,
}

/// Control resource set configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoresetConfig {
    /// CORESET identifier
    pub coreset_id: u8,
    /// Frequency resources
    pub prbs: PrbInterval,
    /// Duration in OFDM symbols (1-3)
    pub nof_symbols: u8,
    /// CCE-to-REG interleaved mapping
    #[serde(default)]
    pub interleaved: bool,
}

/// PUCCH format
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PucchFormat {
    Format0,
    Format1,
    Format2,
    Format3,
    Format4,
}

impl PucchFormat {
    /// Formats 0 and 1 carry at most 2 HARQ-ACK bits plus SR
    pub fn is_small_payload(&self) -> bool {
        matches!(self, PucchFormat::Format0 | PucchFormat::Format1)
    }
}

/// PUCCH maximum code rate (TS 38.331 PUCCH-MaxCodeRate)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaxCodeRate {
    Dot08,
    Dot15,
    Dot25,
    Dot35,
    Dot45,
    Dot60,
    Dot80,
}

impl MaxCodeRate {
    pub fn as_f32(&self) -> f32 {
        match self {
            MaxCodeRate::Dot08 => 0.08,
            MaxCodeRate::Dot15 => 0.15,
            MaxCodeRate::Dot25 => 0.25,
            MaxCodeRate::Dot35 => 0.35,
            MaxCodeRate::Dot45 => 0.45,
            MaxCodeRate::Dot60 => 0.60,
            MaxCodeRate::Dot80 => 0.80,
        }
    }
}

/// Format-specific PUCCH resource parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PucchFormatParams {
    Format0 {
        initial_cyclic_shift: u8,
    },
    Format1 {
        initial_cyclic_shift: u8,
        time_domain_occ: u8,
    },
    Format2 {
        max_code_rate: MaxCodeRate,
    },
    Format3 {
        max_code_rate: MaxCodeRate,
        #[serde(default)]
        additional_dmrs: bool,
    },
    Format4 {
        max_code_rate: MaxCodeRate,
        occ_length: u8,
        occ_index: u8,
    },
}

impl PucchFormatParams {
    pub fn format(&self) -> PucchFormat {
        match self {
            PucchFormatParams::Format0 { .. } => PucchFormat::Format0,
            PucchFormatParams::Format1 { .. } => PucchFormat::Format1,
            PucchFormatParams::Format2 { .. } => PucchFormat::Format2,
            PucchFormatParams::Format3 { .. } => PucchFormat::Format3,
            PucchFormatParams::Format4 { .. } => PucchFormat::Format4,
        }
    }
}

/// Dedicated PUCCH resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PucchResource {
    /// Cell-wide resource identity
    pub res_id: u16,
    /// PRBs of the first hop
    pub prbs: PrbInterval,
    /// Starting PRB of the second hop, if intra-slot frequency hopping is enabled
    #[serde(default)]
    pub second_hop_prb: Option<u16>,
    /// Symbols occupied in the slot
    pub symbols: OfdmSymbolRange,
    /// Format and its parameters
    pub params: PucchFormatParams,
}

impl PucchResource {
    pub fn format(&self) -> PucchFormat {
        self.params.format()
    }

    /// PRBs of the second hop, same width as the first hop
    pub fn second_hop_prbs(&self) -> Option<PrbInterval> {
        self.second_hop_prb
            .map(|start| PrbInterval::new(start, start + self.prbs.length()))
    }
}

/// Dedicated PUCCH configuration of a UE
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PucchConfig {
    /// Resources referenced by the sets, SR and CSI configurations
    pub resources: Vec<PucchResource>,
    /// Resource set 0, used for up to 2 UCI bits (Format 0/1), indexed by PRI
    pub resource_set_0: Vec<u16>,
    /// Resource set 1, used for more than 2 UCI bits (Format 2/3/4), indexed by PRI
    pub resource_set_1: Vec<u16>,
}

impl PucchConfig {
    /// Look up a resource by its id
    pub fn resource(&self, res_id: u16) -> Option<&PucchResource> {
        self.resources.iter().find(|res| res.res_id == res_id)
    }

    /// Number of usable PUCCH resource indicator values
    pub fn nof_pri(&self) -> usize {
        self.resource_set_0.len().min(MAX_PUCCH_RES_PER_SET)
    }

    pub fn validate(&self) -> Result<(), InterfaceError> {
        if self.resource_set_0.is_empty() {
            return Err(InterfaceError::InvalidConfig("PUCCH resource set 0 is empty".into()));
        }
        if self.resource_set_0.len() > MAX_PUCCH_RES_PER_SET
            || self.resource_set_1.len() > MAX_PUCCH_RES_PER_SET
        {
            return Err(InterfaceError::InvalidConfig(format!(
                "PUCCH resource sets are limited to {} resources",
                MAX_PUCCH_RES_PER_SET
            )));
        }
        for &res_id in &self.resource_set_0 {
            let res = self.resource(res_id).ok_or(InterfaceError::UnknownPucchResource(res_id))?;
            if !res.format().is_small_payload() {
                return Err(InterfaceError::InvalidConfig(format!(
                    "resource {} in set 0 has format {:?}",
                    res_id,
                    res.format()
                )));
            }
        }
        for &res_id in &self.resource_set_1 {
            let res = self.resource(res_id).ok_or(InterfaceError::UnknownPucchResource(res_id))?;
            if res.format().is_small_payload() {
                return Err(InterfaceError::InvalidConfig(format!(
                    "resource {} in set 1 has format {:?}",
                    res_id,
                    res.format()
                )));
            }
        }
        Ok(())
    }
}

/// Scheduling request configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrConfig {
    /// PUCCH resource (Format 0 or 1) used for SR
    pub pucch_res_id: u16,
    /// Periodicity in slots
    pub period_slots: u32,
    /// Offset in slots within the period
    pub offset_slots: u32,
}

/// Uplink configuration of a UE
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UplinkConfig {
    /// Dedicated PUCCH configuration
    pub pucch: PucchConfig,
    /// Scheduling request configuration
    #[serde(default)]
    pub sr: Option<SrConfig>,
}

/// Periodic CSI report configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsiMeasConfig {
    /// PUCCH resource (Format 2/3/4) used for the report
    pub pucch_res_id: u16,
    /// Periodicity in slots
    pub report_period_slots: u32,
    /// Offset in slots within the period
    pub offset_slots: u32,
    /// Size of CSI part 1 in bits
    pub csi_part1_bits: u16,
}

/// Serving cell configuration of a UE
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServingCellConfig {
    /// Cell this configuration applies to
    pub cell_index: CellIndex,
    /// Initial downlink BWP
    pub init_dl_bwp: BwpConfig,
    /// Initial uplink BWP
    pub init_ul_bwp: BwpConfig,
    /// UE-specific search space CORESET
    pub coreset: CoresetConfig,
    /// Uplink configuration
    pub ul_config: UplinkConfig,
    /// Periodic CSI reporting
    #[serde(default)]
    pub csi_meas: Option<CsiMeasConfig>,
    /// Number of downlink HARQ processes
    pub nof_dl_harq_procs: u8,
    /// Number of uplink HARQ processes
    pub nof_ul_harq_procs: u8,
}

impl ServingCellConfig {
    pub fn validate(&self) -> Result<(), InterfaceError> {
        for (dir, nof) in [("DL", self.nof_dl_harq_procs), ("UL", self.nof_ul_harq_procs)] {
            if nof == 0 || nof > MAX_NOF_HARQS {
                return Err(InterfaceError::InvalidConfig(format!(
                    "invalid number of {} HARQ processes: {}",
                    dir, nof
                )));
            }
        }
        self.ul_config.pucch.validate()?;
        if let Some(sr) = &self.ul_config.sr {
            let res = self
                .ul_config
                .pucch
                .resource(sr.pucch_res_id)
                .ok_or(InterfaceError::UnknownPucchResource(sr.pucch_res_id))?;
            if !res.format().is_small_payload() || sr.period_slots == 0 {
                return Err(InterfaceError::InvalidConfig(format!(
                    "invalid SR configuration on resource {}",
                    sr.pucch_res_id
                )));
            }
        }
        if let Some(csi) = &self.csi_meas {
            let res = self
                .ul_config
                .pucch
                .resource(csi.pucch_res_id)
                .ok_or(InterfaceError::UnknownPucchResource(csi.pucch_res_id))?;
            if res.format().is_small_payload() || csi.report_period_slots == 0 {
                return Err(InterfaceError::InvalidConfig(format!(
                    "invalid CSI report configuration on resource {}",
                    csi.pucch_res_id
                )));
            }
        }
        Ok(())
    }

    /// Default dedicated configuration for the `position`-th UE of a cell.
    ///
    /// HARQ-ACK resource sets are shared by all UEs of the cell; the SR and CSI
    /// resources are UE-specific and placed from the upper band edge downwards.
    /// SR and CSI of one UE share a PRB in disjoint symbols.
    pub fn default_for_ue(cell: &SchedCellConfigurationRequest, position: u16) -> Self {
        let nof_ul_prbs = cell.ul_bwp.crbs.length();
        let mut resources = Vec::new();

        // Set 0: Format 1 over the whole slot, one PRB each
        for i in 0..MAX_PUCCH_RES_PER_SET as u16 {
            resources.push(PucchResource {
                res_id: i,
                prbs: PrbInterval::new(i / 2, i / 2 + 1),
                second_hop_prb: None,
                symbols: OfdmSymbolRange::full_slot(),
                params: PucchFormatParams::Format1 {
                    initial_cyclic_shift: (i % 2) as u8 * 6,
                    time_domain_occ: 0,
                },
            });
        }
        // Set 1: Format 3 over 4 symbols, one PRB each
        for i in 0..MAX_PUCCH_RES_PER_SET as u16 {
            let prb = 4 + i;
            resources.push(PucchResource {
                res_id: 8 + i,
                prbs: PrbInterval::new(prb, prb + 1),
                second_hop_prb: None,
                symbols: OfdmSymbolRange::new(0, 4),
                params: PucchFormatParams::Format3 {
                    max_code_rate: MaxCodeRate::Dot25,
                    additional_dmrs: false,
                },
            });
        }

        let sr_res_id = 16 + 2 * position;
        let csi_res_id = sr_res_id + 1;
        let top_prb = nof_ul_prbs.saturating_sub(1 + position);
        resources.push(PucchResource {
            res_id: sr_res_id,
            prbs: PrbInterval::new(top_prb, top_prb + 1),
            second_hop_prb: None,
            symbols: OfdmSymbolRange::new(4, 14),
            params: PucchFormatParams::Format1 {
                initial_cyclic_shift: 0,
                time_domain_occ: 0,
            },
        });
        resources.push(PucchResource {
            res_id: csi_res_id,
            prbs: PrbInterval::new(top_prb, top_prb + 1),
            second_hop_prb: None,
            symbols: OfdmSymbolRange::new(0, 4),
            params: PucchFormatParams::Format3 {
                max_code_rate: MaxCodeRate::Dot25,
                additional_dmrs: false,
            },
        });

        Self {
            cell_index: cell.cell_index,
            init_dl_bwp: cell.dl_bwp.clone(),
            init_ul_bwp: cell.ul_bwp.clone(),
            coreset: cell.coreset0.clone(),
            ul_config: UplinkConfig {
                pucch: PucchConfig {
                    resources,
                    resource_set_0: (0..8).collect(),
                    resource_set_1: (8..16).collect(),
                },
                sr: Some(SrConfig {
                    pucch_res_id: sr_res_id,
                    period_slots: 20,
                    offset_slots: position as u32 % 20,
                }),
            },
            csi_meas: Some(CsiMeasConfig {
                pucch_res_id: csi_res_id,
                report_period_slots: 40,
                offset_slots: (2 * position as u32 + 1) % 40,
                csi_part1_bits: 4,
            }),
            nof_dl_harq_procs: 8,
            nof_ul_harq_procs: 8,
        }
    }
}

/// Cell configuration request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedCellConfigurationRequest {
    /// Cell index within the DU
    pub cell_index: CellIndex,
    /// Physical cell identity
    pub pci: Pci,
    /// Common subcarrier spacing
    pub scs: SubcarrierSpacing,
    /// Initial downlink BWP
    pub dl_bwp: BwpConfig,
    /// Initial uplink BWP
    pub ul_bwp: BwpConfig,
    /// CORESET#0
    pub coreset0: CoresetConfig,
}

impl SchedCellConfigurationRequest {
    /// Cell spanning `nof_prbs` in both directions with a 2-symbol CORESET#0 of 24 PRBs
    pub fn new(cell_index: CellIndex, pci: Pci, scs: SubcarrierSpacing, nof_prbs: u16) -> Self {
        let bwp = BwpConfig {
            bwp_id: 0,
            scs,
            crbs: PrbInterval::new(0, nof_prbs),
            extended_cp: false,
        };
        Self {
            cell_index,
            pci,
            scs,
            dl_bwp: bwp.clone(),
            ul_bwp: bwp,
            coreset0: CoresetConfig {
                coreset_id: 0,
                prbs: PrbInterval::new(0, nof_prbs.min(24)),
                nof_symbols: 2,
                interleaved: true,
            },
        }
    }
}

/// UE creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedUeCreationRequest {
    pub ue_index: UeIndex,
    pub crnti: Rnti,
    pub serving_cell: ServingCellConfig,
}

/// UE reconfiguration request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedUeReconfigurationRequest {
    pub ue_index: UeIndex,
    pub crnti: Rnti,
    pub serving_cell: ServingCellConfig,
    /// Slots to wait before the new configuration takes effect
    #[serde(default)]
    pub apply_delay_slots: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cell() -> SchedCellConfigurationRequest {
        SchedCellConfigurationRequest::new(CellIndex(0), Pci(1), SubcarrierSpacing::Scs30, 51)
    }

    #[test]
    fn test_default_ue_config_is_valid() {
        let cell = test_cell();
        for pos in 0..4 {
            let cfg = ServingCellConfig::default_for_ue(&cell, pos);
            assert!(cfg.validate().is_ok());
        }
    }

    #[test]
    fn test_default_ue_configs_use_distinct_sr_resources() {
        let cell = test_cell();
        let a = ServingCellConfig::default_for_ue(&cell, 0);
        let b = ServingCellConfig::default_for_ue(&cell, 1);
        assert_ne!(
            a.ul_config.sr.as_ref().unwrap().pucch_res_id,
            b.ul_config.sr.as_ref().unwrap().pucch_res_id
        );
        assert_eq!(a.ul_config.pucch.resource_set_0, b.ul_config.pucch.resource_set_0);
    }

    #[test]
    fn test_default_sr_and_csi_resources_never_collide() {
        let cell = test_cell();
        let mut dedicated = Vec::new();
        for pos in 0..8 {
            let cfg = ServingCellConfig::default_for_ue(&cell, pos);
            let pucch = &cfg.ul_config.pucch;
            let sr = pucch.resource(cfg.ul_config.sr.as_ref().unwrap().pucch_res_id).unwrap();
            let csi = pucch.resource(cfg.csi_meas.as_ref().unwrap().pucch_res_id).unwrap();
            dedicated.push(sr.clone());
            dedicated.push(csi.clone());
        }
        for (i, a) in dedicated.iter().enumerate() {
            for b in &dedicated[i + 1..] {
                assert!(
                    !(a.prbs.overlaps(&b.prbs) && a.symbols.overlaps(&b.symbols)),
                    "resources {} and {} collide",
                    a.res_id,
                    b.res_id
                );
            }
        }
    }

    #[test]
    fn test_invalid_harq_count_rejected() {
        let mut cfg = ServingCellConfig::default_for_ue(&test_cell(), 0);
        cfg.nof_dl_harq_procs = 17;
        assert!(cfg.validate().is_err());
        cfg.nof_dl_harq_procs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_set_format_mismatch_rejected() {
        let mut cfg = ServingCellConfig::default_for_ue(&test_cell(), 0);
        cfg.ul_config.pucch.resource_set_0[0] = 8;
        assert!(matches!(cfg.validate(), Err(InterfaceError::InvalidConfig(_))));
        cfg.ul_config.pucch.resource_set_0[0] = 999;
        assert!(matches!(cfg.validate(), Err(InterfaceError::UnknownPucchResource(999))));
    }

    #[test]
    fn test_second_hop() {
        let res = PucchResource {
            res_id: 0,
            prbs: PrbInterval::new(2, 4),
            second_hop_prb: Some(40),
            symbols: OfdmSymbolRange::full_slot(),
            params: PucchFormatParams::Format2 { max_code_rate: MaxCodeRate::Dot35 },
        };
        assert_eq!(res.second_hop_prbs(), Some(PrbInterval::new(40, 42)));
    }

    #[test]
    fn test_yaml_roundtrip_of_uplink_config() {
        let cfg = ServingCellConfig::default_for_ue(&test_cell(), 2);
        let yaml = serde_yaml::to_string(&cfg.ul_config).unwrap();
        let back: UplinkConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, cfg.ul_config);
    }
}
