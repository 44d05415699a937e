//! Configuration File Structures
//!
//! YAML or TOML configuration of the scheduler simulation: cells, scheduler
//! expert parameters, simulated PHY behaviour and logging.

use std::path::Path;

use common::{Bandwidth, CellIndex, Pci, SubcarrierSpacing};
use interfaces::SchedCellConfigurationRequest;
use scheduler::SchedulerExpertConfig;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GnbConfig {
    /// Cells served, one worker each
    pub cells: Vec<CellConfig>,
    /// Scheduler expert parameters, shared by every cell
    #[serde(default)]
    pub scheduler: SchedulerExpertConfig,
    /// Simulated PHY
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
    /// Pace slots to the air interface slot duration
    #[serde(default)]
    pub realtime: bool,
    /// Number of slots to run, forever when absent
    #[serde(default)]
    pub nof_slots: Option<u64>,
}

/// Cell configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfig {
    /// Cell index within the DU
    pub cell_index: u8,
    /// Physical Cell ID
    pub pci: u16,
    /// Common subcarrier spacing in kHz
    #[serde(default = "default_scs_khz")]
    pub common_scs: u32,
    /// Channel bandwidth in MHz
    #[serde(rename = "channel_bandwidth_MHz", default = "default_bandwidth_mhz")]
    pub channel_bandwidth_mhz: u32,
    /// UEs attached at start-up
    #[serde(default = "default_nof_ues")]
    pub nof_ues: u16,
    /// DL HARQ processes per UE
    #[serde(default = "default_nof_harqs")]
    pub nof_dl_harqs: u8,
    /// UL HARQ processes per UE
    #[serde(default = "default_nof_harqs")]
    pub nof_ul_harqs: u8,
}

fn default_scs_khz() -> u32 {
    30
}

fn default_bandwidth_mhz() -> u32 {
    20
}

fn default_nof_ues() -> u16 {
    4
}

fn default_nof_harqs() -> u8 {
    8
}

impl CellConfig {
    pub fn scs(&self) -> anyhow::Result<SubcarrierSpacing> {
        SubcarrierSpacing::from_khz(self.common_scs)
            .ok_or_else(|| anyhow::anyhow!("Invalid subcarrier spacing: {} kHz", self.common_scs))
    }

    /// Scheduler view of the cell
    pub fn to_sched_request(&self) -> anyhow::Result<SchedCellConfigurationRequest> {
        let pci = Pci::new(self.pci).ok_or_else(|| anyhow::anyhow!("Invalid PCI: {}", self.pci))?;
        let scs = self.scs()?;
        let mhz = self.channel_bandwidth_mhz;
        let bandwidth = Bandwidth::from_mhz(mhz)
            .ok_or_else(|| anyhow::anyhow!("Invalid bandwidth: {} MHz", mhz))?;
        let nof_prbs = bandwidth.nof_prbs(scs).ok_or_else(|| {
            anyhow::anyhow!(
                "Bandwidth {} MHz not defined for {} kHz",
                self.channel_bandwidth_mhz,
                self.common_scs
            )
        })?;
        Ok(SchedCellConfigurationRequest::new(CellIndex(self.cell_index), pci, scs, nof_prbs))
    }
}

/// Simulated PHY configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed of the per-cell random generators
    pub seed: u64,
    /// Probability that a PDSCH is NACKed
    pub dl_bler: f64,
    /// Probability that a PUSCH CRC fails
    pub ul_bler: f64,
    /// Probability that an SR opportunity carries a positive SR
    pub sr_probability: f64,
    /// Probability of a DL data arrival per UE and slot
    pub dl_arrival_probability: f64,
    /// Size of a DL data arrival
    pub dl_arrival_bytes: u32,
    /// UL buffer reported along with each positive SR
    pub ul_bsr_bytes: u32,
    /// Probability that a HARQ-ACK report is lost
    pub uci_loss_probability: f64,
    /// Slots between UE reconfigurations, disabled when 0
    pub reconfig_period_slots: u32,
    /// Slots the UE takes to confirm a reconfiguration
    pub reconfig_confirm_delay_slots: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            dl_bler: 0.1,
            ul_bler: 0.1,
            sr_probability: 0.2,
            dl_arrival_probability: 0.3,
            dl_arrival_bytes: 1500,
            ul_bsr_bytes: 3000,
            uci_loss_probability: 0.0,
            reconfig_period_slots: 0,
            reconfig_confirm_delay_slots: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// All layers log level
    #[serde(default = "default_log_level")]
    pub all_level: String,
    /// Slots between aggregated metrics reports
    #[serde(default = "default_metrics_period")]
    pub metrics_period_slots: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            all_level: default_log_level(),
            metrics_period_slots: default_metrics_period(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_period() -> u32 {
    2000
}

impl GnbConfig {
    /// Load configuration from a YAML or TOML file, chosen by extension
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&contents)?,
            _ => Self::from_yaml_str(&contents)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cells.is_empty() {
            anyhow::bail!("No cell configured");
        }
        let scs = self.cells[0].scs()?;
        for cell in &self.cells {
            cell.to_sched_request()?;
            // Workers share one slot clock
            if cell.scs()? != scs {
                anyhow::bail!("Cell {} uses a different subcarrier spacing", cell.cell_index);
            }
        }
        let mut indexes: Vec<u8> = self.cells.iter().map(|c| c.cell_index).collect();
        indexes.sort_unstable();
        indexes.dedup();
        if indexes.len() != self.cells.len() {
            anyhow::bail!("Duplicate cell index");
        }
        let sim = &self.simulation;
        for (name, p) in [
            ("dl_bler", sim.dl_bler),
            ("ul_bler", sim.ul_bler),
            ("sr_probability", sim.sr_probability),
            ("dl_arrival_probability", sim.dl_arrival_probability),
            ("uci_loss_probability", sim.uci_loss_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                anyhow::bail!("{} must be a probability, got {}", name, p);
            }
        }
        self.scheduler
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid scheduler configuration: {}", e))?;
        Ok(())
    }
}
