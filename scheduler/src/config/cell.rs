//! DU Cell Configuration Pool
//!
//! Per-cell pools for the serving cell fragments of the UEs of that cell.

use common::CellIndex;
use interfaces::{
    BwpConfig, CoresetConfig, CsiMeasConfig, SchedCellConfigurationRequest, ServingCellConfig,
    UplinkConfig,
};
use tracing::debug;

use super::pool::{ConfigHandle, ConfigObjectPool};
use super::ConfigPoolError;
use crate::pucch::PucchUeConfig;

/// Handles to the pooled fragments of one UE
#[derive(Debug)]
pub struct UeConfigHandles {
    cell_index: CellIndex,
    dl_bwp: ConfigHandle<BwpConfig>,
    ul_bwp: ConfigHandle<BwpConfig>,
    coreset: ConfigHandle<CoresetConfig>,
    uplink: ConfigHandle<UplinkConfig>,
    csi_meas: Option<ConfigHandle<CsiMeasConfig>>,
    nof_dl_harq_procs: u8,
    nof_ul_harq_procs: u8,
}

impl UeConfigHandles {
    pub fn cell_index(&self) -> CellIndex {
        self.cell_index
    }
}

/// Borrowed view of a UE's resolved configuration
#[derive(Debug, Clone, Copy)]
pub struct UeConfigView<'a> {
    pub cell_index: CellIndex,
    pub dl_bwp: &'a BwpConfig,
    pub ul_bwp: &'a BwpConfig,
    pub coreset: &'a CoresetConfig,
    pub uplink: &'a UplinkConfig,
    pub csi_meas: Option<&'a CsiMeasConfig>,
    pub nof_dl_harq_procs: u8,
    pub nof_ul_harq_procs: u8,
}

impl<'a> UeConfigView<'a> {
    /// Fragments read by the PUCCH allocator
    pub fn pucch(&self) -> PucchUeConfig<'a> {
        PucchUeConfig {
            uplink: self.uplink,
            csi: self.csi_meas,
        }
    }
}

/// Configuration pools of one cell
#[derive(Debug)]
pub struct DuCellConfigPool {
    cell_cfg: SchedCellConfigurationRequest,
    bwps: ConfigObjectPool<BwpConfig>,
    coresets: ConfigObjectPool<CoresetConfig>,
    uplinks: ConfigObjectPool<UplinkConfig>,
    csi_meas: ConfigObjectPool<CsiMeasConfig>,
}

impl DuCellConfigPool {
    pub fn new(cell_cfg: SchedCellConfigurationRequest) -> Self {
        Self {
            cell_cfg,
            bwps: ConfigObjectPool::new(),
            coresets: ConfigObjectPool::new(),
            uplinks: ConfigObjectPool::new(),
            csi_meas: ConfigObjectPool::new(),
        }
    }

    pub fn cell_cfg(&self) -> &SchedCellConfigurationRequest {
        &self.cell_cfg
    }

    /// Intern the fragments of a new UE
    pub fn create_ue(
        &mut self,
        cfg: &ServingCellConfig,
    ) -> Result<UeConfigHandles, ConfigPoolError> {
        if cfg.cell_index != self.cell_cfg.cell_index {
            return Err(ConfigPoolError::WrongCell {
                expected: self.cell_cfg.cell_index,
                actual: cfg.cell_index,
            });
        }
        cfg.validate()?;

        let handles = UeConfigHandles {
            cell_index: cfg.cell_index,
            dl_bwp: self.bwps.intern(cfg.init_dl_bwp.clone()),
            ul_bwp: self.bwps.intern(cfg.init_ul_bwp.clone()),
            coreset: self.coresets.intern(cfg.coreset.clone()),
            uplink: self.uplinks.intern(cfg.ul_config.clone()),
            csi_meas: cfg.csi_meas.clone().map(|c| self.csi_meas.intern(c)),
            nof_dl_harq_procs: cfg.nof_dl_harq_procs,
            nof_ul_harq_procs: cfg.nof_ul_harq_procs,
        };
        debug!(
            "cell={} UE config pooled: {} BWPs, {} uplink configs, {} CSI configs",
            self.cell_cfg.cell_index,
            self.bwps.len(),
            self.uplinks.len(),
            self.csi_meas.len()
        );
        Ok(handles)
    }

    /// Replace the fragments behind `previous` with those of `cfg`.
    ///
    /// The new fragments are interned before the previous ones are released, so
    /// unchanged fragments keep their entries and other UEs sharing the previous
    /// fragments are not affected. On error `previous` is left untouched.
    pub fn update_ue(
        &mut self,
        previous: &mut UeConfigHandles,
        cfg: &ServingCellConfig,
    ) -> Result<(), ConfigPoolError> {
        let handles = self.create_ue(cfg)?;
        let old = std::mem::replace(previous, handles);
        self.release_ue(old)
    }

    /// Return every fragment reference of a UE.
    ///
    /// All handles are released even when one of them is rejected; the first
    /// error is reported once the others are back in their pools.
    pub fn release_ue(&mut self, handles: UeConfigHandles) -> Result<(), ConfigPoolError> {
        let results = [
            self.bwps.release(handles.dl_bwp),
            self.bwps.release(handles.ul_bwp),
            self.coresets.release(handles.coreset),
            self.uplinks.release(handles.uplink),
            handles.csi_meas.map_or(Ok(()), |csi| self.csi_meas.release(csi)),
        ];
        results.into_iter().collect()
    }

    /// Resolve a UE's handles into borrowed fragments
    pub fn resolve(&self, handles: &UeConfigHandles) -> Result<UeConfigView<'_>, ConfigPoolError> {
        Ok(UeConfigView {
            cell_index: handles.cell_index,
            dl_bwp: self.bwps.get(&handles.dl_bwp)?,
            ul_bwp: self.bwps.get(&handles.ul_bwp)?,
            coreset: self.coresets.get(&handles.coreset)?,
            uplink: self.uplinks.get(&handles.uplink)?,
            csi_meas: handles.csi_meas.as_ref().map(|h| self.csi_meas.get(h)).transpose()?,
            nof_dl_harq_procs: handles.nof_dl_harq_procs,
            nof_ul_harq_procs: handles.nof_ul_harq_procs,
        })
    }

    pub fn nof_bwps(&self) -> usize {
        self.bwps.len()
    }

    pub fn nof_coresets(&self) -> usize {
        self.coresets.len()
    }

    pub fn nof_uplink_configs(&self) -> usize {
        self.uplinks.len()
    }

    pub fn nof_csi_configs(&self) -> usize {
        self.csi_meas.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Pci, SubcarrierSpacing};

    fn cell() -> SchedCellConfigurationRequest {
        SchedCellConfigurationRequest::new(CellIndex(0), Pci(1), SubcarrierSpacing::Scs30, 51)
    }

    #[test]
    fn test_ues_share_common_fragments() {
        let cell = cell();
        let mut pool = DuCellConfigPool::new(cell.clone());
        let a = pool.create_ue(&ServingCellConfig::default_for_ue(&cell, 0)).unwrap();
        let b = pool.create_ue(&ServingCellConfig::default_for_ue(&cell, 1)).unwrap();

        // DL and UL BWP are equal in this cell
        assert_eq!(pool.nof_bwps(), 1);
        assert_eq!(pool.nof_coresets(), 1);
        // SR and CSI resources differ per UE
        assert_eq!(pool.nof_uplink_configs(), 2);

        let va = pool.resolve(&a).unwrap();
        let vb = pool.resolve(&b).unwrap();
        assert!(std::ptr::eq(va.dl_bwp, vb.dl_bwp));
        assert!(!std::ptr::eq(va.uplink, vb.uplink));
    }

    #[test]
    fn test_reconfiguration_preserves_other_ues() {
        let cell = cell();
        let mut pool = DuCellConfigPool::new(cell.clone());
        let base = ServingCellConfig::default_for_ue(&cell, 0);
        let mut a = pool.create_ue(&base).unwrap();
        let b = pool.create_ue(&base).unwrap();
        assert_eq!(pool.nof_uplink_configs(), 1);

        let mut changed = base.clone();
        changed.ul_config.sr.as_mut().unwrap().period_slots = 40;
        pool.update_ue(&mut a, &changed).unwrap();
        assert_eq!(pool.nof_uplink_configs(), 2);
        assert_eq!(pool.resolve(&b).unwrap().uplink, &base.ul_config);
        assert_eq!(pool.resolve(&a).unwrap().uplink, &changed.ul_config);

        pool.release_ue(b).unwrap();
        assert_eq!(pool.nof_uplink_configs(), 1);
        pool.release_ue(a).unwrap();
        assert_eq!(pool.nof_uplink_configs(), 0);
        assert_eq!(pool.nof_bwps(), 0);
    }

    #[test]
    fn test_update_with_same_config_keeps_entries() {
        let cell = cell();
        let mut pool = DuCellConfigPool::new(cell.clone());
        let cfg = ServingCellConfig::default_for_ue(&cell, 0);
        let mut a = pool.create_ue(&cfg).unwrap();
        pool.update_ue(&mut a, &cfg).unwrap();
        assert_eq!(pool.nof_uplink_configs(), 1);
        assert!(pool.resolve(&a).is_ok());
    }

    #[test]
    fn test_release_continues_past_rejected_handle() {
        let cell = cell();
        let mut pool = DuCellConfigPool::new(cell.clone());
        let cfg = ServingCellConfig::default_for_ue(&cell, 0);
        let mut handles = pool.create_ue(&cfg).unwrap();

        // Swap in a handle this pool never issued
        let mut other: ConfigObjectPool<BwpConfig> = ConfigObjectPool::new();
        let foreign = (0..3)
            .map(|bwp_id| other.intern(BwpConfig { bwp_id, ..cfg.init_dl_bwp.clone() }))
            .last()
            .unwrap();
        let own = std::mem::replace(&mut handles.dl_bwp, foreign);
        pool.bwps.release(own).unwrap();
        let uplink_index = handles.uplink.index();

        assert!(matches!(pool.release_ue(handles), Err(ConfigPoolError::StaleHandle(2))));
        assert_eq!(pool.nof_bwps(), 0);
        assert_eq!(pool.nof_coresets(), 0);
        assert_eq!(pool.nof_uplink_configs(), 0);
        assert_eq!(pool.nof_csi_configs(), 0);

        // Freed entries are handed out again
        let again = pool.create_ue(&cfg).unwrap();
        assert_eq!(again.uplink.index(), uplink_index);
        assert_eq!(pool.uplinks.refcount(&again.uplink), 1);
        assert_eq!(pool.nof_bwps(), 1);
    }

    #[test]
    fn test_wrong_cell_rejected() {
        let cell = cell();
        let mut pool = DuCellConfigPool::new(cell.clone());
        let mut cfg = ServingCellConfig::default_for_ue(&cell, 0);
        cfg.cell_index = CellIndex(3);
        assert!(matches!(pool.create_ue(&cfg), Err(ConfigPoolError::WrongCell { .. })));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cell = cell();
        let mut pool = DuCellConfigPool::new(cell.clone());
        let mut cfg = ServingCellConfig::default_for_ue(&cell, 0);
        cfg.nof_ul_harq_procs = 0;
        assert!(matches!(pool.create_ue(&cfg), Err(ConfigPoolError::InvalidConfig(_))));
        assert_eq!(pool.nof_bwps(), 0);
    }
}
