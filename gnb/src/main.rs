//! Scheduler gNodeB Main Application
//!
//! Runs the MAC scheduler of every configured cell against a simulated PHY.
//! Each cell gets its own worker; the workers meet at a slot barrier whose
//! completion aggregates metrics and applies shutdown requests.

mod config;
mod traffic;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use common::{time, Rnti, SlotPoint, UeIndex};
use interfaces::{SchedUeCreationRequest, SchedUeReconfigurationRequest, ServingCellConfig};
use parking_lot::Mutex;
use scheduler::{
    CellMetrics, CellScheduler, RntiManager, SchedulerError, SchedulerExpertConfig, SlotSyncPoint,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{CellConfig, GnbConfig, SimulationConfig};
use crate::traffic::SimulatedPhy;

/// Slots between a reconfiguration request and its application
const RECONFIG_APPLY_DELAY_SLOTS: u32 = 4;

/// Scheduler gNodeB
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, default_value = "configs/sched_gnb.yml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Number of slots to run, overrides the file
    #[arg(short, long)]
    slots: Option<u64>,

    /// Pace slots to the air interface slot duration
    #[arg(long)]
    realtime: bool,
}

/// State shared by the cell workers
struct SharedState {
    sync: SlotSyncPoint,
    nof_workers: usize,
    /// Counters per worker, accumulated since start
    metrics: Mutex<Vec<CellMetrics>>,
    /// Set by the signal handler or a failing worker
    shutdown_requested: AtomicBool,
    /// Set at a barrier completion, read by every worker after release
    stop: AtomicBool,
    nof_slots: Option<u64>,
    metrics_period_slots: u32,
    realtime: bool,
    slot_duration: Duration,
    start: Instant,
}

impl SharedState {
    /// Runs once per slot, in the last worker to reach the barrier
    fn on_slot_complete(&self, slot: SlotPoint, slots_run: u64) {
        if self.metrics_period_slots > 0 && slots_run % self.metrics_period_slots as u64 == 0 {
            let total = self.total_metrics();
            info!(
                "slot={} {} cells: DL tx={} retx={} BLER={:.3} | UL tx={} retx={} BLER={:.3} | \
                 discards={} timeouts={} PUCCH failures={}",
                slot,
                self.nof_workers,
                total.dl_new_tx,
                total.dl_retx,
                total.dl_bler(),
                total.ul_new_tx,
                total.ul_retx,
                total.ul_bler(),
                total.harq_discards,
                total.harq_timeouts,
                total.pucch_failures
            );
        }

        let limit_reached = self.nof_slots.is_some_and(|n| slots_run >= n);
        if limit_reached || self.shutdown_requested.load(Ordering::Acquire) {
            info!("Stopping all cells after slot {}", slot);
            self.stop.store(true, Ordering::Release);
            return;
        }

        if self.realtime {
            let elapsed = Duration::from_nanos(self.slot_duration.as_nanos() as u64 * slots_run);
            let deadline = self.start + elapsed;
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            } else if now - deadline > self.slot_duration {
                warn!("slot={} late by {:?}", slot, now - deadline);
            }
        }
    }

    fn total_metrics(&self) -> CellMetrics {
        self.metrics.lock().iter().fold(CellMetrics::default(), |mut acc, m| {
            acc.merge(m);
            acc
        })
    }
}

/// UE of the simulation
struct SimUe {
    ue_index: UeIndex,
    rnti: Rnti,
    serving_cell: ServingCellConfig,
}

/// Scheduler of one cell and its simulated surroundings
struct CellWorker {
    position: usize,
    sched: CellScheduler,
    phy: SimulatedPhy,
    ues: Vec<SimUe>,
    rntis: Vec<Rnti>,
    sim: SimulationConfig,
    /// Reconfiguration confirmations the UEs will send, by slot
    confirmations: Vec<(SlotPoint, Rnti)>,
}

impl CellWorker {
    fn new(
        position: usize,
        cell: &CellConfig,
        expert: SchedulerExpertConfig,
        sim: SimulationConfig,
    ) -> Result<Self> {
        let cell_req = cell.to_sched_request()?;
        let mut sched = CellScheduler::new(cell_req.clone(), expert)?;
        let mut rnti_mgr = RntiManager::default();

        let mut ues = Vec::new();
        for i in 0..cell.nof_ues {
            let rnti = rnti_mgr
                .allocate()
                .ok_or_else(|| anyhow::anyhow!("cell={} out of C-RNTIs", cell.cell_index))?;
            let mut serving_cell = ServingCellConfig::default_for_ue(&cell_req, i);
            serving_cell.nof_dl_harq_procs = cell.nof_dl_harqs;
            serving_cell.nof_ul_harq_procs = cell.nof_ul_harqs;
            let req = SchedUeCreationRequest {
                ue_index: UeIndex(i),
                crnti: rnti,
                serving_cell: serving_cell.clone(),
            };
            sched.add_ue(&req)?;
            ues.push(SimUe {
                ue_index: req.ue_index,
                rnti,
                serving_cell,
            });
        }
        info!("cell={} created with {} UEs", cell.cell_index, ues.len());

        Ok(Self {
            position,
            phy: SimulatedPhy::new(sim.clone(), cell.cell_index as u64),
            rntis: ues.iter().map(|u| u.rnti).collect(),
            sched,
            ues,
            sim,
            confirmations: Vec::new(),
        })
    }

    /// Schedule one slot
    fn run_slot(&mut self, slot: SlotPoint, slots_run: u64) -> Result<(), SchedulerError> {
        // 1. Feedback and traffic from the previous slots
        self.phy.deliver(&mut self.sched, &self.rntis)?;

        // 2. UE side of the reconfiguration procedures
        self.confirm_reconfigurations(slot)?;
        let period = self.sim.reconfig_period_slots as u64;
        if period > 0 && slots_run > 0 && slots_run % period == 0 && !self.ues.is_empty() {
            let idx = ((slots_run / period) as usize) % self.ues.len();
            self.reconfigure(idx, slot)?;
        }

        // 3. Scheduling
        self.sched.run_slot(slot, &mut self.phy)
    }

    fn reconfigure(&mut self, idx: usize, slot: SlotPoint) -> Result<(), SchedulerError> {
        let ue = &mut self.ues[idx];
        let mut serving_cell = ue.serving_cell.clone();
        if let Some(sr) = serving_cell.ul_config.sr.as_mut() {
            sr.period_slots = if sr.period_slots == 20 { 40 } else { 20 };
        }
        let req = SchedUeReconfigurationRequest {
            ue_index: ue.ue_index,
            crnti: ue.rnti,
            serving_cell: serving_cell.clone(),
            apply_delay_slots: RECONFIG_APPLY_DELAY_SLOTS,
        };
        match self.sched.handle_ue_reconfiguration(req) {
            Ok(()) => {
                debug!("rnti={} reconfiguration requested at slot {}", ue.rnti, slot);
                ue.serving_cell = serving_cell;
                let confirm_at =
                    slot + RECONFIG_APPLY_DELAY_SLOTS + self.sim.reconfig_confirm_delay_slots;
                self.confirmations.push((confirm_at, ue.rnti));
                Ok(())
            }
            Err(SchedulerError::ProcedureInProgress(rnti)) => {
                debug!("rnti={} reconfiguration skipped, procedure in progress", rnti);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn confirm_reconfigurations(&mut self, slot: SlotPoint) -> Result<(), SchedulerError> {
        let (due, later): (Vec<_>, Vec<_>) =
            self.confirmations.drain(..).partition(|(at, _)| *at <= slot);
        self.confirmations = later;
        for (_, rnti) in due {
            match self.sched.handle_ue_reconfig_complete(rnti) {
                Ok(()) => {}
                // Timed out before the UE answered
                Err(SchedulerError::NoProcedure(_)) => {
                    debug!("rnti={} late reconfiguration confirmation", rnti)
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Slot loop, ends when a barrier completion sets the stop flag
    fn run(mut self, shared: Arc<SharedState>, numerology: u8) -> Result<()> {
        let cell_index = self.sched.cell_index();
        let mut slot = SlotPoint::new(numerology, 0);
        let mut slots_run: u64 = 0;
        let mut failure: Option<SchedulerError> = None;

        loop {
            if failure.is_none() {
                if let Err(err) = self.run_slot(slot, slots_run) {
                    error!("cell={} slot={} scheduling failed: {}", cell_index, slot, err);
                    shared.shutdown_requested.store(true, Ordering::Release);
                    failure = Some(err);
                }
                let metrics = self.sched.take_metrics();
                shared.metrics.lock()[self.position].merge(&metrics);
            }
            slots_run += 1;

            // A failed worker keeps meeting the barrier until everyone stops
            shared
                .sync
                .wait(slot, shared.nof_workers, || shared.on_slot_complete(slot, slots_run));
            if shared.stop.load(Ordering::Acquire) {
                break;
            }
            slot += 1;
        }

        info!("cell={} stopped after {} slots", cell_index, slots_run);
        match failure {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = GnbConfig::from_file(&args.config)?;
    if args.slots.is_some() {
        config.nof_slots = args.slots;
    }
    config.realtime |= args.realtime;

    // Initialize logging
    let log_level = args.log_level.clone().unwrap_or_else(|| config.log.all_level.clone());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting scheduler gNodeB");
    info!("Configuration file: {}", args.config.display());
    info!("  Cells: {}", config.cells.len());
    info!("  Slots: {:?}", config.nof_slots);
    info!("  Realtime: {}", config.realtime);

    let scs = config.cells[0].scs()?;
    let workers = config
        .cells
        .iter()
        .enumerate()
        .map(|(position, cell)| {
            CellWorker::new(position, cell, config.scheduler.clone(), config.simulation.clone())
        })
        .collect::<Result<Vec<_>>>()?;

    let shared = Arc::new(SharedState {
        sync: SlotSyncPoint::new(),
        nof_workers: workers.len(),
        metrics: Mutex::new(vec![CellMetrics::default(); workers.len()]),
        shutdown_requested: AtomicBool::new(false),
        stop: AtomicBool::new(false),
        nof_slots: config.nof_slots,
        metrics_period_slots: config.log.metrics_period_slots,
        realtime: config.realtime,
        slot_duration: time::slot_duration(scs),
        start: Instant::now(),
    });

    // Shutdown is applied at the next slot boundary
    {
        let shared = shared.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                shared.shutdown_requested.store(true, Ordering::Release);
            }
        });
    }

    let handles: Vec<_> = workers
        .into_iter()
        .map(|worker| {
            let shared = shared.clone();
            tokio::task::spawn_blocking(move || worker.run(shared, scs.numerology()))
        })
        .collect();

    let mut result = Ok(());
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!("Cell worker failed: {}", err);
                result = Err(err);
            }
            Err(err) => {
                error!("Cell worker panicked: {}", err);
                result = Err(err.into());
            }
        }
    }

    let total = shared.total_metrics();
    info!("Final metrics: {}", serde_json::to_string(&total)?);
    info!("Scheduler gNodeB shutdown complete");
    result
}
