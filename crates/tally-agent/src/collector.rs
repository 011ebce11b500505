//! Collector: periodically samples host and process statistics into the
//! agent's local repository.
//!
//! Each tick writes one batch: every sampled gauge plus a `PollCount`
//! counter increment. The batch goes through `add_many`, so a concurrent
//! snapshot by the synchronizer sees either all of a tick or none of it.
//! No network access happens here.

use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use tally_core::MetricRecord;
use tally_store::{Repository, StoreResult};

/// Counter incremented once per collection tick.
pub const POLL_COUNT: &str = "PollCount";

/// Gauge holding a fresh random value each tick.
pub const RANDOM_VALUE: &str = "RandomValue";

/// Source of sampled gauges for one tick.
pub trait Sampler: Send {
    fn sample(&mut self) -> Vec<MetricRecord>;
}

/// Samples memory, CPU, load, and own-process statistics via `sysinfo`.
pub struct SystemSampler {
    system: System,
    pid: Option<Pid>,
}

impl SystemSampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = %e, "cannot resolve own pid, process metrics disabled");
                None
            }
        };
        Self {
            system: System::new(),
            pid,
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for SystemSampler {
    fn sample(&mut self) -> Vec<MetricRecord> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let sys = &self.system;
        let mut out = vec![
            MetricRecord::gauge("TotalMemory", sys.total_memory() as f64),
            MetricRecord::gauge("FreeMemory", sys.free_memory() as f64),
            MetricRecord::gauge("AvailableMemory", sys.available_memory() as f64),
            MetricRecord::gauge("UsedMemory", sys.used_memory() as f64),
            MetricRecord::gauge("TotalSwap", sys.total_swap() as f64),
            MetricRecord::gauge("UsedSwap", sys.used_swap() as f64),
        ];

        for (i, cpu) in sys.cpus().iter().enumerate() {
            out.push(MetricRecord::gauge(
                format!("CPUutilization{}", i + 1),
                f64::from(cpu.cpu_usage()),
            ));
        }

        let load = System::load_average();
        out.push(MetricRecord::gauge("LoadAverage1", load.one));
        out.push(MetricRecord::gauge("LoadAverage5", load.five));
        out.push(MetricRecord::gauge("LoadAverage15", load.fifteen));
        out.push(MetricRecord::gauge("Uptime", System::uptime() as f64));

        if let Some(pid) = self.pid {
            self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            if let Some(process) = self.system.process(pid) {
                out.push(MetricRecord::gauge("ProcessResidentMemory", process.memory() as f64));
                out.push(MetricRecord::gauge(
                    "ProcessVirtualMemory",
                    process.virtual_memory() as f64,
                ));
                out.push(MetricRecord::gauge(
                    "ProcessCpuUsage",
                    f64::from(process.cpu_usage()),
                ));
            }
        }

        out.push(MetricRecord::gauge(RANDOM_VALUE, rand::random::<f64>()));
        out
    }
}

/// Periodic sampler writing into the agent's local repository.
pub struct Collector {
    repo: Arc<dyn Repository>,
    sampler: Box<dyn Sampler>,
    interval: Duration,
}

impl Collector {
    pub fn new(repo: Arc<dyn Repository>, sampler: Box<dyn Sampler>, interval: Duration) -> Self {
        Self {
            repo,
            sampler,
            interval,
        }
    }

    /// Take one sample and store it. Returns the number of records written.
    pub async fn collect(&mut self) -> StoreResult<usize> {
        let mut batch = self.sampler.sample();
        batch.push(MetricRecord::counter(POLL_COUNT, 1));
        self.repo.add_many(&batch).await?;
        debug!(count = batch.len(), "metrics collected");
        Ok(batch.len())
    }

    /// Collect on every tick until shutdown, then collect once more.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "collector started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.collect().await {
                        warn!(error = %e, "metrics collection failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("collector shutting down");
                    if let Err(e) = self.collect().await {
                        warn!(error = %e, "final metrics collection failed");
                    }
                    break;
                }
            }
        }
    }
}
