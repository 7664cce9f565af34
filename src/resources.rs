use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Resource usage of one process, as observed while it was resident
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    /// Wall-clock time from sampler start to process exit
    pub elapsed_ms: u64,

    /// Peak resident memory in kilobytes
    pub memory_kb: u64,

    /// User plus system CPU time at the last sample
    pub cpu_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    memory_kb: u64,
    cpu_ms: u64,
}

/// Polls CPU, elapsed time and memory of a live process
#[derive(Debug, Clone)]
pub struct ResourceSampler {
    interval: Duration,
}

/// A sampler running concurrently with the process it observes
#[derive(Debug)]
pub struct SamplerHandle {
    pid: u32,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<UsageStats>,
}

impl ResourceSampler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Start sampling `pid` in the background. The clock starts now.
    pub fn start(&self, pid: u32) -> SamplerHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let started = Instant::now();
        let task = tokio::spawn(watch(pid, started, self.interval, stop_rx));

        SamplerHandle {
            pid,
            stop: Some(stop_tx),
            task,
        }
    }

    /// Sample `pid` until it exits.
    ///
    /// Returns zeroed stats if the process is already gone before the first
    /// sample; very fast programs routinely hit this.
    pub async fn sample(&self, pid: u32) -> UsageStats {
        let (_keep_running, stop_rx) = oneshot::channel();
        watch(pid, Instant::now(), self.interval, stop_rx).await
    }
}

impl SamplerHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Stop sampling and return the final snapshot.
    ///
    /// One last sample is attempted first, so calling this before the process
    /// is reaped captures its state at exit.
    pub async fn finish(mut self) -> UsageStats {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        match self.task.await {
            Ok(usage) => usage,
            Err(e) => {
                warn!("Resource sampler for process {} failed: {}", self.pid, e);
                UsageStats::default()
            }
        }
    }
}

async fn watch(
    pid: u32,
    started: Instant,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) -> UsageStats {
    let mut usage: Option<UsageStats> = None;

    loop {
        match read_sample(pid) {
            Some(sample) => record(&mut usage, sample),
            None => break,
        }

        tokio::select! {
            _ = &mut stop => {
                if let Some(sample) = read_sample(pid) {
                    record(&mut usage, sample);
                }
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }

    match usage {
        Some(mut usage) => {
            usage.elapsed_ms = started.elapsed().as_millis() as u64;
            debug!("Process {} usage: {:?}", pid, usage);
            usage
        }
        None => {
            debug!("Process {} vanished before the first sample", pid);
            UsageStats::default()
        }
    }
}

fn record(usage: &mut Option<UsageStats>, sample: Sample) {
    let current = usage.get_or_insert_with(UsageStats::default);
    current.memory_kb = current.memory_kb.max(sample.memory_kb);
    current.cpu_ms = sample.cpu_ms;
}

/// Read one sample from /proc. Zombies have no memory lines and count as gone.
#[cfg(target_os = "linux")]
fn read_sample(pid: u32) -> Option<Sample> {
    let process = procfs::process::Process::new(pid as i32).ok()?;
    let status = process.status().ok()?;
    let memory_kb = status.vmhwm.or(status.vmrss)?;
    let stat = process.stat().ok()?;

    let cpu_ms = (stat.utime + stat.stime) * 1000 / clock_ticks_per_second();

    Some(Sample { memory_kb, cpu_ms })
}

#[cfg(target_os = "linux")]
fn clock_ticks_per_second() -> u64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as u64
    } else {
        100
    }
}

#[cfg(not(target_os = "linux"))]
fn read_sample(_pid: u32) -> Option<Sample> {
    None
}
