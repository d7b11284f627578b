//! Host resource sampling from the /proc filesystem and statvfs
//!
//! CPU usage is computed from the delta between two `/proc/stat` reads, so
//! the source keeps the previous aggregate counters between samples.

use std::ffi::CString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::SampleError;

const KIB_PER_GIB: f64 = 1024.0 * 1024.0;

/// One reading of host resources
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SystemSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_available_gb: f64,
    pub disk_percent: f64,
}

/// Source of host resource readings
#[async_trait]
pub trait SystemSource: Send + Sync {
    async fn sample(&self) -> Result<SystemSample, SampleError>;
}

/// Aggregate CPU counters from the `cpu` line of /proc/stat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStat {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuStat {
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    /// idle + iowait
    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }

    /// Busy percentage between `previous` and `self`
    ///
    /// Without a previous reading the counters since boot are used.
    pub fn usage_percent_since(&self, previous: Option<&CpuStat>) -> f64 {
        let base = previous.copied().unwrap_or_default();
        let delta_total = self.total().saturating_sub(base.total());
        let delta_idle = self.idle_total().saturating_sub(base.idle_total());
        if delta_total == 0 {
            return 0.0;
        }
        (delta_total.saturating_sub(delta_idle)) as f64 / delta_total as f64 * 100.0
    }
}

/// Parse the aggregate `cpu` line of /proc/stat
pub fn parse_cpu_stat(content: &str) -> Option<CpuStat> {
    let line = content
        .lines()
        .find(|line| line.split_whitespace().next() == Some("cpu"))?;
    let parts: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|p| p.parse::<u64>().unwrap_or(0))
        .collect();
    if parts.len() < 7 {
        return None;
    }

    Some(CpuStat {
        user: parts[0],
        nice: parts[1],
        system: parts[2],
        idle: parts[3],
        iowait: parts[4],
        irq: parts[5],
        softirq: parts[6],
        steal: parts.get(7).copied().unwrap_or(0),
    })
}

/// MemTotal and MemAvailable in KiB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total_kb: u64,
    pub available_kb: u64,
}

impl MemoryInfo {
    pub fn used_percent(&self) -> f64 {
        if self.total_kb == 0 {
            return 0.0;
        }
        self.total_kb.saturating_sub(self.available_kb) as f64 / self.total_kb as f64 * 100.0
    }

    pub fn available_gb(&self) -> f64 {
        self.available_kb as f64 / KIB_PER_GIB
    }
}

/// Parse MemTotal and MemAvailable out of /proc/meminfo
pub fn parse_meminfo(content: &str) -> Option<MemoryInfo> {
    let mut total = None;
    let mut available = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let key = parts.next();
        let value = parts.next().and_then(|v| v.parse::<u64>().ok());
        match key {
            Some("MemTotal:") => total = value,
            Some("MemAvailable:") => available = value,
            _ => {}
        }
    }

    Some(MemoryInfo {
        total_kb: total?,
        available_kb: available?,
    })
}

/// Used percentage of the filesystem holding `path`
///
/// Used space is measured against space available to unprivileged users,
/// matching what `df` reports.
pub fn disk_usage_percent(path: &str) -> Result<f64, SampleError> {
    let c_path = CString::new(path).map_err(|e| SampleError::Parse {
        path: path.to_string(),
        reason: format!("Invalid path: {}", e),
    })?;

    // SAFETY: statvfs is plain old data and is fully written by a successful call
    let stat = unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(SampleError::Statvfs {
                path: path.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }
        stat
    };

    let block_size = stat.f_frsize as u64;
    let total = stat.f_blocks as u64 * block_size;
    let free = stat.f_bfree as u64 * block_size;
    let available = stat.f_bavail as u64 * block_size;
    let used = total.saturating_sub(free);

    let denominator = used + available;
    if denominator == 0 {
        return Ok(0.0);
    }
    Ok(used as f64 / denominator as f64 * 100.0)
}

fn read_file(path: &Path) -> Result<String, SampleError> {
    fs::read_to_string(path).map_err(|source| SampleError::Read {
        path: path.display().to_string(),
        source,
    })
}

/// [`SystemSource`] backed by /proc and statvfs
///
/// Blocking reads run on tokio's blocking pool.
#[derive(Clone)]
pub struct ProcSystemSource {
    proc_root: PathBuf,
    disk_path: String,
    previous_cpu: Arc<Mutex<Option<CpuStat>>>,
}

impl ProcSystemSource {
    pub fn new(disk_path: impl Into<String>) -> Self {
        Self::with_proc_root("/proc", disk_path)
    }

    /// Read proc files from `proc_root` instead of `/proc`
    pub fn with_proc_root(proc_root: impl Into<PathBuf>, disk_path: impl Into<String>) -> Self {
        Self {
            proc_root: proc_root.into(),
            disk_path: disk_path.into(),
            previous_cpu: Arc::new(Mutex::new(None)),
        }
    }

    fn read_cpu_percent(&self) -> Result<f64, SampleError> {
        let path = self.proc_root.join("stat");
        let current = parse_cpu_stat(&read_file(&path)?).ok_or_else(|| SampleError::Parse {
            path: path.display().to_string(),
            reason: "no aggregate cpu line".to_string(),
        })?;

        let mut previous = self
            .previous_cpu
            .lock()
            .map_err(|e| SampleError::Task(format!("cpu cache lock poisoned: {}", e)))?;
        let percent = current.usage_percent_since(previous.as_ref());
        *previous = Some(current);
        Ok(percent)
    }

    fn read_memory(&self) -> Result<MemoryInfo, SampleError> {
        let path = self.proc_root.join("meminfo");
        parse_meminfo(&read_file(&path)?).ok_or_else(|| SampleError::Parse {
            path: path.display().to_string(),
            reason: "MemTotal or MemAvailable missing".to_string(),
        })
    }

    /// Take one reading on the current thread
    pub fn sample_blocking(&self) -> Result<SystemSample, SampleError> {
        let cpu_percent = self.read_cpu_percent()?;
        let memory = self.read_memory()?;
        let disk_percent = disk_usage_percent(&self.disk_path)?;

        Ok(SystemSample {
            cpu_percent,
            memory_percent: memory.used_percent(),
            memory_available_gb: memory.available_gb(),
            disk_percent,
        })
    }
}

#[async_trait]
impl SystemSource for ProcSystemSource {
    async fn sample(&self) -> Result<SystemSample, SampleError> {
        let source = self.clone();
        tokio::task::spawn_blocking(move || source.sample_blocking())
            .await
            .map_err(|e| SampleError::Task(e.to_string()))?
    }
}
