// Host metrics via sysinfo

mod linux;

use crate::models::{DiskUsage, HostInfo, MemoryUsage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sysinfo::{Disks, System};
use tracing::instrument;

pub struct SysinfoRepo {
    sys: Arc<std::sync::Mutex<System>>,
    disks: Arc<std::sync::Mutex<Disks>>,
}

impl Default for SysinfoRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoRepo {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_usage();
        let disks = Disks::new_with_refreshed_list();
        Self {
            sys: Arc::new(std::sync::Mutex::new(sys)),
            disks: Arc::new(std::sync::Mutex::new(disks)),
        }
    }

    /// Busy share of CPU time accumulated since boot (not a delta between ticks).
    /// Falls back to sysinfo's global usage where /proc/stat is unavailable.
    #[instrument(skip(self), fields(repo = "sysinfo", operation = "get_cpu_percent"))]
    pub async fn get_cpu_percent(&self) -> anyhow::Result<f64> {
        let sys = self.sys.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(times) = linux::read_cpu_times_linux() {
                return Ok(times.busy_percent());
            }
            let mut sys = sys
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo lock poisoned: {}", e))?;
            sys.refresh_cpu_usage();
            Ok((sys.global_cpu_usage() as f64).round().clamp(0.0, 100.0))
        })
        .await
        .map_err(|e| anyhow::anyhow!("sysinfo task join: {}", e))?
    }

    #[instrument(skip(self), fields(repo = "sysinfo", operation = "get_memory_usage"))]
    pub async fn get_memory_usage(&self) -> anyhow::Result<MemoryUsage> {
        let sys = self.sys.clone();
        tokio::task::spawn_blocking(move || {
            let mut sys = sys
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo lock poisoned: {}", e))?;
            sys.refresh_memory();

            let total = sys.total_memory();
            anyhow::ensure!(total > 0, "total memory reported as 0");
            let free = sys.available_memory();
            let used = total.saturating_sub(free);
            Ok(MemoryUsage {
                total,
                used,
                free,
                used_percent: ((used as f64 / total as f64) * 100.0).round(),
            })
        })
        .await
        .map_err(|e| anyhow::anyhow!("sysinfo task join: {}", e))?
    }

    /// Free space of the filesystem that holds `path` (longest matching mount point).
    #[instrument(skip(self), fields(repo = "sysinfo", operation = "get_disk_usage"))]
    pub async fn get_disk_usage(&self, path: PathBuf) -> anyhow::Result<DiskUsage> {
        let disks = self.disks.clone();
        tokio::task::spawn_blocking(move || {
            let target = std::fs::canonicalize(&path)
                .map_err(|e| anyhow::anyhow!("canonicalize {}: {}", path.display(), e))?;
            let mut disks_guard = disks
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo disks lock poisoned: {}", e))?;
            disks_guard.refresh(false);
            let disk = disks_guard
                .list()
                .iter()
                .filter(|d| target.starts_with(d.mount_point()))
                .max_by_key(|d| d.mount_point().components().count())
                .ok_or_else(|| anyhow::anyhow!("no filesystem found for {}", target.display()))?;

            let total = disk.total_space();
            let available = disk.available_space();
            let used = total.saturating_sub(available);
            let used_percent = if total > 0 {
                ((used as f64 / total as f64) * 100.0).round()
            } else {
                0.0
            };
            Ok(DiskUsage {
                mount: disk.mount_point().to_string_lossy().into_owned(),
                total,
                available,
                used,
                used_percent,
            })
        })
        .await
        .map_err(|e| anyhow::anyhow!("sysinfo task join: {}", e))?
    }

    /// Platform, hostname and uptime; cheap enough to call per request.
    pub fn get_host_info(&self) -> HostInfo {
        HostInfo {
            platform: std::env::consts::OS.into(),
            arch: std::env::consts::ARCH.into(),
            hostname: System::host_name().unwrap_or_default(),
            os_version: System::long_os_version().unwrap_or_default(),
            uptime_secs: System::uptime(),
        }
    }
}

/// Resolve the configured disk path relative to the working directory.
pub fn resolve_disk_path(path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(p))
            .unwrap_or_else(|_| p.to_path_buf())
    }
}
