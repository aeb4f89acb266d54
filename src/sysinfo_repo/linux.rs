// Linux-specific helpers: cumulative CPU times from /proc/stat.

/// Aggregate CPU times since boot, in clock ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

impl CpuTimes {
    /// Busy share of all time since boot, 0..=100, rounded to a whole percent.
    pub fn busy_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (100.0 - 100.0 * self.idle as f64 / self.total as f64)
            .round()
            .clamp(0.0, 100.0)
    }
}

/// Parse the aggregate `cpu` line: user nice system idle iowait irq softirq steal [guest guest_nice].
/// Guest time is already folded into user/nice, so only the first eight columns are summed.
pub(super) fn parse_cpu_line(line: &str) -> Option<CpuTimes> {
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }
    let values: Vec<u64> = fields
        .take(8)
        .map(|f| f.parse::<u64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if values.len() < 4 {
        return None;
    }
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    let total = values.iter().sum();
    Some(CpuTimes { idle, total })
}

/// Read cumulative CPU times from /proc/stat (Linux).
pub(super) fn read_cpu_times_linux() -> Option<CpuTimes> {
    #[cfg(target_os = "linux")]
    {
        let content = std::fs::read_to_string("/proc/stat").ok()?;
        content.lines().find_map(parse_cpu_line)
    }
    #[cfg(not(target_os = "linux"))]
    None
}
