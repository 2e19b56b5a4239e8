//! Host information recorded alongside every report for reproducibility.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub cpu_model: String,
    pub cpu_count: u32,
    pub memory_gb: f64,
}

impl SystemInfo {
    /// Linux-only fields degrade to "Unknown" / 0 on other platforms.
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpu_model: cpu_model().unwrap_or_else(|| "Unknown".to_string()),
            cpu_count: cpu_count(),
            memory_gb: total_memory_kb().map(|kb| kb as f64 / (1024.0 * 1024.0)).unwrap_or(0.0),
        }
    }
}

pub fn cpu_count() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

/// Resident set size of the current process in MB.
pub fn process_rss_mb() -> Option<f64> {
    read_proc_kb("/proc/self/status", "VmRSS:").map(|kb| kb as f64 / 1024.0)
}

fn cpu_model() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/cpuinfo").ok().and_then(|content| {
            content
                .lines()
                .find(|l| l.starts_with("model name"))
                .and_then(|l| l.split(':').nth(1))
                .map(|s| s.trim().to_string())
        })
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

fn total_memory_kb() -> Option<u64> {
    read_proc_kb("/proc/meminfo", "MemTotal:")
}

fn read_proc_kb(path: &str, key: &str) -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string(path).ok().and_then(|content| parse_kb_field(&content, key))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (path, key);
        None
    }
}

fn parse_kb_field(content: &str, key: &str) -> Option<u64> {
    content
        .lines()
        .find(|l| l.starts_with(key))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
}
