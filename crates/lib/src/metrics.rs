//! Host CPU and RAM usage for the status line.

use std::fmt;
use sysinfo::System;

/// One sample of host resource usage, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceUsage {
    pub cpu_percent: f32,
    pub ram_percent: f32,
}

impl fmt::Display for ResourceUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CPU: {:.1}% | RAM: {:.1}%",
            self.cpu_percent, self.ram_percent
        )
    }
}

/// Keeps a `sysinfo::System` around so CPU usage is measured between consecutive samples.
pub struct ResourceSampler {
    system: System,
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // First CPU reading is a baseline; usage is relative to it.
        system.refresh_cpu();
        Self { system }
    }

    pub fn sample(&mut self) -> ResourceUsage {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        let total = self.system.total_memory();
        let ram_percent = if total == 0 {
            0.0
        } else {
            (self.system.used_memory() as f64 / total as f64 * 100.0) as f32
        };
        ResourceUsage {
            cpu_percent: self.system.global_cpu_info().cpu_usage(),
            ram_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_formats_like_status_line() {
        let usage = ResourceUsage {
            cpu_percent: 12.34,
            ram_percent: 50.0,
        };
        assert_eq!(usage.to_string(), "CPU: 12.3% | RAM: 50.0%");
    }

    #[test]
    fn sample_is_within_bounds() {
        let mut sampler = ResourceSampler::new();
        let usage = sampler.sample();
        assert!((0.0..=100.0).contains(&usage.ram_percent));
        assert!(usage.cpu_percent >= 0.0);
    }
}
