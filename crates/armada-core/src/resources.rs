use serde::{Deserialize, Serialize};

/// A three-dimensional resource amount. Used both for node capacity and
/// for task requirements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub cpu: u32,
    pub memory_mb: u64,
    #[serde(default)]
    pub gpu: u32,
}

impl ResourceSpec {
    pub fn new(cpu: u32, memory_mb: u64, gpu: u32) -> Self {
        Self {
            cpu,
            memory_mb,
            gpu,
        }
    }

    /// True if `self` fits within `other` in all three dimensions.
    pub fn fits_within(&self, other: &ResourceSpec) -> bool {
        self.cpu <= other.cpu && self.memory_mb <= other.memory_mb && self.gpu <= other.gpu
    }

    /// Componentwise subtraction, saturating at zero.
    pub fn minus(&self, other: &ResourceSpec) -> ResourceSpec {
        ResourceSpec {
            cpu: self.cpu.saturating_sub(other.cpu),
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
            gpu: self.gpu.saturating_sub(other.gpu),
        }
    }

    /// Componentwise addition.
    pub fn plus(&self, other: &ResourceSpec) -> ResourceSpec {
        ResourceSpec {
            cpu: self.cpu + other.cpu,
            memory_mb: self.memory_mb + other.memory_mb,
            gpu: self.gpu + other.gpu,
        }
    }

    /// Scalar measure of leftover capacity, used for best-fit ranking.
    /// Memory is weighted down so a megabyte doesn't dwarf a core.
    pub fn slack_score(&self) -> u64 {
        u64::from(self.cpu) * 100 + self.memory_mb / 64 + u64::from(self.gpu) * 400
    }

    pub fn is_zero(&self) -> bool {
        self.cpu == 0 && self.memory_mb == 0 && self.gpu == 0
    }
}

impl std::fmt::Display for ResourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cpu={} mem={}MB gpu={}",
            self.cpu, self.memory_mb, self.gpu
        )
    }
}
