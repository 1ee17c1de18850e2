use serde::{Deserialize, Serialize};

/// Tokens a mapping string must mention exactly once, two chars each.
pub const MAPPING_TOKENS: [&str; 6] = ["ch", "ra", "bg", "ba", "ro", "co"];

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} = {value} must be a power of two")]
    NotPowerOfTwo { name: &'static str, value: usize },

    #[error("invalid address mapping {mapping:?}: {reason}")]
    BadMapping { mapping: String, reason: String },
}

/// DRAM geometry, JEDEC timing and PIM engine knobs.
///
/// Timing values are in memory-clock cycles. Geometry fields must be powers
/// of two so address fields stay bit-exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub channels: usize,
    pub ranks: usize,
    pub bankgroups: usize,
    pub banks_per_group: usize,
    pub rows: usize,
    pub columns: usize,
    /// Burst length: columns transferred per READ/WRITE.
    pub burst_length: usize,
    /// Device data bus width in bits.
    pub device_width: usize,

    /// Address mapping, most significant field first, e.g. `"rochrababgco"`.
    pub mapping: String,

    // timing
    pub tccd_l: u64,
    pub tccd_s: u64,
    pub trcdrd: u64,
    pub trcdwr: u64,
    pub tras: u64,
    pub trp: u64,
    pub trtp: u64,
    pub twr: u64,
    pub cl: u64,
    pub cwl: u64,
    /// Average refresh interval; 0 disables refresh.
    pub trefi: u64,
    pub trfc: u64,

    /// Cycles before a refresh during which new PIM row activations are
    /// held back (the scheduler drops its open-row bookkeeping).
    pub refresh_guard: u64,
    /// Tighter pre-refresh window in which PIM work is suppressed entirely.
    pub refresh_guard2: u64,

    pub epoch_period: u64,
    /// Depth of the PIM control transaction queue.
    pub pim_queue_depth: usize,
    /// Depth of each controller's conventional transaction queue.
    pub trans_queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channels: 4,
            ranks: 1,
            bankgroups: 4,
            banks_per_group: 4,
            rows: 32768,
            columns: 1024,
            burst_length: 8,
            device_width: 16,
            mapping: "rochrababgco".to_string(),
            tccd_l: 4,
            tccd_s: 2,
            trcdrd: 18,
            trcdwr: 14,
            tras: 32,
            trp: 14,
            trtp: 8,
            twr: 15,
            cl: 16,
            cwl: 12,
            trefi: 3900,
            trfc: 140,
            refresh_guard: 40,
            refresh_guard2: 12,
            epoch_period: 100_000,
            pim_queue_depth: 8,
            trans_queue_depth: 32,
        }
    }
}

impl Config {
    /// Total banks per channel, across ranks and bank groups.
    #[must_use]
    pub fn banks(&self) -> usize {
        self.ranks * self.bankgroups * self.banks_per_group
    }

    /// Column accesses per row: one per burst.
    #[must_use]
    pub fn bursts_per_row(&self) -> usize {
        self.columns / self.burst_length
    }

    /// Low address bits covered by a single burst.
    #[must_use]
    pub fn shift_bits(&self) -> u32 {
        (self.burst_length * self.device_width / 8).ilog2()
    }

    /// Closed-page latency of a conventional read.
    #[must_use]
    pub fn read_latency(&self) -> u64 {
        self.trcdrd + self.cl + (self.burst_length as u64) / 2
    }

    /// Closed-page latency of a conventional write.
    #[must_use]
    pub fn write_latency(&self) -> u64 {
        self.trcdwr + self.cwl + (self.burst_length as u64) / 2 + self.twr
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("channels", self.channels),
            ("ranks", self.ranks),
            ("bankgroups", self.bankgroups),
            ("banks_per_group", self.banks_per_group),
            ("rows", self.rows),
            ("columns", self.columns),
            ("burst_length", self.burst_length),
        ] {
            if value == 0 || value & (value - 1) != 0 {
                return Err(ConfigError::NotPowerOfTwo { name, value });
            }
        }
        Ok(())
    }
}
