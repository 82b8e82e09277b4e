//! Per-node configuration.
//!
//! Every tunable lives here and travels with the node that owns it, so any
//! number of nodes with different settings can share a process.

use std::time::Duration;

use meridian_id::{DEFAULT_DIGIT_BITS, MAX_DIGIT_BITS};

use crate::error::ConfigError;

/// Largest leaf set a node will accept, locally or off the wire.
pub const MAX_LEAF_SET_SIZE: usize = 1024;

/// Configuration for a single overlay node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Bits per routing digit (b). Columns per row = 2^b.
    pub digit_bits: u8,

    /// Total leaf-set capacity (L), split evenly between the two halves.
    pub leaf_set_size: usize,

    /// Handles kept per routing-table cell (k).
    pub bucket_capacity: usize,

    /// How often to push our leaf set to the counter-clockwise neighbor.
    pub ping_neighbor_period: Duration,

    /// Silence from an immediate neighbor longer than this triggers a
    /// liveness check.
    pub check_liveness_period: Duration,

    /// How often to exchange leaf sets with a random neighbor.
    pub maintenance_period: Duration,

    /// Seed for maintenance peer selection.
    pub rng_seed: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            digit_bits: DEFAULT_DIGIT_BITS,
            leaf_set_size: 24,
            bucket_capacity: 8,
            ping_neighbor_period: Duration::from_secs(20),
            check_liveness_period: Duration::from_secs(30),
            maintenance_period: Duration::from_secs(60),
            rng_seed: 0,
        }
    }
}

impl NodeConfig {
    /// Build a config from `MERIDIAN_*` environment variables.
    ///
    /// Unset variables keep their defaults; set but unparsable ones fail.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(bits) = env_parse::<u8>("MERIDIAN_DIGIT_BITS")? {
            config.digit_bits = bits;
        }
        if let Some(size) = env_parse::<usize>("MERIDIAN_LEAF_SET_SIZE")? {
            config.leaf_set_size = size;
        }
        if let Some(k) = env_parse::<usize>("MERIDIAN_BUCKET_CAPACITY")? {
            config.bucket_capacity = k;
        }
        if let Some(secs) = env_parse::<u64>("MERIDIAN_PING_PERIOD_SECS")? {
            config.ping_neighbor_period = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("MERIDIAN_CHECK_LIVENESS_PERIOD_SECS")? {
            config.check_liveness_period = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("MERIDIAN_MAINTENANCE_PERIOD_SECS")? {
            config.maintenance_period = Duration::from_secs(secs);
        }
        if let Some(seed) = env_parse::<u64>("MERIDIAN_SEED")? {
            config.rng_seed = seed;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the digit width.
    #[must_use]
    pub fn with_digit_bits(mut self, bits: u8) -> Self {
        self.digit_bits = bits;
        self
    }

    /// Set the total leaf-set capacity.
    #[must_use]
    pub fn with_leaf_set_size(mut self, size: usize) -> Self {
        self.leaf_set_size = size;
        self
    }

    /// Set the routing-table bucket capacity.
    #[must_use]
    pub fn with_bucket_capacity(mut self, capacity: usize) -> Self {
        self.bucket_capacity = capacity;
        self
    }

    /// Set the neighbor ping period.
    #[must_use]
    pub fn with_ping_neighbor_period(mut self, period: Duration) -> Self {
        self.ping_neighbor_period = period;
        self
    }

    /// Set the neighbor silence threshold.
    #[must_use]
    pub fn with_check_liveness_period(mut self, period: Duration) -> Self {
        self.check_liveness_period = period;
        self
    }

    /// Set the random-exchange period.
    #[must_use]
    pub fn with_maintenance_period(mut self, period: Duration) -> Self {
        self.maintenance_period = period;
        self
    }

    /// Set the maintenance RNG seed.
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = seed;
        self
    }

    /// Number of routing-table columns (2^b).
    pub fn num_columns(&self) -> usize {
        1usize << self.digit_bits
    }

    /// Check every field is inside its legal range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.digit_bits == 0 || self.digit_bits > MAX_DIGIT_BITS {
            return Err(ConfigError::InvalidValue {
                name: "digit_bits",
                value: self.digit_bits.to_string(),
                reason: "must be between 1 and 8",
            });
        }
        if self.leaf_set_size < 2 || self.leaf_set_size % 2 != 0 {
            return Err(ConfigError::InvalidValue {
                name: "leaf_set_size",
                value: self.leaf_set_size.to_string(),
                reason: "must be even and at least 2",
            });
        }
        if self.leaf_set_size > MAX_LEAF_SET_SIZE {
            return Err(ConfigError::InvalidValue {
                name: "leaf_set_size",
                value: self.leaf_set_size.to_string(),
                reason: "exceeds maximum leaf set size",
            });
        }
        if self.bucket_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                name: "bucket_capacity",
                value: "0".to_string(),
                reason: "must be at least 1",
            });
        }
        for (name, period) in [
            ("ping_neighbor_period", self.ping_neighbor_period),
            ("check_liveness_period", self.check_liveness_period),
            ("maintenance_period", self.maintenance_period),
        ] {
            if period.is_zero() {
                return Err(ConfigError::InvalidValue {
                    name,
                    value: "0s".to_string(),
                    reason: "period must be non-zero",
                });
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse { name, value }),
        Err(_) => Ok(None),
    }
}
