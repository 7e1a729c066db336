//! Tree configuration.
//!
//! A `TreeConfig` can be built in code or loaded from environment
//! variables.
//!
//! # Environment Variables
//!
//! - `CACHETREE_DEGREE`: maximum entries per node (default: `16`, minimum `3`)
//! - `CACHETREE_CACHE_CAPACITY`: resident nodes before eviction starts
//!   (default: `64`, minimum `1`)
//! - `CACHETREE_EVICTION_LOOKAHEAD`: unsafe entries an eviction pass may skip
//!   (default: `8`)
//! - `CACHETREE_BLOCK_SIZE`: allocation unit of block backends in bytes
//!   (default: `4096`, minimum `64`)
//!
//! # Invariants
//!
//! - `degree >= 3`
//! - `cache_capacity >= 1`
//! - `block_size >= 64`

use crate::storage::HEADER_LEN;

/// Tree and cache sizing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    /// Maximum entries per data node and pivots per index node.
    pub degree: usize,
    /// Number of resident nodes the cache tries to stay within.
    pub cache_capacity: usize,
    /// How many non-evictable entries an eviction pass skips before giving
    /// up. Zero stops at the first one.
    pub eviction_lookahead: usize,
    /// Allocation unit for block-addressed backends.
    pub block_size: u32,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable (or builder argument) has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl TreeConfig {
    /// Default degree.
    pub const DEFAULT_DEGREE: usize = 16;
    /// Default cache capacity.
    pub const DEFAULT_CACHE_CAPACITY: usize = 64;
    /// Default eviction lookahead.
    pub const DEFAULT_EVICTION_LOOKAHEAD: usize = 8;
    /// Default block size.
    pub const DEFAULT_BLOCK_SIZE: u32 = 4096;
    /// Smallest degree for which split and merge keep nodes non-empty.
    pub const MIN_DEGREE: usize = 3;

    /// Create a configuration with the given degree and default sizing.
    #[must_use]
    pub const fn new(degree: usize) -> Self {
        Self {
            degree,
            cache_capacity: Self::DEFAULT_CACHE_CAPACITY,
            eviction_lookahead: Self::DEFAULT_EVICTION_LOOKAHEAD,
            block_size: Self::DEFAULT_BLOCK_SIZE,
        }
    }

    /// Set the cache capacity.
    #[must_use]
    pub const fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    /// Set the eviction lookahead.
    #[must_use]
    pub const fn with_eviction_lookahead(mut self, eviction_lookahead: usize) -> Self {
        self.eviction_lookahead = eviction_lookahead;
        self
    }

    /// Set the block size.
    #[must_use]
    pub const fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Check the invariants listed in the module docs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.degree < Self::MIN_DEGREE {
            return Err(ConfigError::InvalidValue {
                name: "degree".to_string(),
                message: format!("{} is below the minimum of {}", self.degree, Self::MIN_DEGREE),
            });
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                name: "cache_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if (self.block_size as usize) < HEADER_LEN {
            return Err(ConfigError::InvalidValue {
                name: "block_size".to_string(),
                message: format!("{} is below the minimum of {HEADER_LEN}", self.block_size),
            });
        }
        Ok(())
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but not a valid number, or if
    /// the resulting configuration violates an invariant.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            degree: load_number("CACHETREE_DEGREE", Self::DEFAULT_DEGREE)?,
            cache_capacity: load_number("CACHETREE_CACHE_CAPACITY", Self::DEFAULT_CACHE_CAPACITY)?,
            eviction_lookahead: load_number(
                "CACHETREE_EVICTION_LOOKAHEAD",
                Self::DEFAULT_EVICTION_LOOKAHEAD,
            )?,
            block_size: load_number("CACHETREE_BLOCK_SIZE", Self::DEFAULT_BLOCK_SIZE)?,
        };
        config.validate()?;
        Ok(config)
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DEGREE)
    }
}

/// Load a number from the environment.
///
/// Returns the default if not set.
fn load_number<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a valid number"),
        }),
        Err(_) => Ok(default),
    }
}
