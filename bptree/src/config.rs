//! Tree configuration module.
//!
//! This module provides the parameters a tree is created with, either built
//! in code or loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `BPTREE_ORDER`: Maximum entries per leaf / children per internal node (default: `64`)
//! - `BPTREE_DUPLICATE_POLICY`: `reject` or `overwrite` (default: `reject`)
//! - `BPTREE_BULK_FILL_PERCENT`: Target node fill for bulk loads, 1-100 (default: `100`)
//!
//! # Invariants
//!
//! - A validated config has `MIN_ORDER <= order <= MAX_ORDER`
//! - A validated config has `1 <= bulk_fill_percent <= 100`

/// Smallest order that keeps split and merge well defined.
pub const MIN_ORDER: usize = 3;

/// Largest order accepted.
///
/// Above this, an internal node of `order` children cannot fit an 8KB page
/// even with empty keys. Whether a given key and value type fits a smaller
/// order is checked when the tree is created or opened.
pub const MAX_ORDER: usize = 512;

/// What `insert` does when the key is already present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Fail with `DuplicateKey` and keep the stored value.
    #[default]
    Reject,
    /// Replace the stored value and hand the old one back.
    Overwrite,
}

impl std::str::FromStr for DuplicatePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "overwrite" => Ok(Self::Overwrite),
            other => Err(ConfigError::InvalidValue {
                name: "duplicate_policy".to_string(),
                message: format!("'{other}' is not one of 'reject', 'overwrite'"),
            }),
        }
    }
}

/// Tree configuration.
///
/// # Post-conditions
///
/// When constructed via `from_env()` or accepted by `validate()`:
/// - `order` is in `[MIN_ORDER, MAX_ORDER]`
/// - `bulk_fill_percent` is in `[1, 100]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    /// Maximum number of entries in a leaf and children in an internal node.
    pub order: usize,
    /// Behavior on inserting an existing key.
    pub duplicate_policy: DuplicatePolicy,
    /// How full the bulk loader packs each node.
    pub bulk_fill_percent: u8,
}

/// Error returned when a configuration is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Order outside `[MIN_ORDER, MAX_ORDER]`.
    InvalidOrder(usize),
    /// A value (from code or the environment) is invalid.
    InvalidValue { name: String, message: String },
    /// A new tree needs an empty store.
    StoreNotEmpty,
    /// Opening a tree needs a store that holds one.
    MissingTree,
    /// The stored tree was built with a different order.
    OrderMismatch { configured: usize, stored: usize },
    /// Nodes of this order cannot hold the key and value types in one page.
    OrderExceedsPage {
        order: usize,
        needed: usize,
        available: usize,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidOrder(order) => write!(
                f,
                "invalid order {order}: must be between {MIN_ORDER} and {MAX_ORDER}"
            ),
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
            Self::StoreNotEmpty => write!(f, "page store already holds data"),
            Self::MissingTree => write!(f, "page store holds no tree"),
            Self::OrderMismatch { configured, stored } => write!(
                f,
                "configured order {configured} does not match stored order {stored}"
            ),
            Self::OrderExceedsPage {
                order,
                needed,
                available,
            } => write!(
                f,
                "order {order} leaves {available} bytes per entry, types need up to {needed}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl TreeConfig {
    /// Default order.
    pub const DEFAULT_ORDER: usize = 64;
    /// Default bulk-load fill.
    pub const DEFAULT_BULK_FILL_PERCENT: u8 = 100;

    /// Create a config with the given order and default settings otherwise.
    #[must_use]
    pub const fn new(order: usize) -> Self {
        Self {
            order,
            duplicate_policy: DuplicatePolicy::Reject,
            bulk_fill_percent: Self::DEFAULT_BULK_FILL_PERCENT,
        }
    }

    /// Set the duplicate policy.
    #[must_use]
    pub const fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Set the bulk-load fill percentage.
    #[must_use]
    pub const fn with_bulk_fill_percent(mut self, percent: u8) -> Self {
        self.bulk_fill_percent = percent;
        self
    }

    /// Minimum occupancy of a non-root node: `ceil(order / 2)`.
    #[must_use]
    pub const fn min_occupancy(&self) -> usize {
        self.order.div_ceil(2)
    }

    /// Check that the config describes a usable tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the order or the fill percentage is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_ORDER..=MAX_ORDER).contains(&self.order) {
            return Err(ConfigError::InvalidOrder(self.order));
        }
        if !(1..=100).contains(&self.bulk_fill_percent) {
            return Err(ConfigError::InvalidValue {
                name: "bulk_fill_percent".to_string(),
                message: format!("{} is not between 1 and 100", self.bulk_fill_percent),
            });
        }
        Ok(())
    }

    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BPTREE_ORDER`: Tree order (default: `64`)
    /// - `BPTREE_DUPLICATE_POLICY`: `reject` or `overwrite` (default: `reject`)
    /// - `BPTREE_BULK_FILL_PERCENT`: Bulk-load fill (default: `100`)
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed, or if the
    /// resulting config fails `validate()`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            order: Self::load_order()?,
            duplicate_policy: Self::load_duplicate_policy()?,
            bulk_fill_percent: Self::load_bulk_fill_percent()?,
        };
        config.validate()?;
        Ok(config)
    }

    fn load_order() -> Result<usize, ConfigError> {
        match std::env::var("BPTREE_ORDER") {
            Ok(value) => value.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                name: "BPTREE_ORDER".to_string(),
                message: format!("'{value}' is not a valid order"),
            }),
            Err(_) => Ok(Self::DEFAULT_ORDER),
        }
    }

    fn load_duplicate_policy() -> Result<DuplicatePolicy, ConfigError> {
        match std::env::var("BPTREE_DUPLICATE_POLICY") {
            Ok(value) => value.parse::<DuplicatePolicy>().map_err(|e| match e {
                ConfigError::InvalidValue { message, .. } => ConfigError::InvalidValue {
                    name: "BPTREE_DUPLICATE_POLICY".to_string(),
                    message,
                },
                other => other,
            }),
            Err(_) => Ok(DuplicatePolicy::default()),
        }
    }

    fn load_bulk_fill_percent() -> Result<u8, ConfigError> {
        match std::env::var("BPTREE_BULK_FILL_PERCENT") {
            Ok(value) => value.parse::<u8>().map_err(|_| ConfigError::InvalidValue {
                name: "BPTREE_BULK_FILL_PERCENT".to_string(),
                message: format!("'{value}' is not a valid percentage (must be 1-100)"),
            }),
            Err(_) => Ok(Self::DEFAULT_BULK_FILL_PERCENT),
        }
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ORDER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = TreeConfig::default();
        assert_eq!(config.order, 64);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.bulk_fill_percent, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_order_bounds() {
        assert_eq!(
            TreeConfig::new(2).validate(),
            Err(ConfigError::InvalidOrder(2))
        );
        assert!(TreeConfig::new(MIN_ORDER).validate().is_ok());
        assert!(TreeConfig::new(MAX_ORDER).validate().is_ok());
        assert_eq!(
            TreeConfig::new(MAX_ORDER + 1).validate(),
            Err(ConfigError::InvalidOrder(MAX_ORDER + 1))
        );
    }

    #[test]
    fn test_fill_percent_bounds() {
        let config = TreeConfig::new(4).with_bulk_fill_percent(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
        let config = TreeConfig::new(4).with_bulk_fill_percent(101);
        assert!(config.validate().is_err());
        let config = TreeConfig::new(4).with_bulk_fill_percent(50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_min_occupancy() {
        assert_eq!(TreeConfig::new(3).min_occupancy(), 2);
        assert_eq!(TreeConfig::new(4).min_occupancy(), 2);
        assert_eq!(TreeConfig::new(5).min_occupancy(), 3);
    }

    #[test]
    fn test_parse_duplicate_policy() {
        assert_eq!(
            "Overwrite".parse::<DuplicatePolicy>(),
            Ok(DuplicatePolicy::Overwrite)
        );
        assert_eq!(
            "reject".parse::<DuplicatePolicy>(),
            Ok(DuplicatePolicy::Reject)
        );
        assert!("ignore".parse::<DuplicatePolicy>().is_err());
    }

    #[test]
    fn test_config_error_display_order() {
        let error = ConfigError::InvalidOrder(1);
        assert_eq!(
            error.to_string(),
            "invalid order 1: must be between 3 and 512"
        );
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
