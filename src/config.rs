use std::num::NonZeroU64;

use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};

use crate::{error::VboError, resource::UsageHint};

/// 64 KiB
pub const DEFAULT_CAPACITY: NonZeroU64 = nonzero!(64 * 1024u64);

/// Factor a buffer's capacity is multiplied by each time it runs out of room.
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VboConfig {
    pub growth_factor: f64,
    /// Capacity of buffers created without an explicit one.
    pub initial_capacity: u64,
    pub usage: UsageHint,
    /// Verify the block chain after every structural change.
    pub consistency_checks: bool,
}

impl Default for VboConfig {
    fn default() -> Self {
        VboConfig {
            growth_factor: DEFAULT_GROWTH_FACTOR,
            initial_capacity: DEFAULT_CAPACITY.get(),
            usage: UsageHint::default(),
            consistency_checks: cfg!(debug_assertions),
        }
    }
}

impl VboConfig {
    pub fn validate(&self) -> Result<(), VboError> {
        if !(self.growth_factor > 1.0 && self.growth_factor.is_finite()) {
            return Err(VboError::InvalidConfig(
                "growth factor must be a finite number above 1",
            ));
        }
        if self.initial_capacity == 0 {
            return Err(VboError::InvalidConfig("initial capacity must not be 0"));
        }
        Ok(())
    }

    pub(crate) fn initial_capacity(&self) -> NonZeroU64 {
        NonZeroU64::new(self.initial_capacity).unwrap_or(DEFAULT_CAPACITY)
    }

    /// The capacity that follows `capacity` when growing. Bigger than `capacity` unless it is
    /// already `u64::MAX`.
    pub(crate) fn grow(&self, capacity: u64) -> u64 {
        // Float to int casts saturate.
        let grown = (capacity as f64 * self.growth_factor).ceil() as u64;
        grown.max(capacity.saturating_add(1))
    }
}

#[cfg(test)]
mod test {
    use super::VboConfig;
    use crate::resource::UsageHint;

    #[test]
    fn grows_by_half() {
        let config = VboConfig::default();
        assert_eq!(config.grow(100), 150);
        assert_eq!(config.grow(1), 2);
        assert_eq!(config.grow(3), 5);
        assert_eq!(config.grow(u64::MAX - 1), u64::MAX);
        assert_eq!(config.grow(u64::MAX), u64::MAX);
    }

    #[test]
    fn rejects_shrinking_factor() {
        let config = VboConfig {
            growth_factor: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(VboConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json() {
        let config: VboConfig =
            serde_json::from_str(r#"{ "growth_factor": 2.0, "usage": "static_draw" }"#).unwrap();
        assert_eq!(config.growth_factor, 2.0);
        assert_eq!(config.usage, UsageHint::StaticDraw);
        assert_eq!(config.initial_capacity, 64 * 1024);
    }
}
