//! Storage generation ("instance") identifiers

use serde::{Deserialize, Serialize};

/// One of the two interchangeable storage generations
///
/// Persisted as a byte; any value other than 0 or 1 is rejected on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Instance {
    Zero,
    One,
}

impl Instance {
    /// The generation that is not `self`
    pub fn other(self) -> Self {
        match self {
            Instance::Zero => Instance::One,
            Instance::One => Instance::Zero,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Instance::Zero => 0,
            Instance::One => 1,
        }
    }

    /// Table name suffix of this generation's collections
    pub fn suffix(self) -> &'static str {
        match self {
            Instance::Zero => "0",
            Instance::One => "1",
        }
    }
}

impl TryFrom<u8> for Instance {
    type Error = crate::Error;

    fn try_from(value: u8) -> crate::Result<Self> {
        match value {
            0 => Ok(Instance::Zero),
            1 => Ok(Instance::One),
            other => Err(crate::Error::InvalidInput(format!(
                "instance must be 0 or 1, got {}",
                other
            ))),
        }
    }
}

impl TryFrom<i64> for Instance {
    type Error = crate::Error;

    fn try_from(value: i64) -> crate::Result<Self> {
        u8::try_from(value)
            .map_err(|_| crate::Error::InvalidInput(format!("instance must be 0 or 1, got {}", value)))
            .and_then(|byte: u8| Instance::try_from(byte))
    }
}

impl From<Instance> for u8 {
    fn from(instance: Instance) -> u8 {
        instance.as_u8()
    }
}

impl std::fmt::Display for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_other_flips() {
        assert_eq!(Instance::Zero.other(), Instance::One);
        assert_eq!(Instance::One.other(), Instance::Zero);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Instance::try_from(2u8).is_err());
        assert!(Instance::try_from(-1i64).is_err());
        assert_eq!(Instance::try_from(1i64).unwrap(), Instance::One);
        assert!(serde_json::from_str::<Instance>("3").is_err());
        assert_eq!(serde_json::to_string(&Instance::One).unwrap(), "1");
    }
}
