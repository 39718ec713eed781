//! Key ranges.

use std::cmp::Ordering;

use super::KeyData;
use crate::{Error, Result};

/// A contiguous interval of keys.
///
/// A missing bound is unbounded on that side and behaves as the matching
/// sentinel (`KeyData::Min` below, `KeyData::Max` above).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyRange {
    pub lower: Option<KeyData>,
    pub lower_open: bool,
    pub upper: Option<KeyData>,
    pub upper_open: bool,
}

impl KeyRange {
    /// Range covering every key.
    pub fn all() -> Self {
        Self::default()
    }

    /// Range matching exactly one key.
    pub fn only(key: impl Into<KeyData>) -> Self {
        let key = key.into();
        Self {
            lower: Some(key.clone()),
            lower_open: false,
            upper: Some(key),
            upper_open: false,
        }
    }

    /// Range between two keys.
    pub fn bound(
        lower: impl Into<KeyData>,
        upper: impl Into<KeyData>,
        lower_open: bool,
        upper_open: bool,
    ) -> Self {
        Self {
            lower: Some(lower.into()),
            lower_open,
            upper: Some(upper.into()),
            upper_open,
        }
    }

    /// Range of keys above `lower`.
    pub fn lower_bound(lower: impl Into<KeyData>, open: bool) -> Self {
        Self {
            lower: Some(lower.into()),
            lower_open: open,
            ..Self::default()
        }
    }

    /// Range of keys below `upper`.
    pub fn upper_bound(upper: impl Into<KeyData>, open: bool) -> Self {
        Self {
            upper: Some(upper.into()),
            upper_open: open,
            ..Self::default()
        }
    }

    /// Lower bound with the sentinel substituted for a missing one.
    pub fn effective_lower(&self) -> KeyData {
        self.lower.clone().unwrap_or(KeyData::Min)
    }

    /// Upper bound with the sentinel substituted for a missing one.
    pub fn effective_upper(&self) -> KeyData {
        self.upper.clone().unwrap_or(KeyData::Max)
    }

    /// Check if no key can fall inside this range.
    pub fn is_empty(&self) -> bool {
        let lower = self.lower.as_ref().unwrap_or(&KeyData::Min);
        let upper = self.upper.as_ref().unwrap_or(&KeyData::Max);

        match lower.compare(upper) {
            Ordering::Greater => true,
            Ordering::Equal => self.lower_open || self.upper_open,
            Ordering::Less => false,
        }
    }

    /// Check if `key` lies inside this range.
    pub fn contains(&self, key: &KeyData) -> bool {
        let above_lower = match &self.lower {
            None => true,
            Some(lower) => match key.compare(lower) {
                Ordering::Greater => true,
                Ordering::Equal => !self.lower_open,
                Ordering::Less => false,
            },
        };

        let below_upper = match &self.upper {
            None => true,
            Some(upper) => match key.compare(upper) {
                Ordering::Less => true,
                Ordering::Equal => !self.upper_open,
                Ordering::Greater => false,
            },
        };

        above_lower && below_upper
    }

    /// Validate bound keys and their order.
    pub fn validate(&self) -> Result<()> {
        if let Some(lower) = &self.lower {
            lower.validate_bound()?;
        }
        if let Some(upper) = &self.upper {
            upper.validate_bound()?;
        }

        if let (Some(lower), Some(upper)) = (&self.lower, &self.upper) {
            if lower.compare(upper) == Ordering::Greater {
                return Err(Error::InvalidKeyRange(format!(
                    "lower bound {} is greater than upper bound {}",
                    lower, upper
                )));
            }
        }

        Ok(())
    }
}
