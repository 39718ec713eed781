//! KeyData - totally ordered record keys.

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;

use crate::{Error, Result};

/// A record key.
///
/// Keys of different types order as
/// `Min < Number < Date < String < Binary < Array < Max`.
/// `Min` and `Max` are sentinels used for unbounded range edges; they are
/// never stored as record keys.
#[derive(Debug, Clone)]
pub enum KeyData {
    /// Sorts before every real key.
    Min,
    /// Numeric key. `-0.0` and `0.0` are the same key.
    Number(f64),
    /// Date key, milliseconds since the Unix epoch.
    Date(f64),
    /// String key, ordered by code point.
    String(String),
    /// Binary key, ordered bytewise.
    Binary(Bytes),
    /// Array key, ordered element by element, shorter prefix first.
    Array(Vec<KeyData>),
    /// Sorts after every real key.
    Max,
}

impl KeyData {
    /// Create a number key.
    pub fn number(value: f64) -> Self {
        KeyData::Number(value)
    }

    /// Create a date key.
    pub fn date(millis: f64) -> Self {
        KeyData::Date(millis)
    }

    /// Create a string key.
    pub fn string(value: impl Into<String>) -> Self {
        KeyData::String(value.into())
    }

    /// Create a binary key.
    pub fn binary(value: impl Into<Bytes>) -> Self {
        KeyData::Binary(value.into())
    }

    /// Create an array key.
    pub fn array(items: Vec<KeyData>) -> Self {
        KeyData::Array(items)
    }

    /// The minimum sentinel.
    pub fn minimum() -> Self {
        KeyData::Min
    }

    /// The maximum sentinel.
    pub fn maximum() -> Self {
        KeyData::Max
    }

    /// Check if this key is one of the two sentinels.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, KeyData::Min | KeyData::Max)
    }

    fn type_rank(&self) -> u8 {
        match self {
            KeyData::Min => 0,
            KeyData::Number(_) => 1,
            KeyData::Date(_) => 2,
            KeyData::String(_) => 3,
            KeyData::Binary(_) => 4,
            KeyData::Array(_) => 5,
            KeyData::Max => 6,
        }
    }

    /// Three-way comparison.
    pub fn compare(&self, other: &KeyData) -> Ordering {
        let (lhs, rhs) = (self.type_rank(), other.type_rank());
        if lhs != rhs {
            return lhs.cmp(&rhs);
        }

        match (self, other) {
            (KeyData::Number(a), KeyData::Number(b)) | (KeyData::Date(a), KeyData::Date(b)) => {
                compare_f64(*a, *b)
            }
            (KeyData::String(a), KeyData::String(b)) => a.cmp(b),
            (KeyData::Binary(a), KeyData::Binary(b)) => a.as_ref().cmp(b.as_ref()),
            (KeyData::Array(a), KeyData::Array(b)) => {
                for (l, r) in a.iter().zip(b.iter()) {
                    let ord = l.compare(r);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => Ordering::Equal,
        }
    }

    /// Validate this key for storage as a record or index key.
    pub fn validate(&self) -> Result<()> {
        self.check(false)
    }

    /// Validate this key as a range bound, where a top-level sentinel is allowed.
    pub(crate) fn validate_bound(&self) -> Result<()> {
        self.check(true)
    }

    fn check(&self, allow_sentinel: bool) -> Result<()> {
        match self {
            KeyData::Min | KeyData::Max if !allow_sentinel => {
                Err(Error::invalid_key("sentinel keys cannot be stored"))
            }
            KeyData::Number(v) | KeyData::Date(v) if v.is_nan() => {
                Err(Error::invalid_key("NaN is not a valid key"))
            }
            KeyData::Array(items) => items.iter().try_for_each(|item| item.check(false)),
            _ => Ok(()),
        }
    }
}

fn compare_f64(a: f64, b: f64) -> Ordering {
    if a == b {
        Ordering::Equal
    } else {
        a.total_cmp(&b)
    }
}

impl PartialEq for KeyData {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for KeyData {}

impl PartialOrd for KeyData {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyData {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl fmt::Display for KeyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyData::Min => write!(f, "<min>"),
            KeyData::Max => write!(f, "<max>"),
            KeyData::Number(v) => write!(f, "{}", v),
            KeyData::Date(v) => write!(f, "Date({})", v),
            KeyData::String(s) => write!(f, "{:?}", s),
            KeyData::Binary(b) => {
                write!(f, "0x")?;
                for byte in b.iter() {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            KeyData::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<f64> for KeyData {
    fn from(value: f64) -> Self {
        KeyData::Number(value)
    }
}

impl From<i64> for KeyData {
    fn from(value: i64) -> Self {
        KeyData::Number(value as f64)
    }
}

impl From<i32> for KeyData {
    fn from(value: i32) -> Self {
        KeyData::Number(f64::from(value))
    }
}

impl From<&str> for KeyData {
    fn from(value: &str) -> Self {
        KeyData::String(value.to_owned())
    }
}

impl From<String> for KeyData {
    fn from(value: String) -> Self {
        KeyData::String(value)
    }
}

impl From<Bytes> for KeyData {
    fn from(value: Bytes) -> Self {
        KeyData::Binary(value)
    }
}

impl From<Vec<KeyData>> for KeyData {
    fn from(items: Vec<KeyData>) -> Self {
        KeyData::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_ordering() {
        let ordered = [
            KeyData::Min,
            KeyData::number(1e9),
            KeyData::date(0.0),
            KeyData::string(""),
            KeyData::binary(Bytes::new()),
            KeyData::array(vec![]),
            KeyData::Max,
        ];

        for pair in ordered.windows(2) {
            assert_eq!(pair[0].compare(&pair[1]), Ordering::Less, "{} < {}", pair[0], pair[1]);
            assert_eq!(pair[1].compare(&pair[0]), Ordering::Greater);
        }
    }

    #[test]
    fn test_number_ordering() {
        assert!(KeyData::number(-5.0) < KeyData::number(-1.0));
        assert!(KeyData::number(-1.0) < KeyData::number(0.0));
        assert!(KeyData::number(2.5) < KeyData::number(3.0));
        assert!(KeyData::number(f64::NEG_INFINITY) < KeyData::number(f64::MIN));
        assert_eq!(KeyData::number(-0.0), KeyData::number(0.0));
    }

    #[test]
    fn test_string_and_binary_ordering() {
        assert!(KeyData::from("a") < KeyData::from("ab"));
        assert!(KeyData::from("ab") < KeyData::from("b"));
        assert!(KeyData::binary(vec![1u8, 2]) < KeyData::binary(vec![1u8, 3]));
        assert!(KeyData::binary(vec![1u8]) < KeyData::binary(vec![1u8, 0]));
    }

    #[test]
    fn test_array_ordering() {
        let short = KeyData::array(vec![KeyData::from(1i64)]);
        let long = KeyData::array(vec![KeyData::from(1i64), KeyData::from(0i64)]);
        let bigger = KeyData::array(vec![KeyData::from(2i64)]);

        assert!(short < long);
        assert!(long < bigger);
        assert_eq!(short.compare(&short.clone()), Ordering::Equal);
    }

    #[test]
    fn test_validate() {
        assert!(KeyData::from(1i64).validate().is_ok());
        assert!(KeyData::number(f64::NAN).validate().is_err());
        assert!(KeyData::Min.validate().is_err());
        assert!(KeyData::Max.validate_bound().is_ok());
        assert!(KeyData::array(vec![KeyData::Max]).validate_bound().is_err());
        assert!(KeyData::array(vec![KeyData::date(f64::NAN)]).validate().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(KeyData::from(3i64).to_string(), "3");
        assert_eq!(KeyData::from("x").to_string(), "\"x\"");
        assert_eq!(KeyData::binary(vec![0xabu8, 0x01]).to_string(), "0xab01");
        assert_eq!(
            KeyData::array(vec![KeyData::from(1i64), KeyData::from("a")]).to_string(),
            "[1, \"a\"]"
        );
    }
}
