//! Migration versions.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{MigrateResult, MigrationError};

#[derive(Debug, Clone)]
enum Repr {
    Empty,
    Current,
    Concrete { parts: Vec<BigUint>, display: String },
    Latest,
}

/// A dotted version such as `1`, `1.2` or `2024.01.15.3`.
///
/// Parts are arbitrary-precision integers; trailing zero parts are
/// insignificant, so `1.2` and `1.2.0` are equal. Three sentinels exist:
/// [`EMPTY`](Self::EMPTY) sorts before everything, [`LATEST`](Self::LATEST)
/// after everything, and [`CURRENT`](Self::CURRENT) stands for "whatever is
/// applied now" and is replaced by a concrete version before states are
/// computed. For a total order it sorts between `EMPTY` and every concrete
/// version.
#[derive(Debug, Clone)]
pub struct MigrationVersion(Repr);

impl MigrationVersion {
    /// The version of an empty schema.
    pub const EMPTY: MigrationVersion = MigrationVersion(Repr::Empty);
    /// Greater than every concrete version.
    pub const LATEST: MigrationVersion = MigrationVersion(Repr::Latest);
    /// The currently applied version.
    pub const CURRENT: MigrationVersion = MigrationVersion(Repr::Current);

    /// Parse a version string.
    ///
    /// `current` (any case) maps to [`CURRENT`](Self::CURRENT); `latest` and
    /// the decimal value of `i64::MAX` map to [`LATEST`](Self::LATEST).
    pub fn parse(text: &str) -> MigrateResult<Self> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("current") {
            return Ok(Self::CURRENT);
        }
        if trimmed.eq_ignore_ascii_case("latest") || trimmed == i64::MAX.to_string() {
            return Ok(Self::LATEST);
        }

        let normalized = trimmed.replace('_', ".");
        let mut parts = normalized
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(MigrationError::InvalidVersion(text.to_string()));
                }
                BigUint::from_str(part).map_err(|_| MigrationError::InvalidVersion(text.to_string()))
            })
            .collect::<MigrateResult<Vec<_>>>()?;

        while parts.len() > 1 && parts.last().is_some_and(|p| *p == BigUint::ZERO) {
            parts.pop();
        }

        Ok(Self(Repr::Concrete {
            parts,
            display: normalized,
        }))
    }

    /// Parse an optional version, where `None` or an empty string means no
    /// version.
    pub fn parse_optional(text: Option<&str>) -> MigrateResult<Option<Self>> {
        match text.map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => Self::parse(value).map(Some),
        }
    }

    /// The version text, `None` for [`EMPTY`](Self::EMPTY).
    pub fn version(&self) -> Option<String> {
        match &self.0 {
            Repr::Empty => None,
            Repr::Current => Some("current".to_string()),
            Repr::Concrete { display, .. } => Some(display.clone()),
            Repr::Latest => Some(i64::MAX.to_string()),
        }
    }

    /// Whether this is a concrete version rather than a sentinel.
    pub fn is_concrete(&self) -> bool {
        matches!(self.0, Repr::Concrete { .. })
    }

    /// Whether this is [`CURRENT`](Self::CURRENT).
    pub fn is_current(&self) -> bool {
        matches!(self.0, Repr::Current)
    }

    /// Whether this is [`LATEST`](Self::LATEST).
    pub fn is_latest(&self) -> bool {
        matches!(self.0, Repr::Latest)
    }

    /// `self >= other`.
    pub fn is_at_least(&self, other: &MigrationVersion) -> bool {
        self >= other
    }

    /// `self > other`.
    pub fn is_newer_than(&self, other: &MigrationVersion) -> bool {
        self > other
    }

    /// Whether the first part of `self` is greater than that of `other`.
    pub fn is_major_newer_than(&self, other: &MigrationVersion) -> bool {
        match (&self.0, &other.0) {
            (Repr::Concrete { parts: a, .. }, Repr::Concrete { parts: b, .. }) => a[0] > b[0],
            _ => self > other,
        }
    }

    fn rank(&self) -> u8 {
        match self.0 {
            Repr::Empty => 0,
            Repr::Current => 1,
            Repr::Concrete { .. } => 2,
            Repr::Latest => 3,
        }
    }
}

impl Ord for MigrationVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (Repr::Concrete { parts: a, .. }, Repr::Concrete { parts: b, .. }) => {
                let zero = BigUint::ZERO;
                let len = a.len().max(b.len());
                for idx in 0..len {
                    let left = a.get(idx).unwrap_or(&zero);
                    let right = b.get(idx).unwrap_or(&zero);
                    match left.cmp(right) {
                        Ordering::Equal => continue,
                        unequal => return unequal,
                    }
                }
                Ordering::Equal
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for MigrationVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MigrationVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MigrationVersion {}

impl Hash for MigrationVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        if let Repr::Concrete { parts, .. } = &self.0 {
            parts.hash(state);
        }
    }
}

impl FromStr for MigrationVersion {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MigrationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Empty => f.write_str("<< Empty Schema >>"),
            Repr::Current => f.write_str("<< Current Version >>"),
            Repr::Concrete { display, .. } => f.write_str(display),
            Repr::Latest => f.write_str("<< Latest Version >>"),
        }
    }
}

impl Serialize for MigrationVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.version() {
            Some(version) => serializer.serialize_str(&version),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for MigrationVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> MigrationVersion {
        MigrationVersion::parse(s).unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(v("1.2.3").to_string(), "1.2.3");
        assert_eq!(v("1_2_3").to_string(), "1.2.3");
        assert_eq!(v("1.2.0").version().as_deref(), Some("1.2.0"));
    }

    #[test]
    fn test_trailing_zeros_are_insignificant() {
        assert_eq!(v("1.2"), v("1.2.0"));
        assert_eq!(v("1"), v("1.0.0"));
        assert_eq!(v("0"), v("0.0"));
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(v("1.10") > v("1.9"));
        assert!(v("2") > v("1.999"));
        assert!(v("1.0.1") > v("1"));
        assert!(v("20240101120000") > v("20231231235959"));
    }

    #[test]
    fn test_big_parts() {
        assert!(v("99999999999999999999999") > v("99999999999999999999998"));
    }

    #[test]
    fn test_invalid_versions() {
        assert!(matches!(
            MigrationVersion::parse("1.a"),
            Err(MigrationError::InvalidVersion(s)) if s == "1.a"
        ));
        assert!(MigrationVersion::parse("1..2").is_err());
        assert!(MigrationVersion::parse("").is_err());
        assert!(MigrationVersion::parse("-1").is_err());
    }

    #[test]
    fn test_sentinels() {
        assert!(v("current").is_current());
        assert!(v("LATEST").is_latest());
        assert!(v(&i64::MAX.to_string()).is_latest());
        assert!(MigrationVersion::EMPTY < MigrationVersion::CURRENT);
        assert!(MigrationVersion::CURRENT < v("0"));
        assert!(v("999999") < MigrationVersion::LATEST);
        assert_eq!(MigrationVersion::EMPTY.version(), None);
    }

    #[test]
    fn test_order_is_antisymmetric_and_transitive() {
        let versions = [
            MigrationVersion::EMPTY,
            MigrationVersion::CURRENT,
            v("0"),
            v("1"),
            v("1.0.1"),
            v("1.1"),
            v("1.10"),
            v("2"),
            MigrationVersion::LATEST,
        ];
        for a in &versions {
            for b in &versions {
                assert_eq!(a.cmp(b), b.cmp(a).reverse());
                for c in &versions {
                    if a <= b && b <= c {
                        assert!(a <= c);
                    }
                }
            }
        }
    }

    #[test]
    fn test_major_newer() {
        assert!(v("2.0").is_major_newer_than(&v("1.9")));
        assert!(!v("1.9").is_major_newer_than(&v("1.1")));
    }

    #[test]
    fn test_parse_optional() {
        assert_eq!(MigrationVersion::parse_optional(None).unwrap(), None);
        assert_eq!(MigrationVersion::parse_optional(Some(" ")).unwrap(), None);
        assert_eq!(MigrationVersion::parse_optional(Some("3")).unwrap(), Some(v("3")));
    }

    #[test]
    fn test_hash_agrees_with_eq() {
        use std::collections::HashSet;
        let set: HashSet<_> = [v("1.2"), v("1.2.0")].into_iter().collect();
        assert_eq!(set.len(), 1);
    }
}
