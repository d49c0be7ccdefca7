//! Semantic versions and version range constraints.
//!
//! Versions are [`semver::Version`]. Ranges use the npm-style grammar the
//! manifest format has always accepted:
//!
//! - `||` separates alternatives; a version satisfies the range when it
//!   satisfies any alternative.
//! - Inside an alternative, whitespace-separated comparators are ANDed:
//!   `>=1.2.0 <2.0.0`.
//! - Comparators: `=`, `>`, `>=`, `<`, `<=`, or a bare version (exact).
//! - `^1.2.3` expands to `>=1.2.3 <2.0.0` (`^0.2.3` to `<0.3.0`, `^0.0.3`
//!   to `=0.0.3`); `~1.2.3` expands to `>=1.2.3 <1.3.0`.
//! - `*`, `1.x`, `1.2.x` are wildcard ranges.
//!
//! Comparisons use semver precedence, which ignores build metadata.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

pub use semver::Version;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("invalid version '{value}': {reason}")]
    InvalidVersion { value: String, reason: String },
    #[error("invalid version range '{range}': {reason}")]
    InvalidRange { range: String, reason: String },
}

pub fn parse_version(s: &str) -> Result<Version, VersionError> {
    Version::parse(s.trim()).map_err(|e| VersionError::InvalidVersion {
        value: s.to_owned(),
        reason: e.to_string(),
    })
}

/// Compare two versions by semver precedence (build metadata ignored).
pub fn cmp_precedence(a: &Version, b: &Version) -> Ordering {
    a.major
        .cmp(&b.major)
        .then(a.minor.cmp(&b.minor))
        .then(a.patch.cmp(&b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparator {
    pub op: Op,
    pub version: Version,
}

impl Comparator {
    fn new(op: Op, version: Version) -> Self {
        Self { op, version }
    }

    pub fn matches(&self, v: &Version) -> bool {
        let ord = cmp_precedence(v, &self.version);
        match self.op {
            Op::Eq => ord == Ordering::Equal,
            Op::Gt => ord == Ordering::Greater,
            Op::Ge => ord != Ordering::Less,
            Op::Lt => ord == Ordering::Less,
            Op::Le => ord != Ordering::Greater,
        }
    }
}

/// A parsed version range. The original text is kept for display and
/// serialization, so a range round-trips byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    raw: String,
    alternatives: Vec<Vec<Comparator>>,
}

impl VersionRange {
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let raw = input.trim();
        let invalid = |reason: &str| VersionError::InvalidRange {
            range: input.to_owned(),
            reason: reason.to_owned(),
        };
        if raw.is_empty() {
            return Err(invalid("empty range"));
        }

        let mut alternatives = Vec::new();
        for alt in raw.split("||") {
            let alt = alt.trim();
            if alt.is_empty() {
                return Err(invalid("empty alternative"));
            }
            let mut set = Vec::new();
            for token in alt.split_whitespace() {
                parse_token(token, &mut set).map_err(|reason| invalid(&reason))?;
            }
            alternatives.push(set);
        }

        Ok(Self {
            raw: raw.to_owned(),
            alternatives,
        })
    }

    pub fn matches(&self, v: &Version) -> bool {
        self.alternatives
            .iter()
            .any(|set| set.iter().all(|c| c.matches(v)))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn alternatives(&self) -> &[Vec<Comparator>] {
        &self.alternatives
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for VersionRange {
    type Err = VersionError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionRange {
    type Error = VersionError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<VersionRange> for String {
    fn from(r: VersionRange) -> String {
        r.raw
    }
}

fn parse_token(token: &str, set: &mut Vec<Comparator>) -> Result<(), String> {
    if let Some(rest) = token.strip_prefix('^') {
        let v = parse_exact(rest)?;
        let upper = match (v.major, v.minor) {
            (0, 0) => {
                set.push(Comparator::new(Op::Eq, v));
                return Ok(());
            }
            (0, minor) => Version::new(0, bump(minor, token)?, 0),
            (major, _) => Version::new(bump(major, token)?, 0, 0),
        };
        set.push(Comparator::new(Op::Ge, v));
        set.push(Comparator::new(Op::Lt, upper));
        return Ok(());
    }
    if let Some(rest) = token.strip_prefix('~') {
        let v = parse_exact(rest)?;
        let upper = Version::new(v.major, bump(v.minor, token)?, 0);
        set.push(Comparator::new(Op::Ge, v));
        set.push(Comparator::new(Op::Lt, upper));
        return Ok(());
    }
    if let Some(wild) = parse_wildcard(token)? {
        set.extend(wild);
        return Ok(());
    }

    let (op, rest) = if let Some(r) = token.strip_prefix(">=") {
        (Op::Ge, r)
    } else if let Some(r) = token.strip_prefix("<=") {
        (Op::Le, r)
    } else if let Some(r) = token.strip_prefix('>') {
        (Op::Gt, r)
    } else if let Some(r) = token.strip_prefix('<') {
        (Op::Lt, r)
    } else if let Some(r) = token.strip_prefix('=') {
        (Op::Eq, r)
    } else {
        (Op::Eq, token)
    };
    set.push(Comparator::new(op, parse_exact(rest)?));
    Ok(())
}

fn parse_exact(s: &str) -> Result<Version, String> {
    if s.is_empty() {
        return Err("comparator without a version".to_owned());
    }
    Version::parse(s).map_err(|e| format!("'{s}': {e}"))
}

/// `*`, `x`, `1`, `1.x`, `1.*`, `1.2.x`. Returns `None` when the token is
/// not a wildcard form.
fn parse_wildcard(token: &str) -> Result<Option<Vec<Comparator>>, String> {
    let is_wild = |p: &str| matches!(p, "x" | "X" | "*");
    if is_wild(token) {
        return Ok(Some(Vec::new()));
    }
    let parts: Vec<&str> = token.split('.').collect();
    let num = |p: &str| p.parse::<u64>().map_err(|_| format!("'{token}': bad number '{p}'"));
    match parts.as_slice() {
        [major] if major.chars().all(|c| c.is_ascii_digit()) => {
            Ok(Some(major_range(num(major)?, token)?))
        }
        [major, minor] if is_wild(minor) => Ok(Some(major_range(num(major)?, token)?)),
        [major, minor, rest @ ..] if is_wild(minor) && rest.iter().all(|p| is_wild(p)) => {
            Ok(Some(major_range(num(major)?, token)?))
        }
        [major, minor, patch] if is_wild(patch) => {
            let (m, n) = (num(major)?, num(minor)?);
            Ok(Some(vec![
                Comparator::new(Op::Ge, Version::new(m, n, 0)),
                Comparator::new(Op::Lt, Version::new(m, bump(n, token)?, 0)),
            ]))
        }
        _ => Ok(None),
    }
}

fn major_range(m: u64, token: &str) -> Result<Vec<Comparator>, String> {
    Ok(vec![
        Comparator::new(Op::Ge, Version::new(m, 0, 0)),
        Comparator::new(Op::Lt, Version::new(bump(m, token)?, 0, 0)),
    ])
}

/// Next component for an exclusive upper bound.
fn bump(n: u64, token: &str) -> Result<u64, String> {
    n.checked_add(1)
        .ok_or_else(|| format!("'{token}': upper bound overflows"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn r(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    #[test]
    fn caret_range() {
        let range = r("^1.2.0");
        assert!(range.matches(&v("1.2.0")));
        assert!(range.matches(&v("1.9.9")));
        assert!(!range.matches(&v("2.0.0")));
        assert!(!range.matches(&v("1.1.9")));
    }

    #[test]
    fn caret_zero_major() {
        assert!(r("^0.2.3").matches(&v("0.2.9")));
        assert!(!r("^0.2.3").matches(&v("0.3.0")));
        assert!(r("^0.0.3").matches(&v("0.0.3")));
        assert!(!r("^0.0.3").matches(&v("0.0.4")));
    }

    #[test]
    fn overflowing_upper_bounds_are_rejected() {
        let max = u64::MAX;
        for range in [
            format!("^0.{max}.0"),
            format!("^{max}.0.0"),
            format!("~1.{max}.0"),
            format!("{max}.x"),
            format!("{max}"),
            format!("1.{max}.x"),
        ] {
            assert!(
                matches!(
                    VersionRange::parse(&range),
                    Err(VersionError::InvalidRange { .. })
                ),
                "{range}"
            );
        }
        assert!(VersionRange::parse(&format!(">={max}.0.0")).is_ok());
    }

    #[test]
    fn tilde_range() {
        let range = r("~1.2.0");
        assert!(range.matches(&v("1.2.5")));
        assert!(!range.matches(&v("1.3.0")));
    }

    #[test]
    fn bare_version_is_exact() {
        let range = r("1.2.3");
        assert!(range.matches(&v("1.2.3")));
        assert!(!range.matches(&v("1.2.4")));
    }

    #[test]
    fn and_comparators() {
        let range = r(">=1.0.0 <1.5.0");
        assert!(range.matches(&v("1.4.9")));
        assert!(!range.matches(&v("1.5.0")));
        assert!(!range.matches(&v("0.9.0")));
    }

    #[test]
    fn or_alternatives() {
        let range = r("^1.0.0 || >=3.0.0");
        assert!(range.matches(&v("1.1.0")));
        assert!(!range.matches(&v("2.0.0")));
        assert!(range.matches(&v("3.2.0")));
    }

    #[test]
    fn wildcards() {
        assert!(r("*").matches(&v("9.9.9")));
        assert!(r("1.x").matches(&v("1.7.0")));
        assert!(!r("1.x").matches(&v("2.0.0")));
        assert!(r("1.2.x").matches(&v("1.2.7")));
        assert!(!r("1.2.x").matches(&v("1.3.0")));
        assert!(r("2").matches(&v("2.4.0")));
    }

    #[test]
    fn build_metadata_ignored() {
        assert!(r("=1.0.0").matches(&v("1.0.0+build.7")));
        assert_eq!(
            cmp_precedence(&v("1.0.0+a"), &v("1.0.0+b")),
            Ordering::Equal
        );
    }

    #[test]
    fn prerelease_precedence() {
        assert_eq!(
            cmp_precedence(&v("1.0.0-alpha"), &v("1.0.0")),
            Ordering::Less
        );
        assert_eq!(
            cmp_precedence(&v("1.0.0-alpha.1"), &v("1.0.0-alpha.beta")),
            Ordering::Less
        );
        assert_eq!(
            cmp_precedence(&v("1.0.0-rc.1"), &v("1.0.0-beta.11")),
            Ordering::Greater
        );
    }

    #[test]
    fn invalid_ranges_rejected() {
        assert!(VersionRange::parse("").is_err());
        assert!(VersionRange::parse("^").is_err());
        assert!(VersionRange::parse(">=abc").is_err());
        assert!(VersionRange::parse("1.0.0 ||").is_err());
        assert!(VersionRange::parse("1.2").is_err());
    }

    #[test]
    fn display_and_serde_keep_raw_text() {
        let range = r(">=1.0.0 <2.0.0");
        assert_eq!(range.to_string(), ">=1.0.0 <2.0.0");
        let json = serde_json::to_string(&range).unwrap();
        assert_eq!(json, "\">=1.0.0 <2.0.0\"");
        let back: VersionRange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, range);
    }

    #[test]
    fn parse_version_reports_value() {
        let err = parse_version("one.two").unwrap_err();
        assert!(err.to_string().contains("one.two"));
    }
}
