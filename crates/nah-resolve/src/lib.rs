//! NAK version resolution.
//!
//! Given a version range and the candidates a catalog knows about, pick the
//! single highest version that satisfies the range. Resolution is a pure
//! function of the candidate *set*: order and exact duplicates in the input
//! never change the result.

pub mod catalog;

pub use catalog::{CatalogEntry, CatalogError, CatalogIndex, NakCatalog, StaticCatalog};

use nah_schema::{cmp_precedence, Digest, NakId, Version, VersionRange};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;
use tracing::debug;

/// One installable NAK build, as advertised by a catalog.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NakCandidate {
    pub nak_id: NakId,
    pub version: Version,
    /// `https://...` or `file:...` location of the NAK archive.
    pub source_uri: String,
    /// Blake3 digest of the whole archive.
    pub digest: Digest,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no candidate satisfies '{range}' ({considered} considered)")]
    NoMatch { range: String, considered: usize },
    #[error("ambiguous sources for version {version}: {}", sources.join(", "))]
    AmbiguousSources {
        version: String,
        sources: Vec<String>,
    },
}

/// Host-level allow and deny lists applied before selection.
///
/// A candidate survives when it matches at least one `allow` range (or
/// `allow` is empty) and no `deny` range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvePolicy {
    pub allow: Vec<VersionRange>,
    pub deny: Vec<VersionRange>,
}

impl ResolvePolicy {
    pub fn permits(&self, v: &Version) -> bool {
        (self.allow.is_empty() || self.allow.iter().any(|r| r.matches(v)))
            && !self.deny.iter().any(|r| r.matches(v))
    }
}

pub fn resolve(range: &VersionRange, candidates: &[NakCandidate]) -> Result<NakCandidate, ResolveError> {
    resolve_with_policy(range, candidates, &ResolvePolicy::default())
}

pub fn resolve_with_policy(
    range: &VersionRange,
    candidates: &[NakCandidate],
    policy: &ResolvePolicy,
) -> Result<NakCandidate, ResolveError> {
    let mut set: Vec<&NakCandidate> = candidates.iter().collect();
    set.sort();
    set.dedup();
    let considered = set.len();

    let satisfying: Vec<&NakCandidate> = set
        .into_iter()
        .filter(|c| range.matches(&c.version) && policy.permits(&c.version))
        .collect();

    let Some(best) = satisfying
        .iter()
        .copied()
        .max_by(|a, b| cmp_precedence(&a.version, &b.version))
    else {
        return Err(ResolveError::NoMatch {
            range: range.to_string(),
            considered,
        });
    };

    let tied: Vec<&NakCandidate> = satisfying
        .iter()
        .copied()
        .filter(|c| cmp_precedence(&c.version, &best.version) == Ordering::Equal)
        .collect();
    if tied.len() > 1 {
        return Err(ResolveError::AmbiguousSources {
            version: best.version.to_string(),
            sources: tied
                .iter()
                .map(|c| format!("{}@{} ({})", c.source_uri, c.version, c.digest.short()))
                .collect(),
        });
    }

    debug!(
        "resolved {} '{range}' -> {} from {} candidates",
        best.nak_id, best.version, considered
    );
    Ok(best.clone())
}
