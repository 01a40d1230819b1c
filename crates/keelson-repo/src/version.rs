//! Chart version constraints
//!
//! Chart versions follow semver, but constraints are written the way chart
//! authors write them: an exact version pins, an empty constraint means the
//! latest stable release, and `>0.0.0-0` admits pre-releases.

use semver::{Version, VersionReq};
use std::fmt;

use crate::error::{RepoError, Result};

/// Constraint requested when development versions are allowed and no version is given
pub const DEVEL_CONSTRAINT: &str = ">0.0.0-0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Highest stable version
    Latest,
    /// Highest version, pre-releases included
    AnyIncludingPrerelease,
    /// Exactly this version
    Exact(Version),
    /// A semver range
    Range(VersionReq),
}

impl VersionConstraint {
    pub fn parse(constraint: &str) -> Result<Self> {
        let constraint = constraint.trim();
        if constraint.is_empty() || constraint == "*" {
            return Ok(Self::Latest);
        }
        if constraint == DEVEL_CONSTRAINT {
            return Ok(Self::AnyIncludingPrerelease);
        }
        if let Ok(version) = parse_version(constraint) {
            return Ok(Self::Exact(version));
        }
        if constraint.contains("||") {
            return Err(RepoError::InvalidConstraint {
                constraint: constraint.to_string(),
                message: "alternative ranges (||) are not supported".to_string(),
            });
        }

        VersionReq::parse(&normalize_range(constraint))
            .map(Self::Range)
            .map_err(|e| RepoError::InvalidConstraint {
                constraint: constraint.to_string(),
                message: e.to_string(),
            })
    }

    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Latest => version.pre.is_empty(),
            Self::AnyIncludingPrerelease => true,
            Self::Exact(wanted) => {
                wanted.major == version.major
                    && wanted.minor == version.minor
                    && wanted.patch == version.patch
                    && wanted.pre == version.pre
            }
            Self::Range(req) => req.matches(version),
        }
    }

    /// Pick the highest matching version
    pub fn best_match<'a, I>(&self, candidates: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        candidates
            .into_iter()
            .filter_map(|raw| parse_version(raw).ok().map(|v| (v, raw)))
            .filter(|(v, _)| self.matches(v))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, raw)| raw)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::AnyIncludingPrerelease => write!(f, "{DEVEL_CONSTRAINT}"),
            Self::Exact(v) => write!(f, "{v}"),
            Self::Range(req) => write!(f, "{req}"),
        }
    }
}

/// Parse a chart version, tolerating a leading `v` and missing minor/patch parts
pub fn parse_version(raw: &str) -> std::result::Result<Version, semver::Error> {
    let raw = raw.trim();
    let raw = raw.strip_prefix('v').unwrap_or(raw);
    match Version::parse(raw) {
        Ok(version) => Ok(version),
        Err(err) => {
            let core_len = raw.find(['-', '+']).unwrap_or(raw.len());
            let (core, rest) = raw.split_at(core_len);
            let parts = core.split('.').count();
            if parts >= 3 || !core.split('.').all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit())) {
                return Err(err);
            }
            let padded = format!("{core}{}{rest}", ".0".repeat(3 - parts));
            Version::parse(&padded)
        }
    }
}

/// Turn space separated comparators (`>=1.0 <2.0`) into semver's comma form
fn normalize_range(constraint: &str) -> String {
    if constraint.contains(',') {
        return constraint.to_string();
    }

    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op = String::new();
    for token in constraint.split_whitespace() {
        if token.chars().all(|c| "<>=~^!".contains(c)) {
            pending_op.push_str(token);
            continue;
        }
        comparators.push(format!("{}{}", std::mem::take(&mut pending_op), token));
    }
    comparators.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_latest_skips_prereleases() {
        let c = VersionConstraint::parse("").unwrap();
        assert_eq!(c, VersionConstraint::Latest);
        assert!(c.matches(&v("1.0.0")));
        assert!(!c.matches(&v("2.0.0-rc.1")));
    }

    #[test]
    fn test_devel_includes_prereleases() {
        let c = VersionConstraint::parse(DEVEL_CONSTRAINT).unwrap();
        assert!(c.matches(&v("2.0.0-rc.1")));
        assert_eq!(
            c.best_match(["1.0.0", "2.0.0-rc.1", "1.5.0"]),
            Some("2.0.0-rc.1")
        );
    }

    #[test]
    fn test_exact_version_pins() {
        let c = VersionConstraint::parse("1.2.3").unwrap();
        assert!(c.matches(&v("1.2.3")));
        assert!(!c.matches(&v("1.2.4")));

        let c = VersionConstraint::parse("v1.2").unwrap();
        assert_eq!(c, VersionConstraint::Exact(v("1.2.0")));
    }

    #[test]
    fn test_space_separated_range() {
        let c = VersionConstraint::parse(">= 1.0.0 < 2.0.0").unwrap();
        assert!(c.matches(&v("1.9.0")));
        assert!(!c.matches(&v("2.0.0")));
        assert_eq!(c.best_match(["0.9.0", "1.1.0", "1.4.2", "2.1.0"]), Some("1.4.2"));
    }

    #[test]
    fn test_rejects_alternatives() {
        assert!(VersionConstraint::parse("^1.0 || ^2.0").is_err());
    }

    #[test]
    fn test_parse_version_padding() {
        assert_eq!(parse_version("1").unwrap(), v("1.0.0"));
        assert_eq!(parse_version("1.2-beta").unwrap(), v("1.2.0-beta"));
        assert!(parse_version("latest").is_err());
    }
}
