//! Query language for conda packages.
//!
//! A [`MatchSpec`] is, fundamentally, a query language for conda packages.
//! Any of the fields that comprise a [`crate::PackageRecord`] can be used to
//! compose a [`MatchSpec`]: the package name, a version spec, a build string
//! glob, a channel, checksums, and so on. All fields that are present must
//! match for a record to match the spec.
//!
//! The canonical string representation of a match spec is
//!
//! ```text
//! (channel(/subdir)::)name( version( build))([key1=value1,key2=value2])
//! ```
//!
//! where `()` indicate optional parts. Keyword values inside the bracket
//! section override any conflicting information given in the positional
//! parts.

use std::{
    collections::BTreeSet,
    fmt::{Debug, Display, Formatter},
    hash::Hash,
    str::FromStr,
};

use itertools::Itertools;
use krait_digest::{serde::SerializableHash, Md5Hash, Sha256Hash};
use serde::Serialize;
use serde_with::{serde_as, skip_serializing_none};
use url::Url;

/// Match a build string either exactly, by glob or by regex.
pub mod build_matcher;
/// Parse a match spec from a string.
pub mod parse;

use build_matcher::BuildMatcher;
pub use parse::ParseMatchSpecError;

use crate::{
    build_spec::BuildNumberSpec, GenericVirtualPackage, InvalidPackageNameError, PackageName,
    PackageRecord, PrefixRecord, RepoDataRecord, VersionSpec,
};

/// Matches a package name either exactly or by glob.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum NameMatcher {
    /// Match the normalized package name exactly.
    Exact(PackageName),
    /// Match the package name by glob. `*` matches any package.
    Glob(glob::Pattern),
}

impl NameMatcher {
    /// Returns whether the given package name matches.
    pub fn matches(&self, name: &PackageName) -> bool {
        match self {
            NameMatcher::Exact(exact) => exact == name,
            NameMatcher::Glob(pattern) => pattern.matches(name.as_normalized()),
        }
    }

    /// Returns the package name when this matcher matches exactly one name.
    pub fn as_exact(&self) -> Option<&PackageName> {
        match self {
            NameMatcher::Exact(name) => Some(name),
            NameMatcher::Glob(_) => None,
        }
    }
}

impl FromStr for NameMatcher {
    type Err = InvalidPackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('*') {
            let pattern = glob::Pattern::new(&s.to_ascii_lowercase())
                .map_err(|_| InvalidPackageNameError::InvalidCharacters(s.to_string()))?;
            Ok(NameMatcher::Glob(pattern))
        } else {
            Ok(NameMatcher::Exact(s.parse()?))
        }
    }
}

impl Display for NameMatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NameMatcher::Exact(name) => write!(f, "{}", name.as_normalized()),
            NameMatcher::Glob(pattern) => write!(f, "{}", pattern.as_str()),
        }
    }
}

impl From<PackageName> for NameMatcher {
    fn from(value: PackageName) -> Self {
        NameMatcher::Exact(value)
    }
}

impl Serialize for NameMatcher {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// A query over the fields of a [`PackageRecord`]. All fields that are
/// present must match.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Default, Clone, Serialize, Eq, PartialEq, Hash)]
pub struct MatchSpec {
    /// The name of the package. `None` only occurs while assembling a spec;
    /// a parsed spec always carries a name matcher.
    pub name: Option<NameMatcher>,
    /// The version spec of the package (e.g. `1.2.3`, `>=1.2.3`, `1.2.*`).
    pub version: Option<VersionSpec>,
    /// The build string of the package (e.g. `py37_0`, `py*`).
    pub build: Option<BuildMatcher>,
    /// The build number of the package.
    pub build_number: Option<BuildNumberSpec>,
    /// Match the specific filename of the package.
    pub file_name: Option<String>,
    /// The canonical name (or sanitized url) of the channel the package must
    /// come from.
    pub channel: Option<String>,
    /// The subdir of the channel.
    pub subdir: Option<String>,
    /// The md5 hash of the package.
    #[serde_as(as = "Option<SerializableHash::<krait_digest::Md5>>")]
    pub md5: Option<Md5Hash>,
    /// The sha256 hash of the package.
    #[serde_as(as = "Option<SerializableHash::<krait_digest::Sha256>>")]
    pub sha256: Option<Sha256Hash>,
    /// The url of the package.
    pub url: Option<Url>,
    /// The license of the package.
    pub license: Option<String>,
    /// The license family of the package.
    pub license_family: Option<String>,
    /// The features of the package that must be present.
    pub features: Option<BTreeSet<String>>,
    /// The track features of the package that must be present.
    pub track_features: Option<BTreeSet<String>>,
}

impl MatchSpec {
    /// Returns the exact package name when this spec carries one.
    pub fn exact_name(&self) -> Option<&PackageName> {
        self.name.as_ref().and_then(NameMatcher::as_exact)
    }

    /// Returns whether this spec refers to a virtual package, determined by
    /// the package name starting with `__`.
    pub fn is_virtual(&self) -> bool {
        match &self.name {
            Some(NameMatcher::Exact(name)) => name.is_virtual(),
            Some(NameMatcher::Glob(pattern)) => pattern.as_str().starts_with("__"),
            None => false,
        }
    }

    /// Merges this spec with a number of other specs into a spec that only
    /// matches records matched by all the input specs.
    ///
    /// Version and build-number constraints are combined with a logical AND;
    /// the result may be unsatisfiable but is still well formed, which is
    /// what the solver wants for diagnostics. Scalar fields (channel, subdir,
    /// filename, checksums, ...) must agree, differing values are a merge
    /// error.
    pub fn merge<'a>(
        specs: impl IntoIterator<Item = &'a MatchSpec>,
    ) -> Result<MatchSpec, MergeMatchSpecError> {
        let mut specs = specs.into_iter();
        let mut merged = specs.next().ok_or(MergeMatchSpecError::NoSpecs)?.clone();

        for spec in specs {
            if merged.name != spec.name {
                return Err(MergeMatchSpecError::IncompatibleField {
                    field: "name",
                    left: merged.name.map(|n| n.to_string()).unwrap_or_default(),
                    right: spec.name.clone().map(|n| n.to_string()).unwrap_or_default(),
                });
            }

            merged.version = merge_version_specs(merged.version.take(), spec.version.clone());
            merged.build = merge_scalar("build", merged.build.take(), spec.build.clone())?;
            merged.build_number = merge_scalar(
                "build_number",
                merged.build_number.take(),
                spec.build_number.clone(),
            )?;
            merged.file_name =
                merge_scalar("fn", merged.file_name.take(), spec.file_name.clone())?;
            merged.channel = merge_scalar("channel", merged.channel.take(), spec.channel.clone())?;
            merged.subdir = merge_scalar("subdir", merged.subdir.take(), spec.subdir.clone())?;
            merged.md5 = merge_scalar("md5", merged.md5.take(), spec.md5)?;
            merged.sha256 = merge_scalar("sha256", merged.sha256.take(), spec.sha256)?;
            merged.url = merge_scalar("url", merged.url.take(), spec.url.clone())?;
            merged.license = merge_scalar("license", merged.license.take(), spec.license.clone())?;
            merged.license_family = merge_scalar(
                "license_family",
                merged.license_family.take(),
                spec.license_family.clone(),
            )?;

            // A record has to carry the features required by every spec, so
            // the requirement sets union.
            merged.features = merge_sets(merged.features.take(), spec.features.clone());
            merged.track_features =
                merge_sets(merged.track_features.take(), spec.track_features.clone());
        }

        Ok(merged)
    }
}

/// Combines two optional version specs into one that matches only versions
/// matched by both.
fn merge_version_specs(a: Option<VersionSpec>, b: Option<VersionSpec>) -> Option<VersionSpec> {
    use crate::version_spec::LogicalOperator;
    match (a, b) {
        (None, b) => b,
        (a, None) => a,
        (Some(a), Some(b)) if a == b => Some(a),
        (Some(VersionSpec::Group(LogicalOperator::And, mut group)), Some(b)) => {
            group.push(b);
            Some(VersionSpec::Group(LogicalOperator::And, group))
        }
        (Some(a), Some(b)) => Some(VersionSpec::Group(LogicalOperator::And, vec![a, b])),
    }
}

fn merge_scalar<T: PartialEq + Debug>(
    field: &'static str,
    a: Option<T>,
    b: Option<T>,
) -> Result<Option<T>, MergeMatchSpecError> {
    match (a, b) {
        (None, b) => Ok(b),
        (a, None) => Ok(a),
        (Some(a), Some(b)) if a == b => Ok(Some(a)),
        (Some(a), Some(b)) => Err(MergeMatchSpecError::IncompatibleField {
            field,
            left: format!("{a:?}"),
            right: format!("{b:?}"),
        }),
    }
}

fn merge_sets(
    a: Option<BTreeSet<String>>,
    b: Option<BTreeSet<String>>,
) -> Option<BTreeSet<String>> {
    match (a, b) {
        (None, b) => b,
        (a, None) => a,
        (Some(mut a), Some(b)) => {
            a.extend(b);
            Some(a)
        }
    }
}

/// An error that occurred while merging match specs.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MergeMatchSpecError {
    /// No specs were provided to merge.
    #[error("cannot merge an empty set of match specs")]
    NoSpecs,

    /// Two specs disagree on a scalar field.
    #[error("cannot merge match specs: the '{field}' fields are incompatible ({left} vs {right})")]
    IncompatibleField {
        /// The name of the field that could not be merged.
        field: &'static str,
        /// The value in the left spec.
        left: String,
        /// The value in the right spec.
        right: String,
    },
}

impl Display for MatchSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(channel) = &self.channel {
            write!(f, "{channel}")?;
            if let Some(subdir) = &self.subdir {
                write!(f, "/{subdir}")?;
            }
            write!(f, "::")?;
        }

        match &self.name {
            Some(name) => write!(f, "{name}")?,
            None => write!(f, "*")?,
        }

        if let Some(version) = &self.version {
            write!(f, " {version}")?;
            if let Some(build) = &self.build {
                write!(f, " {build}")?;
            }
        }

        let mut keys = Vec::new();

        // A build without a version cannot be expressed positionally.
        if self.version.is_none() {
            if let Some(build) = &self.build {
                keys.push(format!("build={build}"));
            }
        }

        if let Some(build_number) = &self.build_number {
            keys.push(format!("build_number={build_number}"));
        }

        if self.channel.is_none() {
            if let Some(subdir) = &self.subdir {
                keys.push(format!("subdir={subdir}"));
            }
        }

        if let Some(file_name) = &self.file_name {
            keys.push(format!("fn=\"{file_name}\""));
        }

        if let Some(url) = &self.url {
            keys.push(format!("url=\"{url}\""));
        }

        if let Some(md5) = &self.md5 {
            keys.push(format!("md5={md5:x}"));
        }

        if let Some(sha256) = &self.sha256 {
            keys.push(format!("sha256={sha256:x}"));
        }

        if let Some(license) = &self.license {
            keys.push(format!("license={license}"));
        }

        if let Some(license_family) = &self.license_family {
            keys.push(format!("license_family={license_family}"));
        }

        if let Some(features) = &self.features {
            keys.push(format!("features=\"{}\"", features.iter().format(" ")));
        }

        if let Some(track_features) = &self.track_features {
            keys.push(format!(
                "track_features=\"{}\"",
                track_features.iter().format(" ")
            ));
        }

        if !keys.is_empty() {
            write!(f, "[{}]", keys.join(","))?;
        }

        Ok(())
    }
}

/// A trait that defines matching a spec against a record. Matching means the
/// record is valid for the spec.
pub trait Matches<T> {
    /// Returns true if the record matches this spec.
    fn matches(&self, record: &T) -> bool;
}

impl Matches<PackageRecord> for MatchSpec {
    fn matches(&self, record: &PackageRecord) -> bool {
        if let Some(name) = self.name.as_ref() {
            if !name.matches(&record.name) {
                return false;
            }
        }

        if let Some(spec) = self.version.as_ref() {
            if !spec.matches(&record.version) {
                return false;
            }
        }

        if let Some(build_string) = self.build.as_ref() {
            if !build_string.matches(&record.build) {
                return false;
            }
        }

        if let Some(build_number) = self.build_number.as_ref() {
            if !build_number.matches(&record.build_number) {
                return false;
            }
        }

        if let Some(subdir) = self.subdir.as_ref() {
            if subdir != &record.subdir {
                return false;
            }
        }

        if let Some(md5_spec) = self.md5.as_ref() {
            if Some(md5_spec) != record.md5.as_ref() {
                return false;
            }
        }

        if let Some(sha256_spec) = self.sha256.as_ref() {
            if Some(sha256_spec) != record.sha256.as_ref() {
                return false;
            }
        }

        if let Some(license) = self.license.as_ref() {
            if Some(license) != record.license.as_ref() {
                return false;
            }
        }

        if let Some(license_family) = self.license_family.as_ref() {
            if Some(license_family) != record.license_family.as_ref() {
                return false;
            }
        }

        if let Some(features) = self.features.as_ref() {
            let record_features = record.features_set();
            if !features.iter().all(|f| record_features.contains(f.as_str())) {
                return false;
            }
        }

        if let Some(track_features) = self.track_features.as_ref() {
            if !track_features
                .iter()
                .all(|f| record.track_features.iter().any(|t| t == f))
            {
                return false;
            }
        }

        true
    }
}

impl Matches<RepoDataRecord> for MatchSpec {
    fn matches(&self, record: &RepoDataRecord) -> bool {
        if let Some(channel) = self.channel.as_ref() {
            if channel.trim_end_matches('/') != record.channel.trim_end_matches('/') {
                return false;
            }
        }

        if let Some(file_name) = self.file_name.as_ref() {
            if file_name != &record.file_name {
                return false;
            }
        }

        if let Some(url_spec) = self.url.as_ref() {
            if url_spec != &record.url {
                return false;
            }
        }

        self.matches(&record.package_record)
    }
}

impl Matches<PrefixRecord> for MatchSpec {
    fn matches(&self, record: &PrefixRecord) -> bool {
        self.matches(&record.repodata_record)
    }
}

impl Matches<GenericVirtualPackage> for MatchSpec {
    fn matches(&self, package: &GenericVirtualPackage) -> bool {
        if let Some(name) = self.name.as_ref() {
            if !name.matches(&package.name) {
                return false;
            }
        }

        if let Some(spec) = self.version.as_ref() {
            if !spec.matches(&package.version) {
                return false;
            }
        }

        if let Some(build_string) = self.build.as_ref() {
            if !build_string.matches(&package.build_string) {
                return false;
            }
        }

        true
    }
}

impl From<PackageName> for MatchSpec {
    fn from(value: PackageName) -> Self {
        Self {
            name: Some(NameMatcher::Exact(value)),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use assert_matches::assert_matches;

    use super::{MatchSpec, Matches, MergeMatchSpecError, NameMatcher};
    use crate::{PackageRecord, ParseStrictness::*, Version};

    fn record(name: &str, version: &str, build: &str) -> PackageRecord {
        let mut record = PackageRecord::new(
            name.parse().unwrap(),
            Version::from_str(version).unwrap(),
            build.to_string(),
        );
        record.subdir = "linux-64".to_string();
        record
    }

    #[test]
    fn simple_match() {
        let spec = MatchSpec::from_str("numpy >=1.22,<2", Strict).unwrap();
        assert!(spec.matches(&record("numpy", "1.24.0", "py310_0")));
        assert!(!spec.matches(&record("numpy", "2.0.0", "py310_0")));
        assert!(!spec.matches(&record("scipy", "1.24.0", "py310_0")));
    }

    #[test]
    fn build_glob_match() {
        let spec = MatchSpec::from_str("numpy ==1.24.0 py310*", Strict).unwrap();
        assert!(spec.matches(&record("numpy", "1.24.0", "py310_0")));
        assert!(!spec.matches(&record("numpy", "1.24.0", "py39_0")));
    }

    #[test]
    fn name_glob_match() {
        let spec = MatchSpec::from_str("num*", Strict).unwrap();
        assert_matches!(spec.name, Some(NameMatcher::Glob(_)));
        assert!(spec.matches(&record("numpy", "1.24.0", "0")));
        assert!(!spec.matches(&record("scipy", "1.24.0", "0")));
    }

    #[test]
    fn merge_version_and() {
        let a = MatchSpec::from_str("numpy >=1.22", Strict).unwrap();
        let b = MatchSpec::from_str("numpy <2", Strict).unwrap();
        let merged = MatchSpec::merge([&a, &b]).unwrap();
        assert!(merged.matches(&record("numpy", "1.24.0", "0")));
        assert!(!merged.matches(&record("numpy", "2.1", "0")));
    }

    #[test]
    fn merge_incompatible_subdir() {
        let a = MatchSpec::from_str("numpy[subdir=linux-64]", Strict).unwrap();
        let b = MatchSpec::from_str("numpy[subdir=osx-64]", Strict).unwrap();
        assert_matches!(
            MatchSpec::merge([&a, &b]),
            Err(MergeMatchSpecError::IncompatibleField { field: "subdir", .. })
        );
    }

    #[test]
    fn merge_conflicting_versions_is_well_formed() {
        // Conflicting version pins merge into an unsatisfiable spec rather
        // than an error so it can be reported back to the user.
        let a = MatchSpec::from_str("c ==1", Strict).unwrap();
        let b = MatchSpec::from_str("c ==2", Strict).unwrap();
        let merged = MatchSpec::merge([&a, &b]).unwrap();
        assert!(!merged.matches(&record("c", "1", "0")));
        assert!(!merged.matches(&record("c", "2", "0")));
    }
}
