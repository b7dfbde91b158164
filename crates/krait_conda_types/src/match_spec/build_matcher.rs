use std::{
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Serialize, Serializer};
use thiserror::Error;

/// The build-string predicate of a [`crate::MatchSpec`].
///
/// A plain value like `py310_0` must match the record's build string
/// exactly. A value containing `*` is a glob, so `py310*` selects any build
/// of the py310 series. A value delimited by `^` and `$` is an anchored
/// regular expression.
///
/// Like [`crate::PackageName`], the matcher keeps the string it was created
/// from; the interpretation is derived from that source once, at parse time.
#[derive(Debug, Clone)]
pub struct BuildMatcher {
    /// The string this matcher was parsed from.
    source: String,

    /// How the source is interpreted when matching.
    kind: MatcherKind,
}

#[derive(Debug, Clone)]
enum MatcherKind {
    /// The build string must equal the source.
    Literal,
    /// The source is a glob over the build string.
    Glob(glob::Pattern),
    /// The source is an anchored regular expression.
    Regex(regex::Regex),
}

impl BuildMatcher {
    /// Creates a matcher that only matches the given build string, without
    /// interpreting wildcards. Used when the build is taken from an archive
    /// filename rather than user input.
    pub fn exact(build: impl Into<String>) -> Self {
        Self {
            source: build.into(),
            kind: MatcherKind::Literal,
        }
    }

    /// Returns the string this matcher was created from.
    pub fn as_source(&self) -> &str {
        &self.source
    }

    /// Returns the build string when this matcher matches exactly one.
    pub fn as_exact(&self) -> Option<&str> {
        match self.kind {
            MatcherKind::Literal => Some(&self.source),
            _ => None,
        }
    }

    /// Returns whether the given build string matches.
    pub fn matches(&self, build: &str) -> bool {
        match &self.kind {
            MatcherKind::Literal => self.source == build,
            MatcherKind::Glob(pattern) => pattern.matches(build),
            MatcherKind::Regex(regex) => regex.is_match(build),
        }
    }
}

/// An error that occurred while parsing a [`BuildMatcher`].
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseBuildMatcherError {
    /// The glob pattern was malformed.
    #[error("'{0}' is not a valid build string glob")]
    InvalidGlob(String),

    /// The regular expression was malformed.
    #[error("'{0}' is not a valid build string regex")]
    InvalidRegex(String),
}

impl FromStr for BuildMatcher {
    type Err = ParseBuildMatcherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = if s.starts_with('^') && s.ends_with('$') {
            MatcherKind::Regex(
                regex::Regex::new(s)
                    .map_err(|_| ParseBuildMatcherError::InvalidRegex(s.to_string()))?,
            )
        } else if s.contains('*') {
            MatcherKind::Glob(
                glob::Pattern::new(s)
                    .map_err(|_| ParseBuildMatcherError::InvalidGlob(s.to_string()))?,
            )
        } else {
            MatcherKind::Literal
        };

        Ok(Self {
            source: s.to_string(),
            kind,
        })
    }
}

// The kind is a pure function of the source, so the source alone identifies
// the matcher.
impl PartialEq for BuildMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for BuildMatcher {}

impl Hash for BuildMatcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

impl Display for BuildMatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for BuildMatcher {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.source)
    }
}
