use std::{
    borrow::Borrow,
    cmp::Ordering,
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A representation of a conda package name. This struct both stores the
/// source string from which this instance was created as well as a normalized
/// name that can be used to compare different names. The normalized name is
/// guaranteed to be a valid conda package name.
///
/// Conda package names are always lowercase and can only contain ascii
/// characters.
///
/// This struct explicitly does not implement [`std::fmt::Display`] because it
/// would be ambiguous if that displays the source or the normalized version.
/// Simply call `as_source` or `as_normalized` to make the distinction.
#[derive(Debug, Clone, Eq)]
pub struct PackageName {
    /// The normalized name, or `None` when the source is already normalized.
    normalized: Option<String>,

    /// The string from which this instance was created.
    source: String,
}

impl PackageName {
    /// Constructs a new `PackageName` from a string without checking if the
    /// string is actually a valid or normalized conda package name. This
    /// should only be used if you are sure that the input string is valid.
    pub fn new_unchecked(normalized: impl Into<String>) -> Self {
        Self {
            normalized: None,
            source: normalized.into(),
        }
    }

    /// Returns the source representation of the package name. This is the
    /// string from which this instance was created.
    pub fn as_source(&self) -> &str {
        &self.source
    }

    /// Returns the normalized version of the package name. The normalized
    /// string is guaranteed to be a valid conda package name.
    pub fn as_normalized(&self) -> &str {
        self.normalized.as_deref().unwrap_or(&self.source)
    }

    /// Returns true if this is the name of a virtual package (a package whose
    /// name starts with `__`, like `__glibc`).
    pub fn is_virtual(&self) -> bool {
        self.as_normalized().starts_with("__")
    }
}

/// An error that is returned when conversion from a string to a
/// [`PackageName`] fails.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InvalidPackageNameError {
    /// The package name contains illegal characters.
    #[error("'{0}' is not a valid package name. Package names can only contain 0-9, a-z, A-Z, -, _, or .")]
    InvalidCharacters(String),
}

impl TryFrom<String> for PackageName {
    type Error = InvalidPackageNameError;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        if !source
            .chars()
            .all(|c| matches!(c, 'a'..='z'|'A'..='Z'|'0'..='9'|'-'|'_'|'.'))
        {
            return Err(InvalidPackageNameError::InvalidCharacters(source));
        }

        // Only allocate a lowercase copy when the source actually contains
        // uppercase characters.
        let normalized = source
            .chars()
            .any(|c| c.is_ascii_uppercase())
            .then(|| source.to_ascii_lowercase());

        Ok(Self { normalized, source })
    }
}

impl TryFrom<&String> for PackageName {
    type Error = InvalidPackageNameError;

    fn try_from(value: &String) -> Result<Self, Self::Error> {
        value.clone().try_into()
    }
}

impl TryFrom<&str> for PackageName {
    type Error = InvalidPackageNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.to_owned().try_into()
    }
}

impl FromStr for PackageName {
    type Err = InvalidPackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.try_into()
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.as_normalized() == other.as_normalized()
    }
}

impl PartialOrd for PackageName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_normalized().cmp(other.as_normalized())
    }
}

impl Hash for PackageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_normalized().hash(state);
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        self.as_normalized()
    }
}

impl Serialize for PackageName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.as_source().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PackageName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let source = String::deserialize(deserializer)?;
        source.try_into().map_err(serde::de::Error::custom)
    }
}
