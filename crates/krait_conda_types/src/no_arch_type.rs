use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Noarch packages are packages that are not architecture specific and
/// therefore only have to be built once. A package is either architecture
/// specific (`NoArchType::none()`), a generic noarch package, or a Python
/// noarch package.
///
/// Python noarch packages route their `site-packages` files and entry points
/// through whatever Python interpreter is present in the environment at link
/// time. That property is what forces the transaction planner to link
/// `python` before any of them and unlink it after them.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct NoArchType(pub Option<NoArchKind>);

/// Defines the type of noarch that a package could be.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum NoArchKind {
    /// A noarch python package: python source without precompiled `.pyc`
    /// files, compiled on install through the environment's interpreter.
    Python,

    /// A generic noarch package: docs, datasets, source code.
    Generic,
}

impl NoArchType {
    /// Returns the kind of this instance or `None` if this is not a noarch
    /// package at all.
    pub fn kind(&self) -> Option<NoArchKind> {
        self.0
    }

    /// Returns true if this is not a noarch package.
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Returns true if this instance is a Python noarch type.
    pub fn is_python(&self) -> bool {
        self.0 == Some(NoArchKind::Python)
    }

    /// Returns true if this instance is a generic noarch type.
    pub fn is_generic(&self) -> bool {
        self.0 == Some(NoArchKind::Generic)
    }

    /// Constructs a Python noarch instance.
    pub fn python() -> Self {
        Self(Some(NoArchKind::Python))
    }

    /// Constructs a generic noarch instance.
    pub fn generic() -> Self {
        Self(Some(NoArchKind::Generic))
    }

    /// Constructs a `None` noarch type: the package is specific to an
    /// architecture.
    pub fn none() -> Self {
        Self(None)
    }
}

impl<'de> Deserialize<'de> for NoArchType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Historically the `noarch` field was a boolean, nowadays it is the
        // kind as a string.
        #[derive(Clone, Debug, Deserialize)]
        #[serde(untagged)]
        enum NoArchSerde {
            OldFormat(bool),
            NewFormat(NoArchKindSerde),
        }

        #[derive(Clone, Debug, Deserialize)]
        #[serde(rename_all = "lowercase")]
        enum NoArchKindSerde {
            Python,
            Generic,
        }

        let value = Option::<NoArchSerde>::deserialize(deserializer)?;
        Ok(NoArchType(value.and_then(|value| match value {
            NoArchSerde::OldFormat(true) => Some(NoArchKind::Generic),
            NoArchSerde::OldFormat(false) => None,
            NoArchSerde::NewFormat(NoArchKindSerde::Python) => Some(NoArchKind::Python),
            NoArchSerde::NewFormat(NoArchKindSerde::Generic) => Some(NoArchKind::Generic),
        })))
    }
}

impl Serialize for NoArchType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0 {
            None => false.serialize(serializer),
            Some(NoArchKind::Generic) => "generic".serialize(serializer),
            Some(NoArchKind::Python) => "python".serialize(serializer),
        }
    }
}
