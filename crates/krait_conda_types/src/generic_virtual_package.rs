use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{PackageName, Version};

/// A `GenericVirtualPackage` is a conda package description that contains a
/// `name`, a `version` and a `build_string`.
///
/// Virtual packages (whose names start with `__`, e.g. `__glibc`, `__cuda`,
/// `__unix`) describe properties of the system the solver runs for. They are
/// detected outside of this crate and passed into a solve as plain records so
/// that `depends` entries like `__cuda >=11` can gate candidate selection.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct GenericVirtualPackage {
    /// The name of the package.
    pub name: PackageName,

    /// The version of the package.
    pub version: Version,

    /// The build identifier of the package.
    pub build_string: String,
}

impl Display for GenericVirtualPackage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}={}={}",
            &self.name.as_normalized(),
            &self.version,
            &self.build_string
        )
    }
}
