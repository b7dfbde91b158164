#![deny(missing_docs)]

//! `krait_conda_types` contains data models for working with conda packages:
//! versions and version specs, match specs, package records, channels, the
//! installed state of an environment prefix, and the per-environment history
//! of user requests.
//!
//! The types in this crate are created by parsing and are immutable
//! thereafter; they can be freely shared.

mod build_spec;
mod channel;
mod generic_virtual_package;
mod history;
mod match_spec;
mod no_arch_type;
pub mod package;
mod package_name;
mod parse_mode;
mod prefix_data;
mod prefix_record;
mod repo_data;
mod repo_data_record;
mod utils;
mod version;
mod version_spec;

pub use build_spec::{BuildNumber, BuildNumberSpec, OrdOperator, ParseBuildNumberSpecError};
pub use channel::{
    is_known_subdir, Channel, ChannelConfig, ChannelPriority, ParseChannelError, KNOWN_SUBDIRS,
};
pub use generic_virtual_package::GenericVirtualPackage;
pub use history::{
    History, HistoryError, HistoryRevision, ParsedHistory, Revision, UserRequest,
};
pub use match_spec::{
    build_matcher::{BuildMatcher, ParseBuildMatcherError},
    MatchSpec, Matches, MergeMatchSpecError, NameMatcher, ParseMatchSpecError,
};
pub use no_arch_type::{NoArchKind, NoArchType};
pub use package_name::{InvalidPackageNameError, PackageName};
pub use parse_mode::ParseStrictness;
pub use prefix_data::PrefixData;
pub use prefix_record::{
    Link, LinkType, PathType, PathsEntry, PrefixPaths, PrefixRecord,
};
pub use repo_data::{compute_package_url, ChannelInfo, PackageRecord, RepoData};
pub use repo_data_record::RepoDataRecord;
pub use version::{
    ParseVersionError, ParseVersionErrorKind, StrictVersion, Version,
};
pub use version_spec::{
    EqualityOperator, LogicalOperator, ParseVersionSpecError, RangeOperator, StrictRangeOperator,
    VersionSpec,
};
