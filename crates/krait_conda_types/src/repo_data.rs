//! Defines [`RepoData`]. `RepoData` stores information of all packages
//! present in a subdirectory of a channel.

use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
    path::Path,
};

use chrono::{DateTime, Utc};
use fxhash::{FxHashMap, FxHashSet};
use krait_digest::{serde::SerializableHash, Md5Hash, Sha256Hash};
use serde::{Deserialize, Deserializer, Serialize};
use serde_with::{serde_as, skip_serializing_none};
use url::Url;

use crate::{
    build_spec::BuildNumber,
    utils::serde::sort_map_alphabetically,
    Channel, NoArchType, PackageName, RepoDataRecord, Version,
};

/// [`RepoData`] is an index of package binaries available in a subdirectory
/// of a conda channel.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RepoData {
    /// The channel information contained in the repodata.json file.
    pub info: Option<ChannelInfo>,

    /// The tar.bz2 packages contained in the repodata.json file.
    #[serde(
        default,
        deserialize_with = "deserialize_filtered_records",
        serialize_with = "sort_map_alphabetically"
    )]
    pub packages: FxHashMap<String, PackageRecord>,

    /// The conda packages contained in the repodata.json file (under a
    /// different key for backwards compatibility with previous conda
    /// versions).
    #[serde(
        default,
        rename = "packages.conda",
        deserialize_with = "deserialize_filtered_records",
        serialize_with = "sort_map_alphabetically"
    )]
    pub conda_packages: FxHashMap<String, PackageRecord>,

    /// Removed packages (files are still accessible, but they are not
    /// installable like regular packages).
    #[serde(default, skip_serializing_if = "FxHashSet::is_empty")]
    pub removed: FxHashSet<String>,

    /// The version of the repodata format.
    #[serde(rename = "repodata_version")]
    pub version: Option<u64>,
}

/// Information about the subdirectory of a channel in [`RepoData`].
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct ChannelInfo {
    /// The channel's subdirectory.
    pub subdir: String,

    /// The `base_url` for all package urls. Can be an absolute or relative
    /// url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// A single record in the conda repodata. A single record refers to a single
/// binary distribution of a package on a conda channel.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct PackageRecord {
    /// Optionally the architecture the package supports.
    pub arch: Option<String>,

    /// The build string of the package.
    pub build: String,

    /// The build number of the package.
    #[serde(default)]
    pub build_number: BuildNumber,

    /// Additional constraints on packages. `constrains` are different from
    /// `depends` in that packages specified in `depends` must be installed
    /// next to this package, whereas packages specified in `constrains` are
    /// not required to be installed, but if they are installed they must
    /// follow these constraints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constrains: Vec<String>,

    /// Specification of packages this package depends on.
    #[serde(default)]
    pub depends: Vec<String>,

    /// Features this record provides. Features are a legacy mechanism to
    /// offer mutually-exclusive variants of a package; a record carrying a
    /// feature is only selected when something in the solution tracks it.
    pub features: Option<String>,

    /// The specific license of the package.
    pub license: Option<String>,

    /// The license family.
    pub license_family: Option<String>,

    /// Optionally an MD5 hash of the package archive.
    #[serde_as(as = "Option<SerializableHash::<krait_digest::Md5>>")]
    pub md5: Option<Md5Hash>,

    /// The name of the package.
    pub name: PackageName,

    /// If this package is independent of architecture this field specifies
    /// in what way. See [`NoArchType`] for more information.
    #[serde(default, skip_serializing_if = "NoArchType::is_none")]
    pub noarch: NoArchType,

    /// Optionally the platform the package supports.
    pub platform: Option<String>,

    /// Optionally a SHA256 hash of the package archive.
    #[serde_as(as = "Option<SerializableHash::<krait_digest::Sha256>>")]
    pub sha256: Option<Sha256Hash>,

    /// Optionally the size of the package archive in bytes.
    pub size: Option<u64>,

    /// The subdirectory where the package can be found.
    #[serde(default)]
    pub subdir: String,

    /// The date this entry was created.
    #[serde_as(as = "Option<crate::utils::serde::Timestamp>")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Track features this record activates. Nowadays only used to
    /// down-weight packages (give them less priority). To that effect, the
    /// number of track features is counted and the package is down-weighted
    /// by it.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_track_features"
    )]
    pub track_features: Vec<String>,

    /// The version of the package.
    pub version: Version,
}

impl PackageRecord {
    /// A simple helper method that constructs a `PackageRecord` with the
    /// bare minimum values.
    pub fn new(name: PackageName, version: Version, build: String) -> Self {
        Self {
            arch: None,
            build,
            build_number: 0,
            constrains: vec![],
            depends: vec![],
            features: None,
            license: None,
            license_family: None,
            md5: None,
            name,
            noarch: NoArchType::default(),
            platform: None,
            sha256: None,
            size: None,
            subdir: String::new(),
            timestamp: None,
            track_features: vec![],
            version,
        }
    }

    /// Returns the set of features this record provides. The `features`
    /// field is stored as a space separated string in repodata.
    pub fn features_set(&self) -> BTreeSet<&str> {
        self.features
            .as_deref()
            .map(|features| {
                features
                    .split([' ', ','])
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Display for PackageRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.build.is_empty() {
            write!(f, "{} {}", self.name.as_normalized(), self.version)
        } else {
            write!(
                f,
                "{}={}={}",
                self.name.as_normalized(),
                self.version,
                self.build
            )
        }
    }
}

impl AsRef<PackageRecord> for PackageRecord {
    fn as_ref(&self) -> &PackageRecord {
        self
    }
}

impl RepoData {
    /// Parses [`RepoData`] from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let contents = fs_err::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Returns the `base_url` specified in the repodata.
    pub fn base_url(&self) -> Option<&str> {
        self.info.as_ref().and_then(|i| i.base_url.as_deref())
    }

    /// Builds a [`Vec<RepoDataRecord>`] from the packages in this instance,
    /// given the channel the data came from.
    pub fn into_repo_data_records(self, channel: &Channel) -> Vec<RepoDataRecord> {
        let mut records = Vec::with_capacity(self.packages.len() + self.conda_packages.len());
        let channel_name = channel.canonical_name();
        let base_url = self.base_url().map(ToOwned::to_owned);

        for (filename, package_record) in self.packages.into_iter().chain(self.conda_packages) {
            records.push(RepoDataRecord {
                url: compute_package_url(
                    &channel.platform_url(&package_record.subdir),
                    base_url.as_deref(),
                    &filename,
                ),
                channel: channel_name.clone(),
                package_record,
                file_name: filename,
            });
        }
        records
    }
}

/// Computes the URL for a package given the subdir url of its channel, an
/// optional override `base_url` from the repodata, and its filename.
pub fn compute_package_url(
    repo_data_base_url: &Url,
    base_url: Option<&str>,
    filename: &str,
) -> Url {
    let mut absolute_url = match base_url {
        None => repo_data_base_url.clone(),
        Some(base_url) => match Url::parse(base_url) {
            Ok(base_url) => base_url,
            Err(url::ParseError::RelativeUrlWithoutBase) => repo_data_base_url
                .join(base_url)
                .unwrap_or_else(|_| repo_data_base_url.clone()),
            Err(_) => repo_data_base_url.clone(),
        },
    };

    let path = absolute_url.path();
    if !path.ends_with('/') {
        absolute_url.set_path(&format!("{path}/"));
    }
    absolute_url
        .join(filename)
        .expect("failed to join base_url and filename")
}

/// Deserializes a map of package records, dropping records that fail to
/// parse. Malformed records in channel data must not fail an entire solve;
/// they are logged and skipped instead.
fn deserialize_filtered_records<'de, D>(
    deserializer: D,
) -> Result<FxHashMap<String, PackageRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = FxHashMap::<String, serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(
            |(filename, value)| match serde_json::from_value(value) {
                Ok(record) => Some((filename, record)),
                Err(e) => {
                    tracing::warn!("dropping malformed repodata record '{filename}': {e}");
                    None
                }
            },
        )
        .collect())
}

/// Deserializes the `track_features` field, which is either a list of
/// strings or a single comma/space delimited string.
fn deserialize_track_features<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(OneOrMany::One(string)) => Ok(string
            .split([',', ' '])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect()),
        Some(OneOrMany::Many(list)) => Ok(list),
    }
}
