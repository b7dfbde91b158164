//! Defines the [`RepoDataRecord`] struct.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::PackageRecord;

/// Information about a package from repodata. It includes a
/// [`PackageRecord`] together with the source of the record: the channel it
/// came from, its filename and its download url.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoDataRecord {
    /// The data stored in the repodata.json.
    #[serde(flatten)]
    pub package_record: PackageRecord,

    /// The filename of the package.
    #[serde(rename = "fn")]
    pub file_name: String,

    /// The canonical URL from where to get this package.
    pub url: Url,

    /// The canonical name of the channel that provided this record. Records
    /// from the target prefix itself carry `@` and virtual package records
    /// carry `@virtual`.
    pub channel: String,
}

impl RepoDataRecord {
    /// The identity of a record: the tuple that determines whether two
    /// records refer to the same package build. Two records that only differ
    /// in archive format or download location are still the same build.
    pub fn identity(&self) -> (&str, &str, &str, &crate::Version, &str) {
        (
            self.channel.trim_end_matches('/'),
            &self.package_record.subdir,
            self.package_record.name.as_normalized(),
            &self.package_record.version,
            &self.package_record.build,
        )
    }

    /// Returns the distribution string of this record as it appears in
    /// history files: `channel::name-version-build` with the short channel
    /// name, or just `name-version-build` when the channel is unknown.
    pub fn dist_string(&self) -> String {
        let base = format!(
            "{}-{}-{}",
            self.package_record.name.as_normalized(),
            self.package_record.version,
            self.package_record.build
        );
        match short_channel_name(&self.channel) {
            Some(channel) => format!("{channel}::{base}"),
            None => base,
        }
    }
}

/// Shortens a canonical channel name (usually a url) to the label users know
/// it by: the last path component(s) after the host.
fn short_channel_name(channel: &str) -> Option<&str> {
    let channel = channel.trim_end_matches('/');
    if channel.is_empty() || channel.starts_with('@') {
        return None;
    }
    match channel.rsplit_once('/') {
        Some((_, name)) if !name.is_empty() => Some(name),
        _ => Some(channel),
    }
}

impl PartialEq for RepoDataRecord {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for RepoDataRecord {}

impl Hash for RepoDataRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl AsRef<PackageRecord> for RepoDataRecord {
    fn as_ref(&self) -> &PackageRecord {
        &self.package_record
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use url::Url;

    use super::RepoDataRecord;
    use crate::{PackageRecord, Version};

    fn record(channel: &str, name: &str, version: &str, build: &str) -> RepoDataRecord {
        RepoDataRecord {
            package_record: PackageRecord::new(
                name.parse().unwrap(),
                Version::from_str(version).unwrap(),
                build.to_string(),
            ),
            file_name: format!("{name}-{version}-{build}.conda"),
            url: Url::parse(&format!("https://example.com/{name}-{version}-{build}.conda"))
                .unwrap(),
            channel: channel.to_string(),
        }
    }

    #[test]
    fn identity_ignores_archive_format() {
        let a = record("https://conda.anaconda.org/conda-forge", "foo", "1.0", "h_0");
        let mut b = a.clone();
        b.file_name = "foo-1.0-h_0.tar.bz2".to_string();
        assert_eq!(a, b);
    }

    #[test]
    fn identity_differs_per_channel() {
        let a = record("https://conda.anaconda.org/channel-a", "foo", "1.0", "h_0");
        let b = record("https://conda.anaconda.org/channel-b", "foo", "1.0", "h_0");
        assert_ne!(a, b);
    }

    #[test]
    fn dist_string_uses_short_channel() {
        let record = record("https://conda.anaconda.org/conda-forge", "foo", "1.0", "h_0");
        assert_eq!(record.dist_string(), "conda-forge::foo-1.0-h_0");
    }
}
