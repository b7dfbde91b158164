//! Read the installed records from an environment's `conda-meta` directory.

use std::path::{Path, PathBuf};

use fxhash::FxHashMap;

use crate::{PackageName, PrefixRecord};

/// The installed state of an environment prefix.
///
/// `PrefixData` reads every `conda-meta/*.json` file in the prefix and
/// indexes the resulting [`PrefixRecord`]s by package name. Records that fail
/// to parse are skipped with a warning; a single corrupt record must not make
/// the whole environment unreadable.
///
/// The solver treats this data as read-only. Only the consumers of a
/// transaction mutate the `conda-meta` directory.
#[derive(Debug, Clone)]
pub struct PrefixData {
    /// The path of the environment prefix.
    prefix_path: PathBuf,

    /// The installed records, indexed by normalized package name.
    records: FxHashMap<PackageName, PrefixRecord>,
}

impl PrefixData {
    /// Reads the installed records from the given prefix.
    pub fn from_prefix(prefix: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let prefix_path = prefix.as_ref().to_path_buf();
        let conda_meta = prefix_path.join("conda-meta");

        let mut records = FxHashMap::default();
        if conda_meta.is_dir() {
            for entry in fs_err::read_dir(&conda_meta)? {
                let entry = entry?;
                let file_name = entry.file_name();
                let file_name = file_name.to_string_lossy();
                if !file_name.ends_with(".json") || !entry.file_type()?.is_file() {
                    continue;
                }

                match PrefixRecord::from_path(entry.path()) {
                    Ok(record) => {
                        let name = record.repodata_record.package_record.name.clone();
                        records.insert(name, record);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "skipping unreadable prefix record '{file_name}': {e}"
                        );
                    }
                }
            }
        }

        Ok(Self {
            prefix_path,
            records,
        })
    }

    /// Constructs an instance from a set of already loaded records. Mostly
    /// useful for tests.
    pub fn from_records(
        prefix: impl Into<PathBuf>,
        records: impl IntoIterator<Item = PrefixRecord>,
    ) -> Self {
        Self {
            prefix_path: prefix.into(),
            records: records
                .into_iter()
                .map(|record| {
                    (
                        record.repodata_record.package_record.name.clone(),
                        record,
                    )
                })
                .collect(),
        }
    }

    /// Returns the path of the prefix this data was read from.
    pub fn prefix_path(&self) -> &Path {
        &self.prefix_path
    }

    /// Returns the record for the given package name, if it is installed.
    pub fn get(&self, name: &PackageName) -> Option<&PrefixRecord> {
        self.records.get(name)
    }

    /// Returns an iterator over all installed records.
    pub fn records(&self) -> impl Iterator<Item = &PrefixRecord> {
        self.records.values()
    }

    /// Returns the number of installed records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true when no package is installed in the prefix.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use url::Url;

    use super::PrefixData;
    use crate::{PackageRecord, PrefixRecord, RepoDataRecord, Version};

    fn record(name: &str, version: &str) -> PrefixRecord {
        PrefixRecord::from_repodata_record(
            RepoDataRecord {
                package_record: PackageRecord::new(
                    name.parse().unwrap(),
                    Version::from_str(version).unwrap(),
                    "0".to_string(),
                ),
                file_name: format!("{name}-{version}-0.conda"),
                url: Url::parse(&format!("https://example.com/{name}-{version}-0.conda")).unwrap(),
                channel: "https://conda.anaconda.org/conda-forge".to_string(),
            },
            vec![],
            None,
            None,
        )
    }

    #[test]
    fn read_prefix_skips_corrupt_records() {
        let dir = tempfile::tempdir().unwrap();
        let conda_meta = dir.path().join("conda-meta");
        fs_err::create_dir_all(&conda_meta).unwrap();

        record("python", "3.10.12")
            .write_to_path(conda_meta.join("python-3.10.12-0.json"), true)
            .unwrap();
        fs_err::write(conda_meta.join("broken-1.0-0.json"), "{not json").unwrap();
        fs_err::write(conda_meta.join("history"), "==> 2024-01-01 00:00:00 <==\n").unwrap();

        let data = PrefixData::from_prefix(dir.path()).unwrap();
        assert_eq!(data.len(), 1);
        assert!(data.get(&"python".parse().unwrap()).is_some());
    }

    #[test]
    fn missing_conda_meta_is_an_empty_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let data = PrefixData::from_prefix(dir.path()).unwrap();
        assert!(data.is_empty());
    }
}
