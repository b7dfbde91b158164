//! Defines the [`PrefixRecord`] struct: the information stored in
//! `conda-meta/<name>-<version>-<build>.json` for every installed package.

use std::{
    io::Read,
    path::{Path, PathBuf},
    str::FromStr,
};

use krait_digest::serde::SerializableHash;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use serde_with::serde_as;

use crate::{PackageRecord, RepoDataRecord};

/// Information about every file installed with a package.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixPaths {
    /// The version of the file format.
    pub paths_version: u64,

    /// All entries included in the package.
    #[serde(default)]
    pub paths: Vec<PathsEntry>,
}

impl Default for PrefixPaths {
    fn default() -> Self {
        Self {
            paths_version: 1,
            paths: Vec::default(),
        }
    }
}

impl From<Vec<PathsEntry>> for PrefixPaths {
    fn from(paths: Vec<PathsEntry>) -> Self {
        Self {
            paths,
            ..Default::default()
        }
    }
}

/// Information about a single file installed for a package.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct PathsEntry {
    /// The relative path from the root of the package.
    #[serde(rename = "_path")]
    pub relative_path: PathBuf,

    /// How the file was installed into the environment.
    pub path_type: PathType,

    /// A hex representation of the SHA256 hash of the contents of the file.
    #[serde_as(as = "Option<SerializableHash::<krait_digest::Sha256>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<krait_digest::Sha256Hash>,

    /// The size of the file in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,

    /// The original sentinel value used for prefix replacement, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_placeholder: Option<String>,
}

/// How a single file was installed into the prefix.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    /// The file was installed as a hard link to the package cache.
    #[serde(rename = "hardlink")]
    HardLink,
    /// The file was installed as a soft link to the package cache.
    #[serde(rename = "softlink")]
    SoftLink,
    /// An empty directory was created at installation time.
    Directory,
    /// A file "compiled" from Python source code when a noarch package was
    /// installed.
    PycFile,
    /// A Python entry point script (unix style).
    UnixPythonEntryPoint,
    /// A Python entry point script for Windows (`<entrypoint>-script.py`).
    WindowsPythonEntryPointScript,
    /// A Python entry point executable for Windows (`<entrypoint>.exe`).
    WindowsPythonEntryPointExe,
}

/// A reference to the package cache a file was linked from.
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct Link {
    /// The path to the file source that was installed.
    pub source: PathBuf,

    /// The link type that was used to install the file.
    #[serde(rename = "type")]
    pub link_type: Option<LinkType>,
}

/// The different link types that are used when installing files.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr, Hash)]
#[repr(u8)]
pub enum LinkType {
    /// The file referred to the same inode as the source file.
    HardLink = 1,
    /// The file was a soft link to the source file.
    SoftLink = 2,
    /// The file was a proper copy of the source file.
    Copy = 3,
    /// The entry was an (empty) directory.
    Directory = 4,
}

/// A record of a single package installed within an environment. The struct
/// includes the [`RepoDataRecord`] that specifies where the package came
/// from, plus the information gathered while installing it.
///
/// The on-disk `conda-meta/<name>-<version>-<build>.json` file is the source
/// of truth for these records.
#[serde_as]
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct PrefixRecord {
    /// The data from the repodata this record was installed from.
    #[serde(flatten)]
    pub repodata_record: RepoDataRecord,

    /// A sorted list of all files included in this package.
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// Information about how files have been linked when installing the
    /// package.
    #[serde(default)]
    pub paths_data: PrefixPaths,

    /// A reference to the package cache from where the package was linked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<Link>,

    /// The spec that was responsible for the presence of this package, or
    /// `None` when the package was installed as a dependency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_spec: Option<String>,
}

impl PrefixRecord {
    /// Creates a `PrefixRecord` from a `RepoDataRecord`.
    pub fn from_repodata_record(
        repodata_record: RepoDataRecord,
        paths: Vec<PathsEntry>,
        requested_spec: Option<String>,
        link: Option<Link>,
    ) -> Self {
        Self {
            repodata_record,
            files: paths
                .iter()
                .map(|entry| entry.relative_path.clone())
                .collect(),
            paths_data: paths.into(),
            link,
            requested_spec,
        }
    }

    /// Parses a prefix record from a reader.
    pub fn from_reader(mut reader: impl Read) -> Result<Self, std::io::Error> {
        let mut str = String::new();
        reader.read_to_string(&mut str)?;
        Self::from_str(&str)
    }

    /// Parses a prefix record from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        Self::from_reader(fs_err::File::open(path.as_ref())?)
    }

    /// Returns the canonical file name for this record. Takes the form of
    /// `<name>-<version>-<build>.json`.
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}.json",
            self.repodata_record.package_record.name.as_normalized(),
            self.repodata_record.package_record.version,
            self.repodata_record.package_record.build
        )
    }

    /// Writes the contents of this instance to the file at the specified
    /// location.
    pub fn write_to_path(
        &self,
        path: impl AsRef<Path>,
        pretty: bool,
    ) -> Result<(), std::io::Error> {
        self.write_to(fs_err::File::create(path.as_ref())?, pretty)
    }

    /// Writes the contents of this instance to a writer.
    pub fn write_to(
        &self,
        writer: impl std::io::Write,
        pretty: bool,
    ) -> Result<(), std::io::Error> {
        let writer = std::io::BufWriter::new(writer);
        if pretty {
            serde_json::to_writer_pretty(writer, self)?;
        } else {
            serde_json::to_writer(writer, self)?;
        }
        Ok(())
    }

    /// Collects all `PrefixRecord`s from the `conda-meta` directory of the
    /// specified prefix. The result is sorted by package name so the
    /// function is deterministic.
    pub fn collect_from_prefix(prefix: &Path) -> Result<Vec<PrefixRecord>, std::io::Error> {
        let conda_meta_path = prefix.join("conda-meta");
        if !conda_meta_path.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs_err::read_dir(&conda_meta_path)? {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && entry.file_name().to_string_lossy().ends_with(".json")
            {
                records.push(Self::from_path(entry.path())?);
            }
        }

        records.sort_by(|a, b| {
            a.repodata_record
                .package_record
                .name
                .cmp(&b.repodata_record.package_record.name)
        });
        Ok(records)
    }
}

impl FromStr for PrefixRecord {
    type Err = std::io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map_err(Into::into)
    }
}

impl AsRef<RepoDataRecord> for PrefixRecord {
    fn as_ref(&self) -> &RepoDataRecord {
        &self.repodata_record
    }
}

impl AsRef<PackageRecord> for PrefixRecord {
    fn as_ref(&self) -> &PackageRecord {
        &self.repodata_record.package_record
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use url::Url;

    use super::{PathType, PathsEntry, PrefixRecord};
    use crate::{PackageRecord, RepoDataRecord, Version};

    fn repodata_record() -> RepoDataRecord {
        RepoDataRecord {
            package_record: PackageRecord::new(
                "python".parse().unwrap(),
                Version::from_str("3.10.12").unwrap(),
                "h_0".to_string(),
            ),
            file_name: "python-3.10.12-h_0.conda".to_string(),
            url: Url::parse("https://conda.anaconda.org/conda-forge/linux-64/python-3.10.12-h_0.conda").unwrap(),
            channel: "https://conda.anaconda.org/conda-forge".to_string(),
        }
    }

    #[test]
    fn canonical_file_name() {
        let record = PrefixRecord::from_repodata_record(
            repodata_record(),
            Vec::new(),
            Some("python=3.10".to_string()),
            None,
        );
        assert_eq!(record.file_name(), "python-3.10.12-h_0.json");
    }

    #[test]
    fn json_roundtrip() {
        let record = PrefixRecord::from_repodata_record(
            repodata_record(),
            vec![PathsEntry {
                relative_path: "bin/python".into(),
                path_type: PathType::HardLink,
                sha256: None,
                size_in_bytes: Some(1024),
                prefix_placeholder: None,
            }],
            Some("python=3.10".to_string()),
            None,
        );

        let json = serde_json::to_string_pretty(&record).unwrap();
        let parsed = PrefixRecord::from_str(&json).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.requested_spec.as_deref(), Some("python=3.10"));
    }

    #[test]
    fn collect_from_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let conda_meta = dir.path().join("conda-meta");
        fs_err::create_dir_all(&conda_meta).unwrap();

        let record = PrefixRecord::from_repodata_record(repodata_record(), vec![], None, None);
        record
            .write_to_path(conda_meta.join(record.file_name()), true)
            .unwrap();

        let records = PrefixRecord::collect_from_prefix(dir.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0]
                .repodata_record
                .package_record
                .name
                .as_normalized(),
            "python"
        );
    }
}
