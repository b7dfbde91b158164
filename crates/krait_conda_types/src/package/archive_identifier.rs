use std::fmt::{Display, Formatter};

/// The format of a conda package archive.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ArchiveType {
    /// The legacy bzipped tarball format (`.tar.bz2`).
    TarBz2,

    /// The newer zstd based format (`.conda`).
    Conda,
}

impl ArchiveType {
    /// Returns the file extension of this archive type, including the
    /// leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveType::TarBz2 => ".tar.bz2",
            ArchiveType::Conda => ".conda",
        }
    }

    /// Tries to determine the type of a conda archive from its filename.
    /// Both formats are treated as the same package identity modulo the
    /// archive format.
    pub fn try_from(path: impl AsRef<str>) -> Option<ArchiveType> {
        Self::split_str(path.as_ref()).map(|(_, ty)| ty)
    }

    /// Splits the specified string into the part before the archive
    /// extension and the archive type.
    pub fn split_str(path: &str) -> Option<(&str, ArchiveType)> {
        if let Some(path) = path.strip_suffix(".conda") {
            Some((path, ArchiveType::Conda))
        } else {
            path.strip_suffix(".tar.bz2")
                .map(|path| (path, ArchiveType::TarBz2))
        }
    }
}

impl Display for ArchiveType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// The identity encoded in a conda package filename:
/// `{name}-{version}-{build}.{ext}`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ArchiveIdentifier {
    /// The name of the package.
    pub name: String,

    /// The version of the package (not parsed, the filename may predate the
    /// current version syntax).
    pub version: String,

    /// The build string of the package.
    pub build: String,

    /// The format of the archive.
    pub archive_type: ArchiveType,
}

impl ArchiveIdentifier {
    /// Tries to parse an archive identifier from a filename.
    pub fn try_from_filename(filename: &str) -> Option<ArchiveIdentifier> {
        let (stem, archive_type) = ArchiveType::split_str(filename)?;

        // Filenames always have the form `{name}-{version}-{build}` where
        // name may itself contain dashes but version and build do not.
        let (rest, build) = stem.rsplit_once('-')?;
        let (name, version) = rest.rsplit_once('-')?;
        if name.is_empty() || version.is_empty() {
            return None;
        }

        Some(ArchiveIdentifier {
            name: name.to_owned(),
            version: version.to_owned(),
            build: build.to_owned(),
            archive_type,
        })
    }

    /// Tries to parse an archive identifier from the last segment of a URL
    /// path.
    pub fn try_from_url(url: &url::Url) -> Option<ArchiveIdentifier> {
        let filename = url.path_segments()?.next_back()?;
        Self::try_from_filename(filename)
    }

    /// Returns the filename this identifier was parsed from.
    pub fn to_file_name(&self) -> String {
        format!(
            "{}-{}-{}{}",
            self.name,
            self.version,
            self.build,
            self.archive_type.extension()
        )
    }
}

#[cfg(test)]
mod test {
    use super::{ArchiveIdentifier, ArchiveType};

    #[test]
    fn parse_filename() {
        let id = ArchiveIdentifier::try_from_filename("numpy-1.24.0-py310h_0.tar.bz2").unwrap();
        assert_eq!(id.name, "numpy");
        assert_eq!(id.version, "1.24.0");
        assert_eq!(id.build, "py310h_0");
        assert_eq!(id.archive_type, ArchiveType::TarBz2);

        let id = ArchiveIdentifier::try_from_filename("python-abi3-3.10-0.conda").unwrap();
        assert_eq!(id.name, "python-abi3");
        assert_eq!(id.version, "3.10");
        assert_eq!(id.build, "0");
        assert_eq!(id.archive_type, ArchiveType::Conda);
    }

    #[test]
    fn rejects_other_files() {
        assert!(ArchiveIdentifier::try_from_filename("repodata.json").is_none());
        assert!(ArchiveIdentifier::try_from_filename("name-only.tar.bz2").is_none());
    }

    #[test]
    fn roundtrip() {
        let filename = "libblas-3.9.0-h_0.conda";
        let id = ArchiveIdentifier::try_from_filename(filename).unwrap();
        assert_eq!(id.to_file_name(), filename);
    }
}
