//! Readers and writers for `conda-meta/history` files.
//!
//! Conda environments keep a `conda-meta/history` file that records every
//! change (revision) made to the environment. Each revision contains a
//! timestamp header (`==> <datetime> <==`), optional comment lines (the
//! command that was run and the specs that were requested), and a list of
//! package distribution strings, prefixed with `+` (added) or `-` (removed).
//!
//! The solver cares about this file because the surviving user-requested
//! specs of all revisions participate in the next solve: what the user asked
//! for once stays requested until it is explicitly removed.

use std::{
    collections::BTreeSet,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use fxhash::FxHashMap;

use crate::{MatchSpec, ParseStrictness};

/// A single revision in a conda history file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRevision {
    /// The datetime string from the revision header.
    pub timestamp: String,

    /// The set of package distribution strings for this revision. In the
    /// initial revision these are bare distribution strings; in subsequent
    /// revisions they are prefixed with `+` (added) or `-` (removed).
    pub packages: BTreeSet<String>,

    /// Raw comment lines (including the leading `#`).
    pub comments: Vec<String>,
}

/// A structured representation of a user request extracted from the comment
/// lines of a [`HistoryRevision`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRequest {
    /// The datetime string from the revision header.
    pub date: String,

    /// The command that was run (from `# cmd: ...`).
    pub cmd: Option<String>,

    /// The action that was performed, e.g. `install`, `remove`, `update`
    /// (from `# <action> specs: ...`).
    pub action: Option<String>,

    /// Specs for install/update/create actions.
    pub update_specs: Vec<String>,

    /// Specs for remove/uninstall actions.
    pub remove_specs: Vec<String>,

    /// Specs that have been neutered (weakened after a conflict).
    pub neutered_specs: Vec<String>,
}

/// Errors that can occur when working with history files.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// An I/O error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// The history file could not be parsed.
    #[error("failed to parse history: {0}")]
    ParseError(String),
}

/// A revision to be appended to a history file after a transaction has been
/// applied successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Revision {
    /// Timestamp string, in `YYYY-MM-DD HH:MM:SS` format.
    pub timestamp: String,

    /// The command that caused this revision, if known.
    pub cmd: Option<String>,

    /// The specs the user asked to install or update.
    pub update_specs: Vec<String>,

    /// The specs the user asked to remove.
    pub remove_specs: Vec<String>,

    /// Distribution strings that were removed in this revision.
    pub removed: BTreeSet<String>,

    /// Distribution strings that were added in this revision.
    pub added: BTreeSet<String>,
}

impl Revision {
    /// Returns true when this revision changes nothing.
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// The parsed contents of a `conda-meta/history` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedHistory {
    /// The list of revisions parsed from the file, oldest first.
    pub revisions: Vec<HistoryRevision>,
}

impl ParsedHistory {
    /// Returns the number of revisions.
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    /// Returns `true` if there are no revisions.
    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Returns a reference to the latest revision, if any.
    pub fn latest(&self) -> Option<&HistoryRevision> {
        self.revisions.last()
    }

    /// Extracts structured [`UserRequest`]s from the parsed revisions. A
    /// user request is produced for every revision that carries a
    /// `# cmd: ...` comment.
    pub fn user_requests(&self) -> Vec<UserRequest> {
        let cmd_re = lazy_regex::regex!(r"^#\s*cmd:\s*(.+)$");
        let spec_re = lazy_regex::regex!(r"^#\s*(\w+)\s*specs:\s*(.+)?$");

        let mut requests = Vec::new();

        for rev in &self.revisions {
            let mut req = UserRequest {
                date: rev.timestamp.clone(),
                ..Default::default()
            };

            for comment in &rev.comments {
                if let Some(caps) = cmd_re.captures(comment) {
                    req.cmd = Some(caps[1].to_string());
                }
                if let Some(caps) = spec_re.captures(comment) {
                    let action = caps[1].to_string();
                    let specs = parse_specs_string(caps.get(2).map_or("", |m| m.as_str()));

                    match action.as_str() {
                        "install" | "create" | "update" => req.update_specs = specs,
                        "remove" | "uninstall" => req.remove_specs = specs,
                        "neutered" => req.neutered_specs = specs,
                        _ => {}
                    }
                    req.action = Some(action);
                }
            }

            if req.cmd.is_some() || req.action.is_some() {
                requests.push(req);
            }
        }

        requests
    }

    /// Derives the set of user-requested specs that are still in effect:
    /// walks the revisions oldest-to-newest, adding the update specs and
    /// dropping specs whose name was later removed or neutered.
    ///
    /// Removing a name from history does not by itself uninstall the
    /// package; it only stops the solver from holding on to the old request.
    pub fn requested_specs(&self) -> Vec<MatchSpec> {
        let mut surviving: FxHashMap<String, MatchSpec> = FxHashMap::default();
        let mut order: Vec<String> = Vec::new();

        for request in self.user_requests() {
            for spec_str in &request.update_specs {
                let spec = match MatchSpec::from_str(spec_str, ParseStrictness::Lenient) {
                    Ok(spec) => spec,
                    Err(e) => {
                        tracing::warn!("ignoring malformed spec '{spec_str}' in history: {e}");
                        continue;
                    }
                };
                let Some(name) = spec.exact_name().map(|n| n.as_normalized().to_string())
                else {
                    continue;
                };
                if !surviving.contains_key(&name) {
                    order.push(name.clone());
                }
                surviving.insert(name, spec);
            }

            for spec_str in request
                .remove_specs
                .iter()
                .chain(request.neutered_specs.iter())
            {
                let name = match MatchSpec::from_str(spec_str, ParseStrictness::Lenient) {
                    Ok(spec) => spec.exact_name().map(|n| n.as_normalized().to_string()),
                    Err(_) => Some(spec_str.trim().to_string()),
                };
                if let Some(name) = name {
                    surviving.remove(&name);
                }
            }
        }

        order
            .into_iter()
            .filter_map(|name| surviving.remove(&name))
            .collect()
    }
}

/// Provides read and write access to the `conda-meta/history` file of an
/// environment prefix.
#[derive(Debug, Clone)]
pub struct History {
    /// Path to the `conda-meta/history` file.
    path: PathBuf,
}

impl History {
    /// Creates a new `History` pointing at `<prefix>/conda-meta/history`.
    pub fn new(prefix: impl AsRef<Path>) -> Self {
        Self {
            path: prefix.as_ref().join("conda-meta").join("history"),
        }
    }

    /// Creates a `History` from an explicit path to a history file.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path to the history file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses the history file into a [`ParsedHistory`]. Returns an empty
    /// history if the file does not exist.
    pub fn parse(&self) -> Result<ParsedHistory, HistoryError> {
        if !self.path.exists() {
            return Ok(ParsedHistory::default());
        }

        let contents = fs_err::read_to_string(&self.path)?;
        Self::parse_str(&contents)
    }

    /// Parses a history file from a reader.
    pub fn from_reader(mut reader: impl Read) -> Result<ParsedHistory, HistoryError> {
        let mut contents = String::new();
        reader.read_to_string(&mut contents)?;
        Self::parse_str(&contents)
    }

    /// Parses a history string into a [`ParsedHistory`]. Comment lines
    /// before the first revision header and unknown comment lines are
    /// tolerated; they simply carry no information.
    pub fn parse_str(s: &str) -> Result<ParsedHistory, HistoryError> {
        let sep_re = lazy_regex::regex!(r"^==>\s*(.+?)\s*<==$");

        let mut revisions = Vec::new();

        for line in s.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(caps) = sep_re.captures(line) {
                revisions.push(HistoryRevision {
                    timestamp: caps[1].to_string(),
                    packages: BTreeSet::new(),
                    comments: Vec::new(),
                });
            } else if let Some(rev) = revisions.last_mut() {
                if line.starts_with('#') {
                    rev.comments.push(line.to_string());
                } else {
                    rev.packages.insert(line.to_string());
                }
            }
            // Lines before the first header are silently ignored.
        }

        Ok(ParsedHistory { revisions })
    }

    /// Appends a revision entry to the history file, creating the file and
    /// its parent directory when needed.
    pub fn write_revision(&self, revision: &Revision) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let mut file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(file, "==> {} <==", revision.timestamp)?;
        if let Some(cmd) = &revision.cmd {
            writeln!(file, "# cmd: {cmd}")?;
        }
        if !revision.update_specs.is_empty() {
            writeln!(file, "# update specs: {:?}", revision.update_specs)?;
        }
        if !revision.remove_specs.is_empty() {
            writeln!(file, "# remove specs: {:?}", revision.remove_specs)?;
        }
        for pkg in &revision.removed {
            writeln!(file, "-{pkg}")?;
        }
        for pkg in &revision.added {
            writeln!(file, "+{pkg}")?;
        }

        Ok(())
    }

    /// Like [`History::write_revision`], but only warns when the file cannot
    /// be written. A read-only environment must not fail the transaction
    /// that has already been applied.
    pub fn write_revision_tolerant(&self, revision: &Revision) {
        if let Err(e) = self.write_revision(revision) {
            tracing::warn!(
                "could not append to history file {}: {e}",
                self.path.display()
            );
        }
    }
}

/// Parses a specs string from a comment line. The string may be in Python
/// list format (`['numpy', 'pandas']`) or in the older comma-separated
/// format (`numpy,pandas>=1.5`).
fn parse_specs_string(s: &str) -> Vec<String> {
    let s = s.trim();
    if s.is_empty() {
        return Vec::new();
    }

    // Python list format: ['spec1', 'spec2']
    if s.starts_with('[') {
        return s
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(',')
            .map(|spec| spec.trim().trim_matches('\'').trim_matches('"').to_string())
            .filter(|spec| !spec.is_empty() && !spec.ends_with('@'))
            .collect();
    }

    // Older comma-separated format. A comparison operator right after a
    // comma belongs to the previous spec, not a new one.
    let version_start_re = lazy_regex::regex!(r"^[><=!~]");

    let mut specs: Vec<String> = Vec::new();
    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match specs.last_mut() {
            Some(last) if version_start_re.is_match(part) => {
                *last = format!("{last},{part}");
            }
            _ => specs.push(part.to_string()),
        }
    }

    specs
        .into_iter()
        .filter(|spec| !spec.is_empty() && !spec.ends_with('@'))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    /// A sample history file matching conda's format.
    const SAMPLE_HISTORY: &str = "\
==> 2024-01-15 10:30:00 <==
# cmd: conda create -n test python=3.12
# conda version: 24.1.0
# install specs: ['python=3.12']
python-3.12.0-h1234567_0
openssl-3.2.0-h8765432_0
pip-24.0-pyhd8ed1ab_0

==> 2024-01-16 14:20:00 <==
# cmd: conda install numpy pandas
# update specs: ['numpy', 'pandas>=1.5']
+numpy-1.26.3-py312h1234567_0
+pandas-2.1.5-py312h7654321_0

==> 2024-01-17 09:00:00 <==
# cmd: conda remove pip
# remove specs: ['pip']
-pip-24.0-pyhd8ed1ab_0
";

    #[test]
    fn parse_empty() {
        assert!(History::parse_str("").unwrap().is_empty());
    }

    #[test]
    fn parse_revisions() {
        let parsed = History::parse_str(SAMPLE_HISTORY).unwrap();
        assert_eq!(parsed.len(), 3);

        let revisions = &parsed.revisions;
        assert_eq!(revisions[0].timestamp, "2024-01-15 10:30:00");
        assert_eq!(revisions[0].packages.len(), 3);
        assert!(revisions[0].packages.contains("python-3.12.0-h1234567_0"));
        assert_eq!(revisions[0].comments.len(), 3);

        assert!(revisions[1]
            .packages
            .contains("+numpy-1.26.3-py312h1234567_0"));
        assert!(revisions[2].packages.contains("-pip-24.0-pyhd8ed1ab_0"));
    }

    #[test]
    fn parse_user_requests() {
        let parsed = History::parse_str(SAMPLE_HISTORY).unwrap();
        let requests = parsed.user_requests();
        assert_eq!(requests.len(), 3);

        assert_eq!(
            requests[0].cmd.as_deref(),
            Some("conda create -n test python=3.12")
        );
        assert_eq!(requests[0].action.as_deref(), Some("install"));
        assert_eq!(requests[0].update_specs, vec!["python=3.12"]);

        assert_eq!(requests[1].update_specs, vec!["numpy", "pandas>=1.5"]);
        assert_eq!(requests[2].remove_specs, vec!["pip"]);
    }

    #[test]
    fn requested_specs_survive_removal() {
        let parsed = History::parse_str(SAMPLE_HISTORY).unwrap();
        let specs = parsed.requested_specs();
        let names: Vec<String> = specs
            .iter()
            .map(|s| s.exact_name().unwrap().as_normalized().to_string())
            .collect();
        // pip was removed again, python/numpy/pandas survive.
        assert_eq!(names, vec!["python", "numpy", "pandas"]);
    }

    #[test]
    fn requested_specs_keep_constraints() {
        let parsed = History::parse_str(SAMPLE_HISTORY).unwrap();
        let specs = parsed.requested_specs();
        let pandas = specs
            .iter()
            .find(|s| s.exact_name().unwrap().as_normalized() == "pandas")
            .unwrap();
        assert!(pandas.version.is_some());
    }

    #[test]
    fn parse_ignores_lines_before_first_header() {
        let input = "some random line\n# a comment\n==> 2024-01-01 00:00:00 <==\npkg-1.0-0\n";
        let parsed = History::parse_str(input).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.revisions[0].packages.len(), 1);
        assert!(parsed.revisions[0].comments.is_empty());
    }

    #[test]
    fn parse_specs_python_list_format() {
        assert_eq!(
            parse_specs_string("['numpy', 'pandas>=1.5']"),
            vec!["numpy", "pandas>=1.5"]
        );
    }

    #[test]
    fn parse_specs_old_comma_format() {
        assert_eq!(
            parse_specs_string("param >=1.5.1,<2.0,python>=3.5"),
            vec!["param >=1.5.1,<2.0", "python>=3.5"]
        );
    }

    #[test]
    fn write_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(dir.path());

        let rev = Revision {
            timestamp: "2024-01-15 10:30:00".to_string(),
            cmd: Some("install numpy".to_string()),
            update_specs: vec!["numpy".to_string()],
            remove_specs: vec![],
            removed: BTreeSet::new(),
            added: BTreeSet::from(["numpy-1.26.3-py312h1234567_0".to_string()]),
        };
        history.write_revision(&rev).unwrap();

        let parsed = history.parse().unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(parsed.revisions[0]
            .packages
            .contains("+numpy-1.26.3-py312h1234567_0"));

        let requests = parsed.user_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].update_specs, vec!["numpy"]);
    }

    #[test]
    fn parse_nonexistent_file() {
        let history = History::from_path("/nonexistent/path/history");
        assert!(history.parse().unwrap().is_empty());
    }

    #[test]
    fn tolerant_write_does_not_panic() {
        // The parent of the history path is a file, so the write must fail
        // and be swallowed with a warning.
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let history = History::from_path(blocker.path().join("history"));
        history.write_revision_tolerant(&Revision {
            timestamp: "2024-01-01 00:00:00".to_string(),
            ..Default::default()
        });
    }
}
