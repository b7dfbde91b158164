use fxhash::FxHashMap;
use krait_conda_types::{
    GenericVirtualPackage, MatchSpec, Matches, PackageName, PackageRecord, ParseMatchSpecError,
    ParseStrictness, PrefixRecord, RepoDataRecord,
};
use url::Url;

use crate::{
    arena::{Arena, ArenaId},
    id::{NameId, SolvableId, SpecId},
};

/// A pool that interns all data participating in a single solve: package
/// names, match specs and candidate records ("solvables").
///
/// The ids handed out by the pool double as the variables of the SAT
/// problem, so the whole encoding works on dense integers instead of
/// records and strings.
pub(crate) struct Pool {
    /// All the solvables that have been registered.
    pub(crate) solvables: Arena<SolvableId, Solvable>,

    /// Interned package names.
    package_names: Arena<NameId, PackageName>,

    /// Map from package names to the id of their interned counterpart.
    names_to_ids: FxHashMap<PackageName, NameId>,

    /// Map from interned package names to the solvables with that name.
    packages_by_name: Vec<Vec<SolvableId>>,

    /// Interned match specs.
    specs: Arena<SpecId, MatchSpec>,

    /// Map from match spec strings to the id of their interned counterpart.
    specs_to_ids: FxHashMap<String, SpecId>,

    /// Map from a record identity to its solvable, used to collapse the
    /// `.tar.bz2` and `.conda` variants of the same build into one
    /// candidate.
    by_identity: FxHashMap<String, SolvableId>,
}

/// A single candidate record registered in the [`Pool`], together with its
/// parsed dependencies and its provenance.
pub(crate) struct Solvable {
    /// The record this solvable represents.
    pub record: RepoDataRecord,

    /// The interned name of the record.
    pub name: NameId,

    /// The parsed `depends` of the record.
    pub dependencies: Vec<SpecId>,

    /// The parsed `constrains` of the record.
    pub constrains: Vec<SpecId>,

    /// The priority index of the channel this record came from (0 is the
    /// highest priority), or `None` for installed records and virtual
    /// packages which do not take part in channel priority.
    pub channel_priority: Option<u32>,

    /// True if this solvable describes a record that is currently installed
    /// in the target prefix.
    pub installed: bool,
}

impl Pool {
    pub(crate) fn new() -> Self {
        Self {
            solvables: Arena::new(),
            package_names: Arena::new(),
            names_to_ids: FxHashMap::default(),
            packages_by_name: Vec::new(),
            specs: Arena::new(),
            specs_to_ids: FxHashMap::default(),
            by_identity: FxHashMap::default(),
        }
    }

    /// Adds a repodata record to the pool. Returns `Err` when one of the
    /// record's dependency strings does not parse; the caller decides
    /// whether that drops the record or fails the solve.
    ///
    /// When both archive formats of the same build are present only one of
    /// them is kept, determined by `prefer_conda_format`.
    pub(crate) fn add_repodata_record(
        &mut self,
        record: RepoDataRecord,
        channel_priority: Option<u32>,
        installed: bool,
        prefer_conda_format: bool,
    ) -> Result<Option<SolvableId>, ParseMatchSpecError> {
        let dependencies = parse_specs(&record.package_record.depends, &mut self.specs, &mut self.specs_to_ids)?;
        let constrains = parse_specs(&record.package_record.constrains, &mut self.specs, &mut self.specs_to_ids)?;

        let identity_key = identity_key(&record);
        if let Some(&existing_id) = self.by_identity.get(&identity_key) {
            // The same build in the other archive format. Keep whichever
            // format the configuration prefers, but never replace an
            // installed record.
            let existing = &self.solvables[existing_id];
            let existing_preferred =
                existing.record.file_name.ends_with(".conda") == prefer_conda_format;
            let new_preferred = record.file_name.ends_with(".conda") == prefer_conda_format;
            if !existing.installed && new_preferred && !existing_preferred {
                let name = existing.name;
                self.solvables[existing_id] = Solvable {
                    record,
                    name,
                    dependencies,
                    constrains,
                    channel_priority,
                    installed,
                };
            }
            return Ok(None);
        }

        let name = self.intern_name(&record.package_record.name);
        let solvable_id = self.solvables.alloc(Solvable {
            record,
            name,
            dependencies,
            constrains,
            channel_priority,
            installed,
        });
        self.packages_by_name[name.to_usize()].push(solvable_id);
        self.by_identity.insert(identity_key, solvable_id);
        Ok(Some(solvable_id))
    }

    /// Adds an installed record to the pool. Installed records take no part
    /// in channel priority and are marked so the solver can freeze them.
    pub(crate) fn add_installed_record(
        &mut self,
        record: &PrefixRecord,
    ) -> Result<Option<SolvableId>, ParseMatchSpecError> {
        self.add_repodata_record(record.repodata_record.clone(), None, true, false)
    }

    /// Adds a virtual package to the pool as a record without dependencies
    /// on the reserved `@virtual` channel.
    pub(crate) fn add_virtual_package(&mut self, package: &GenericVirtualPackage) -> SolvableId {
        let record = RepoDataRecord {
            package_record: {
                let mut record = PackageRecord::new(
                    package.name.clone(),
                    package.version.clone(),
                    package.build_string.clone(),
                );
                record.subdir = "noarch".to_string();
                record
            },
            file_name: format!(
                "{}-{}-{}.virtual",
                package.name.as_normalized(),
                package.version,
                package.build_string
            ),
            url: Url::parse(&format!(
                "virtual://localhost/{}",
                package.name.as_normalized()
            ))
            .expect("virtual package names are valid url paths"),
            channel: "@virtual".to_string(),
        };

        let name = self.intern_name(&package.name);
        let solvable_id = self.solvables.alloc(Solvable {
            record,
            name,
            dependencies: Vec::new(),
            constrains: Vec::new(),
            channel_priority: None,
            installed: false,
        });
        self.packages_by_name[name.to_usize()].push(solvable_id);
        solvable_id
    }

    /// Interns a package name into the pool, returning its [`NameId`].
    pub(crate) fn intern_name(&mut self, name: &PackageName) -> NameId {
        if let Some(&id) = self.names_to_ids.get(name) {
            return id;
        }
        let id = self.package_names.alloc(name.clone());
        self.names_to_ids.insert(name.clone(), id);
        self.packages_by_name.push(Vec::new());
        id
    }

    /// Interns an already parsed match spec, returning its [`SpecId`].
    pub(crate) fn intern_match_spec(&mut self, spec: &MatchSpec) -> SpecId {
        let key = spec.to_string();
        if let Some(&id) = self.specs_to_ids.get(&key) {
            return id;
        }
        let id = self.specs.alloc(spec.clone());
        self.specs_to_ids.insert(key, id);
        id
    }

    /// Returns the match spec associated with the given id.
    pub(crate) fn spec(&self, id: SpecId) -> &MatchSpec {
        &self.specs[id]
    }

    /// Returns the solvable associated with the given id.
    pub(crate) fn solvable(&self, id: SolvableId) -> &Solvable {
        &self.solvables[id]
    }

    /// Returns the package name associated with the given id.
    pub(crate) fn package_name(&self, id: NameId) -> &PackageName {
        &self.package_names[id]
    }

    /// Looks up the id of an interned package name.
    pub(crate) fn lookup_name(&self, name: &PackageName) -> Option<NameId> {
        self.names_to_ids.get(name).copied()
    }

    /// Returns the solvables registered under the given name.
    pub(crate) fn candidates_by_name(&self, name: NameId) -> &[SolvableId] {
        &self.packages_by_name[name.to_usize()]
    }

    /// Returns the ids of all names the given spec's name matcher matches.
    /// For exact names this is a lookup, for globs a scan.
    pub(crate) fn names_matching_spec(&self, spec: SpecId) -> Vec<NameId> {
        match &self.specs[spec].name {
            Some(krait_conda_types::NameMatcher::Exact(name)) => {
                self.lookup_name(name).into_iter().collect()
            }
            Some(matcher) => self
                .package_names
                .iter()
                .filter(|(_, name)| matcher.matches(name))
                .map(|(id, _)| id)
                .collect(),
            None => self.package_names.iter().map(|(id, _)| id).collect(),
        }
    }

    /// Returns all solvables that fully match the given spec.
    pub(crate) fn candidates_matching_spec(&self, spec: SpecId) -> Vec<SolvableId> {
        let match_spec = &self.specs[spec];
        self.names_matching_spec(spec)
            .into_iter()
            .flat_map(|name| self.candidates_by_name(name).iter().copied())
            .filter(|&solvable| match_spec.matches(&self.solvables[solvable].record))
            .collect()
    }
}

/// Parses a list of spec strings, interning each of them.
fn parse_specs(
    specs: &[String],
    arena: &mut Arena<SpecId, MatchSpec>,
    ids: &mut FxHashMap<String, SpecId>,
) -> Result<Vec<SpecId>, ParseMatchSpecError> {
    specs
        .iter()
        .map(|spec_str| {
            if let Some(&id) = ids.get(spec_str.as_str()) {
                return Ok(id);
            }
            let spec = MatchSpec::from_str(spec_str, ParseStrictness::Lenient)?;
            let id = arena.alloc(spec);
            ids.insert(spec_str.clone(), id);
            Ok(id)
        })
        .collect()
}

/// The key that identifies a build independently of its archive format.
fn identity_key(record: &RepoDataRecord) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        record.channel.trim_end_matches('/'),
        record.package_record.subdir,
        record.package_record.name.as_normalized(),
        record.package_record.version,
        record.package_record.build
    )
}
