//! Orders the output of a solve into an executable sequence of unlink and
//! link steps.
//!
//! All unlinks happen before all links. Within the unlink phase packages are
//! removed leaves-first (no still-installed package may depend on an already
//! removed one), within the link phase dependencies come first. `python`
//! needs special treatment on both sides: `noarch: python` packages route
//! their files through the interpreter that is present in the prefix at link
//! time, so python is linked before them and unlinked after them.

use fxhash::{FxHashMap, FxHashSet};
use krait_conda_types::{
    MatchSpec, PackageName, ParseStrictness, PrefixRecord, RepoDataRecord, Revision,
};

/// An ordered environment update: the unlink and link actions computed from
/// the difference between the installed set and the solved set, plus the
/// history revision to persist once the transaction has been applied.
#[derive(Debug)]
pub struct Transaction {
    /// The records to remove from the prefix, in execution order.
    pub unlink: Vec<PrefixRecord>,

    /// The records to install into the prefix, in execution order.
    pub link: Vec<RepoDataRecord>,

    /// The history entry describing this transaction. Empty transactions
    /// produce an empty revision which must not be persisted.
    pub revision: Revision,
}

impl Transaction {
    /// Returns true when this transaction does not change the environment.
    pub fn is_empty(&self) -> bool {
        self.unlink.is_empty() && self.link.is_empty()
    }
}

/// An error produced when the planned order violates its own invariants.
/// This is an internal consistency check; it firing means the planner is
/// broken, not the input.
#[derive(Debug, thiserror::Error)]
#[error("transaction ordering is inconsistent: {0}")]
pub struct TransactionOrderError(pub String);

/// Computes the ordered transaction that transforms `installed` into
/// `solved`.
pub(crate) fn plan_transaction(
    installed: &[PrefixRecord],
    solved: Vec<RepoDataRecord>,
    mut revision: Revision,
) -> Result<Transaction, TransactionOrderError> {
    let solved_identities: FxHashSet<&RepoDataRecord> = solved.iter().collect();
    let installed_identities: FxHashSet<&RepoDataRecord> =
        installed.iter().map(|r| &r.repodata_record).collect();

    let to_unlink: Vec<PrefixRecord> = installed
        .iter()
        .filter(|record| !solved_identities.contains(&record.repodata_record))
        .cloned()
        .collect();
    let to_link: Vec<RepoDataRecord> = solved
        .into_iter()
        .filter(|record| !installed_identities.contains(record))
        .collect();

    let unlink = order_unlinks(to_unlink);
    let link = order_links(to_link);

    revision.removed = unlink.iter().map(|r| r.repodata_record.dist_string()).collect();
    revision.added = link.iter().map(RepoDataRecord::dist_string).collect();

    let transaction = Transaction {
        unlink,
        link,
        revision,
    };
    verify_order(&transaction, installed)?;
    Ok(transaction)
}

fn is_python(name: &PackageName) -> bool {
    name.as_normalized() == "python"
}

/// Parses the dependency names of a record; unparseable dependency strings
/// are ignored here, ordering is best effort on top of an already validated
/// solution.
fn dependency_names(record: &RepoDataRecord) -> Vec<PackageName> {
    let mut names: Vec<PackageName> = record
        .package_record
        .depends
        .iter()
        .filter_map(|dep| MatchSpec::from_str(dep, ParseStrictness::Lenient).ok())
        .filter_map(|spec| spec.exact_name().cloned())
        .collect();

    // A noarch python package implicitly routes through the interpreter.
    if record.package_record.noarch.is_python()
        && !names.iter().any(is_python)
    {
        names.push(PackageName::new_unchecked("python"));
    }

    names
}

/// The deterministic tie-break at equal topological depth: python first,
/// then name ascending, version descending.
fn link_sort_key(record: &RepoDataRecord) -> (bool, String, std::cmp::Reverse<krait_conda_types::Version>) {
    (
        !is_python(&record.package_record.name),
        record.package_record.name.as_normalized().to_string(),
        std::cmp::Reverse(record.package_record.version.clone()),
    )
}

/// Topologically sorts the records to link, dependencies before dependents.
fn order_links(records: Vec<RepoDataRecord>) -> Vec<RepoDataRecord> {
    let by_name: FxHashMap<&PackageName, usize> = records
        .iter()
        .enumerate()
        .map(|(index, record)| (&record.package_record.name, index))
        .collect();

    // dependents[i] lists the records that depend on record i.
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
    let mut in_degree: Vec<usize> = vec![0; records.len()];
    for (index, record) in records.iter().enumerate() {
        for dep_name in dependency_names(record) {
            if let Some(&dep_index) = by_name.get(&dep_name) {
                if dep_index != index {
                    dependents[dep_index].push(index);
                    in_degree[index] += 1;
                }
            }
        }
    }

    let mut remaining: FxHashSet<usize> = (0..records.len()).collect();
    let mut ordered = Vec::with_capacity(records.len());
    while !remaining.is_empty() {
        // All records whose dependencies are already placed.
        let mut ready: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&index| in_degree[index] == 0)
            .collect();

        if ready.is_empty() {
            // Dependency cycle; break it deterministically by the same sort
            // key used for ties.
            let forced = remaining
                .iter()
                .copied()
                .min_by_key(|&index| link_sort_key(&records[index]))
                .expect("remaining is non-empty");
            ready.push(forced);
        }

        ready.sort_by_key(|&index| link_sort_key(&records[index]));
        let next = ready[0];
        remaining.remove(&next);
        for &dependent in &dependents[next] {
            in_degree[dependent] = in_degree[dependent].saturating_sub(1);
        }
        ordered.push(next);
    }

    let mut slots: Vec<Option<RepoDataRecord>> = records.into_iter().map(Some).collect();
    ordered
        .into_iter()
        .map(|index| slots[index].take().expect("each index appears once"))
        .collect()
}

/// Orders the records to unlink in reverse topological order: leaves (the
/// packages nothing else depends on) first, python last.
fn order_unlinks(records: Vec<PrefixRecord>) -> Vec<PrefixRecord> {
    let by_name: FxHashMap<&PackageName, usize> = records
        .iter()
        .enumerate()
        .map(|(index, record)| (&record.repodata_record.package_record.name, index))
        .collect();

    // dependencies[i] lists the records that record i depends on; a record
    // may be unlinked only before (not after) its dependencies.
    let mut dependency_edges: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
    let mut dependent_count: Vec<usize> = vec![0; records.len()];
    for (index, record) in records.iter().enumerate() {
        for dep_name in dependency_names(&record.repodata_record) {
            if let Some(&dep_index) = by_name.get(&dep_name) {
                if dep_index != index {
                    dependency_edges[index].push(dep_index);
                    dependent_count[dep_index] += 1;
                }
            }
        }
    }

    let unlink_sort_key = |record: &PrefixRecord| {
        (
            // Python goes last within the unlink phase.
            is_python(&record.repodata_record.package_record.name),
            record
                .repodata_record
                .package_record
                .name
                .as_normalized()
                .to_string(),
            std::cmp::Reverse(record.repodata_record.package_record.version.clone()),
        )
    };

    let mut remaining: FxHashSet<usize> = (0..records.len()).collect();
    let mut ordered = Vec::with_capacity(records.len());
    while !remaining.is_empty() {
        let mut ready: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&index| dependent_count[index] == 0)
            .collect();

        if ready.is_empty() {
            let forced = remaining
                .iter()
                .copied()
                .min_by_key(|&index| unlink_sort_key(&records[index]))
                .expect("remaining is non-empty");
            ready.push(forced);
        }

        ready.sort_by_key(|&index| unlink_sort_key(&records[index]));
        let next = ready[0];
        remaining.remove(&next);
        for &dependency in &dependency_edges[next] {
            dependent_count[dependency] = dependent_count[dependency].saturating_sub(1);
        }
        ordered.push(next);
    }

    let mut slots: Vec<Option<PrefixRecord>> = records.into_iter().map(Some).collect();
    ordered
        .into_iter()
        .map(|index| slots[index].take().expect("each index appears once"))
        .collect()
}

/// Re-walks the plan and asserts its ordering invariants: every link step's
/// dependencies are either still installed (and not queued for unlink) or
/// appear earlier in the link list. Edges inside a dependency cycle cannot
/// be ordered and are exempt.
fn verify_order(
    transaction: &Transaction,
    installed: &[PrefixRecord],
) -> Result<(), TransactionOrderError> {
    let unlinked: FxHashSet<&PackageName> = transaction
        .unlink
        .iter()
        .map(|r| &r.repodata_record.package_record.name)
        .collect();

    // The names that survive the unlink phase.
    let surviving: FxHashSet<&PackageName> = installed
        .iter()
        .map(|r| &r.repodata_record.package_record.name)
        .filter(|name| !unlinked.contains(*name))
        .collect();

    let position: FxHashMap<&PackageName, usize> = transaction
        .link
        .iter()
        .enumerate()
        .map(|(index, record)| (&record.package_record.name, index))
        .collect();
    let deps_by_name: FxHashMap<&PackageName, Vec<PackageName>> = transaction
        .link
        .iter()
        .map(|record| (&record.package_record.name, dependency_names(record)))
        .collect();

    for (index, record) in transaction.link.iter().enumerate() {
        for dep_name in dependency_names(record) {
            if dep_name.is_virtual() || surviving.contains(&dep_name) {
                continue;
            }
            let Some(&dep_position) = position.get(&dep_name) else {
                continue;
            };
            if dep_position < index {
                continue;
            }
            // The dependency comes later; that is only acceptable inside a
            // dependency cycle.
            if !reaches(&dep_name, &record.package_record.name, &deps_by_name) {
                return Err(TransactionOrderError(format!(
                    "{} is linked before its dependency {}",
                    record.package_record.name.as_normalized(),
                    dep_name.as_normalized()
                )));
            }
        }
    }

    Ok(())
}

/// Returns true when `from` transitively depends on `to` within the link
/// set.
fn reaches(
    from: &PackageName,
    to: &PackageName,
    deps_by_name: &FxHashMap<&PackageName, Vec<PackageName>>,
) -> bool {
    let mut stack = vec![from.clone()];
    let mut seen: FxHashSet<PackageName> = FxHashSet::default();
    while let Some(current) = stack.pop() {
        if &current == to {
            return true;
        }
        if !seen.insert(current.clone()) {
            continue;
        }
        if let Some(deps) = deps_by_name.get(&current) {
            stack.extend(deps.iter().cloned());
        }
    }
    false
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use krait_conda_types::{
        NoArchType, PackageRecord, PrefixRecord, RepoDataRecord, Revision, Version,
    };
    use url::Url;

    use super::plan_transaction;

    fn repo_record(name: &str, version: &str, depends: &[&str]) -> RepoDataRecord {
        let mut package_record = PackageRecord::new(
            name.parse().unwrap(),
            Version::from_str(version).unwrap(),
            "0".to_string(),
        );
        package_record.subdir = "linux-64".to_string();
        package_record.depends = depends.iter().map(ToString::to_string).collect();
        RepoDataRecord {
            package_record,
            file_name: format!("{name}-{version}-0.conda"),
            url: Url::parse(&format!("https://example.com/{name}-{version}-0.conda")).unwrap(),
            channel: "https://conda.anaconda.org/conda-forge".to_string(),
        }
    }

    fn prefix_record(name: &str, version: &str, depends: &[&str]) -> PrefixRecord {
        PrefixRecord::from_repodata_record(repo_record(name, version, depends), vec![], None, None)
    }

    #[test]
    fn links_dependencies_first() {
        let solved = vec![
            repo_record("numpy", "1.24.0", &["python >=3.10,<3.11", "libblas"]),
            repo_record("libblas", "3.9.0", &[]),
            repo_record("python", "3.10.12", &[]),
        ];

        let transaction = plan_transaction(&[], solved, Revision::default()).unwrap();
        let names: Vec<&str> = transaction
            .link
            .iter()
            .map(|r| r.package_record.name.as_normalized())
            .collect();
        assert_eq!(names, vec!["python", "libblas", "numpy"]);
        assert!(transaction.unlink.is_empty());
    }

    #[test]
    fn unlinks_leaves_first() {
        let installed = vec![
            prefix_record("numpy", "1.20.0", &["python"]),
            prefix_record("python", "3.9.5", &[]),
        ];

        let transaction = plan_transaction(&installed, Vec::new(), Revision::default()).unwrap();
        let names: Vec<&str> = transaction
            .unlink
            .iter()
            .map(|r| r.repodata_record.package_record.name.as_normalized())
            .collect();
        assert_eq!(names, vec!["numpy", "python"]);
    }

    #[test]
    fn noarch_python_links_after_python() {
        let mut noarch = repo_record("six", "1.16.0", &[]);
        noarch.package_record.noarch = NoArchType::python();

        let solved = vec![noarch, repo_record("python", "3.10.12", &[])];
        let transaction = plan_transaction(&[], solved, Revision::default()).unwrap();
        let names: Vec<&str> = transaction
            .link
            .iter()
            .map(|r| r.package_record.name.as_normalized())
            .collect();
        assert_eq!(names, vec!["python", "six"]);
    }

    #[test]
    fn identity_transaction_is_empty() {
        let installed = vec![prefix_record("python", "3.10.12", &[])];
        let solved = vec![installed[0].repodata_record.clone()];

        let transaction = plan_transaction(&installed, solved, Revision::default()).unwrap();
        assert!(transaction.is_empty());
        assert!(transaction.revision.is_empty());
    }

    #[test]
    fn change_produces_unlink_and_link() {
        let installed = vec![prefix_record("numpy", "1.20.0", &[])];
        let solved = vec![repo_record("numpy", "1.24.0", &[])];

        let transaction = plan_transaction(&installed, solved, Revision::default()).unwrap();
        assert_eq!(transaction.unlink.len(), 1);
        assert_eq!(transaction.link.len(), 1);
        assert!(transaction
            .revision
            .removed
            .iter()
            .any(|d| d.contains("numpy-1.20.0")));
        assert!(transaction
            .revision
            .added
            .iter()
            .any(|d| d.contains("numpy-1.24.0")));
    }

    #[test]
    fn cycles_break_deterministically() {
        let solved = vec![
            repo_record("a", "1.0", &["b"]),
            repo_record("b", "1.0", &["a"]),
        ];
        let transaction = plan_transaction(&[], solved, Revision::default()).unwrap();
        let names: Vec<&str> = transaction
            .link
            .iter()
            .map(|r| r.package_record.name.as_normalized())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
