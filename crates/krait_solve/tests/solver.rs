//! End-to-end solver scenarios: request + channels + installed state in,
//! ordered transaction out.

use std::{
    str::FromStr,
    sync::{atomic::AtomicBool, atomic::Ordering, Arc},
    time::Duration,
};

use assert_matches::assert_matches;
use krait_conda_types::{
    ChannelPriority, GenericVirtualPackage, History, MatchSpec, NoArchType, PackageRecord,
    ParseStrictness, PrefixRecord, RepoDataRecord, Version,
};
use krait_solve::{SolveError, Solver, SolverTask, Transaction, UpdateModifier};
use url::Url;

const CONDA_FORGE: &str = "https://conda.anaconda.org/conda-forge";

fn record_on(channel: &str, name: &str, version: &str, build: &str, depends: &[&str]) -> RepoDataRecord {
    let mut package_record = PackageRecord::new(
        name.parse().unwrap(),
        Version::from_str(version).unwrap(),
        build.to_string(),
    );
    package_record.subdir = "linux-64".to_string();
    package_record.depends = depends.iter().map(ToString::to_string).collect();
    RepoDataRecord {
        package_record,
        file_name: format!("{name}-{version}-{build}.conda"),
        url: Url::parse(&format!(
            "{channel}/linux-64/{name}-{version}-{build}.conda"
        ))
        .unwrap(),
        channel: channel.to_string(),
    }
}

fn record(name: &str, version: &str, build: &str, depends: &[&str]) -> RepoDataRecord {
    record_on(CONDA_FORGE, name, version, build, depends)
}

fn installed(name: &str, version: &str, build: &str, depends: &[&str]) -> PrefixRecord {
    PrefixRecord::from_repodata_record(record(name, version, build, depends), vec![], None, None)
}

fn spec(s: &str) -> MatchSpec {
    MatchSpec::from_str(s, ParseStrictness::Strict).unwrap()
}

fn solve(task: SolverTask) -> Result<Transaction, SolveError> {
    Solver.solve(task)
}

fn link_names(transaction: &Transaction) -> Vec<String> {
    transaction
        .link
        .iter()
        .map(|r| r.package_record.name.as_normalized().to_string())
        .collect()
}

fn unlink_names(transaction: &Transaction) -> Vec<String> {
    transaction
        .unlink
        .iter()
        .map(|r| {
            r.repodata_record
                .package_record
                .name
                .as_normalized()
                .to_string()
        })
        .collect()
}

fn linked_version(transaction: &Transaction, name: &str) -> Option<Version> {
    transaction
        .link
        .iter()
        .find(|r| r.package_record.name.as_normalized() == name)
        .map(|r| r.package_record.version.clone())
}

/// S1: a trivial install into an empty environment links dependencies
/// before dependents.
#[test]
fn trivial_install() {
    let mut task = SolverTask::from_packages(vec![vec![
        record(
            "numpy",
            "1.24.0",
            "py310h_0",
            &["python >=3.10,<3.11", "libblas"],
        ),
        record("libblas", "3.9.0", "h_0", &[]),
        record("python", "3.10.12", "h_0", &[]),
    ]]);
    task.specs = vec![spec("numpy")];

    let transaction = solve(task).unwrap();
    assert_eq!(link_names(&transaction), vec!["python", "libblas", "numpy"]);
    assert!(transaction.unlink.is_empty());
    assert_eq!(transaction.revision.update_specs, vec!["numpy"]);
    assert!(transaction
        .revision
        .added
        .iter()
        .any(|d| d.contains("numpy-1.24.0")));
}

/// S2: under strict channel priority the higher-priority channel wins even
/// when it carries an older version.
#[test]
fn strict_channel_priority() {
    let channel_a = "https://conda.anaconda.org/channel-a";
    let channel_b = "https://conda.anaconda.org/channel-b";

    let mut task = SolverTask::from_packages(vec![
        vec![record_on(channel_a, "foo", "1.0", "h_0", &[])],
        vec![record_on(channel_b, "foo", "2.0", "h_0", &[])],
    ]);
    task.specs = vec![spec("foo")];
    task.config.channel_priority = ChannelPriority::Strict;

    let transaction = solve(task).unwrap();
    assert_eq!(transaction.link.len(), 1);
    assert_eq!(transaction.link[0].channel, channel_a);
    assert_eq!(
        transaction.link[0].package_record.version,
        Version::from_str("1.0").unwrap()
    );
}

/// S2 (flexible): channel priority ranks above version maximization, so the
/// outcome is the same.
#[test]
fn flexible_channel_priority() {
    let channel_a = "https://conda.anaconda.org/channel-a";
    let channel_b = "https://conda.anaconda.org/channel-b";

    let mut task = SolverTask::from_packages(vec![
        vec![record_on(channel_a, "foo", "1.0", "h_0", &[])],
        vec![record_on(channel_b, "foo", "2.0", "h_0", &[])],
    ]);
    task.specs = vec![spec("foo")];
    task.config.channel_priority = ChannelPriority::Flexible;

    let transaction = solve(task).unwrap();
    assert_eq!(transaction.link[0].channel, channel_a);
}

/// With channel priority disabled the higher version wins instead.
#[test]
fn disabled_channel_priority() {
    let channel_a = "https://conda.anaconda.org/channel-a";
    let channel_b = "https://conda.anaconda.org/channel-b";

    let mut task = SolverTask::from_packages(vec![
        vec![record_on(channel_a, "foo", "1.0", "h_0", &[])],
        vec![record_on(channel_b, "foo", "2.0", "h_0", &[])],
    ]);
    task.specs = vec![spec("foo")];
    task.config.channel_priority = ChannelPriority::Disabled;

    let transaction = solve(task).unwrap();
    assert_eq!(
        transaction.link[0].package_record.version,
        Version::from_str("2.0").unwrap()
    );
}

/// S3: two specs whose dependencies pin the same package to different
/// versions are reported as a conflict group.
#[test]
fn unsatisfiable_conflict() {
    let mut task = SolverTask::from_packages(vec![vec![
        record("a", "1.0", "h_0", &["c ==1"]),
        record("b", "1.0", "h_0", &["c ==2"]),
        record("c", "1.0", "h_0", &[]),
        record("c", "2.0", "h_0", &[]),
    ]]);
    task.specs = vec![spec("a"), spec("b")];

    let err = solve(task).unwrap_err();
    let conflicts = assert_matches!(err, SolveError::Unsatisfiable { conflicts } => conflicts);
    assert_eq!(conflicts.len(), 1);
    assert!(conflicts[0].contains(&"a".to_string()));
    assert!(conflicts[0].contains(&"b".to_string()));
}

/// S4: FREEZE_INSTALLED first tries to upgrade the requested package with
/// everything else pinned; when that fails the pins are dropped and the
/// dependency moves too.
#[test]
fn update_with_freeze_retries() {
    let mut task = SolverTask::from_packages(vec![vec![
        record("numpy", "1.20.0", "py39_0", &["python >=3.9,<3.10"]),
        record("numpy", "1.24.0", "py310_0", &["python >=3.10,<3.11"]),
        record("python", "3.9.5", "h_0", &[]),
        record("python", "3.10.12", "h_0", &[]),
        record("libopenblas", "0.3.18", "h_0", &[]),
    ]]);
    task.installed_packages = vec![
        installed("numpy", "1.20.0", "py39_0", &["python >=3.9,<3.10"]),
        installed("python", "3.9.5", "h_0", &[]),
        installed("libopenblas", "0.3.18", "h_0", &[]),
    ];
    task.specs = vec![spec("numpy")];
    task.config.update_modifier = UpdateModifier::FreezeInstalled;

    let transaction = solve(task).unwrap();
    assert_eq!(
        linked_version(&transaction, "numpy"),
        Some(Version::from_str("1.24.0").unwrap())
    );
    assert_eq!(
        linked_version(&transaction, "python"),
        Some(Version::from_str("3.10.12").unwrap())
    );
    // numpy is a leaf so it unlinks before python; python links before
    // numpy.
    assert_eq!(unlink_names(&transaction), vec!["numpy", "python"]);
    assert_eq!(link_names(&transaction), vec!["python", "numpy"]);
}

/// FREEZE_INSTALLED keeps the environment still when the request is
/// satisfiable inside the frozen state.
#[test]
fn freeze_keeps_unrelated_packages() {
    let mut task = SolverTask::from_packages(vec![vec![
        record("flask", "2.0.0", "py_0", &[]),
        record("requests", "2.28.0", "py_0", &[]),
        record("requests", "2.31.0", "py_0", &[]),
    ]]);
    task.installed_packages = vec![installed("flask", "2.0.0", "py_0", &[])];
    task.specs = vec![spec("requests")];
    task.config.update_modifier = UpdateModifier::FreezeInstalled;

    let transaction = solve(task).unwrap();
    assert_eq!(link_names(&transaction), vec!["requests"]);
    assert_eq!(
        linked_version(&transaction, "requests"),
        Some(Version::from_str("2.31.0").unwrap())
    );
    assert!(transaction.unlink.is_empty());
}

/// S5: UPDATE_ALL drops the version constraints of the installed packages
/// and upgrades the whole environment.
#[test]
fn update_all_upgrades_everything() {
    let history = History::parse_str(
        "==> 2024-01-01 00:00:00 <==\n# cmd: install a\n# install specs: ['a']\n+a-1.0-h_0\n",
    )
    .unwrap();

    let mut task = SolverTask::from_packages(vec![vec![
        record("a", "2.0", "h_0", &["b >=2"]),
        record("b", "2.0", "h_0", &[]),
    ]]);
    task.installed_packages = vec![
        installed("a", "1.0", "h_0", &["b"]),
        installed("b", "1.0", "h_0", &[]),
    ];
    task.history = history;
    task.config.update_modifier = UpdateModifier::UpdateAll;

    let transaction = solve(task).unwrap();
    assert_eq!(
        linked_version(&transaction, "a"),
        Some(Version::from_str("2.0").unwrap())
    );
    assert_eq!(
        linked_version(&transaction, "b"),
        Some(Version::from_str("2.0").unwrap())
    );
}

/// S6: a pinned python line restricts the solution; conflicting requests
/// against the pin are unsatisfiable.
#[test]
fn pinned_package_restricts_python() {
    let index = vec![
        record("requests", "2.28.0", "py_0", &["python"]),
        record("python", "3.10.12", "h_0", &[]),
        record("python", "3.11.4", "h_0", &[]),
    ];

    let mut task = SolverTask::from_packages(vec![index.clone()]);
    task.specs = vec![spec("requests")];
    task.config.pinned_packages = vec![spec("python=3.10")];

    let transaction = solve(task).unwrap();
    assert_eq!(
        linked_version(&transaction, "python"),
        Some(Version::from_str("3.10.12").unwrap())
    );

    // Requesting a python that contradicts the pin cannot be satisfied.
    let mut task = SolverTask::from_packages(vec![index]);
    task.specs = vec![spec("python=3.11")];
    task.config.pinned_packages = vec![spec("python=3.10")];

    let err = solve(task).unwrap_err();
    let conflicts = assert_matches!(err, SolveError::Unsatisfiable { conflicts } => conflicts);
    assert!(conflicts[0].iter().any(|s| s.contains("python")));
}

/// S7: an unsatisfiable virtual package dependency surfaces as a conflict.
#[test]
fn virtual_package_gates_candidates() {
    let mut task = SolverTask::from_packages(vec![vec![record(
        "tensorflow-gpu",
        "2.10.0",
        "h_0",
        &["__cuda >=11"],
    )]]);
    task.virtual_packages = vec![GenericVirtualPackage {
        name: "__cuda".parse().unwrap(),
        version: Version::from_str("10.2").unwrap(),
        build_string: "0".to_string(),
    }];
    task.specs = vec![spec("tensorflow-gpu")];

    let err = solve(task).unwrap_err();
    let conflicts = assert_matches!(err, SolveError::Unsatisfiable { conflicts } => conflicts);
    assert!(conflicts[0].iter().any(|s| s.contains("tensorflow-gpu")));
}

/// The virtual package satisfies the gate when its version is recent
/// enough.
#[test]
fn virtual_package_satisfies_dependency() {
    let mut task = SolverTask::from_packages(vec![vec![record(
        "tensorflow-gpu",
        "2.10.0",
        "h_0",
        &["__cuda >=11"],
    )]]);
    task.virtual_packages = vec![GenericVirtualPackage {
        name: "__cuda".parse().unwrap(),
        version: Version::from_str("11.7").unwrap(),
        build_string: "0".to_string(),
    }];
    task.specs = vec![spec("tensorflow-gpu")];

    let transaction = solve(task).unwrap();
    // The virtual package itself never appears in the plan.
    assert_eq!(link_names(&transaction), vec!["tensorflow-gpu"]);
}

/// Invariant 5: when the solution equals the installed state the
/// transaction is empty and carries an empty revision.
#[test]
fn idempotent_solve_produces_empty_transaction() {
    let index = vec![
        record("numpy", "1.24.0", "py310h_0", &["python >=3.10,<3.11"]),
        record("python", "3.10.12", "h_0", &[]),
    ];
    let mut task = SolverTask::from_packages(vec![index]);
    task.installed_packages = vec![
        installed("numpy", "1.24.0", "py310h_0", &["python >=3.10,<3.11"]),
        installed("python", "3.10.12", "h_0", &[]),
    ];
    task.specs = vec![spec("numpy")];

    let transaction = solve(task).unwrap();
    assert!(transaction.is_empty());
    assert!(transaction.revision.is_empty());
}

/// SPECS_SATISFIED_SKIP_SOLVE returns the identity transaction without
/// touching the index at all.
#[test]
fn specs_satisfied_skips_solve() {
    let mut task = SolverTask::from_packages(vec![]);
    task.installed_packages = vec![installed("numpy", "1.24.0", "py310h_0", &[])];
    task.specs = vec![spec("numpy")];
    task.config.update_modifier = UpdateModifier::SpecsSatisfiedSkipSolve;

    let transaction = solve(task).unwrap();
    assert!(transaction.is_empty());
}

/// Removal unlinks the package but keeps the remaining environment alone.
#[test]
fn removal_unlinks_only_the_target() {
    let mut task = SolverTask::from_packages(vec![vec![
        record("a", "1.0", "h_0", &[]),
        record("b", "1.0", "h_0", &[]),
    ]]);
    task.installed_packages = vec![
        installed("a", "1.0", "h_0", &[]),
        installed("b", "1.0", "h_0", &[]),
    ];
    task.specs_to_remove = vec![spec("a")];

    let transaction = solve(task).unwrap();
    assert_eq!(unlink_names(&transaction), vec!["a"]);
    assert!(transaction.link.is_empty());
    assert_eq!(transaction.revision.remove_specs, vec!["a"]);
}

/// History-derived specs keep restricting later solves: a python line
/// requested in the past still applies.
#[test]
fn history_specs_survive() {
    let history = History::parse_str(
        "==> 2024-01-01 00:00:00 <==\n# cmd: install python\n# install specs: ['python=3.10']\n+python-3.10.12-h_0\n",
    )
    .unwrap();

    let mut task = SolverTask::from_packages(vec![vec![
        record("requests", "2.28.0", "py_0", &["python"]),
        record("python", "3.10.12", "h_0", &[]),
        record("python", "3.11.4", "h_0", &[]),
    ]]);
    task.history = history;
    task.specs = vec![spec("requests")];

    let transaction = solve(task).unwrap();
    assert_eq!(
        linked_version(&transaction, "python"),
        Some(Version::from_str("3.10.12").unwrap())
    );
}

/// UPDATE_DEPS relaxes the history constraints of the dependencies of the
/// requested package so they can move.
#[test]
fn update_deps_relaxes_dependency_history() {
    let history = History::parse_str(
        "==> 2024-01-01 00:00:00 <==\n# cmd: install a b\n# install specs: ['a', 'b=1']\n+a-1.0-h_0\n+b-1.0-h_0\n",
    )
    .unwrap();

    let index = vec![
        record("a", "1.0", "h_0", &["b"]),
        record("a", "2.0", "h_0", &["b >=2"]),
        record("b", "1.0", "h_0", &[]),
        record("b", "2.0", "h_0", &[]),
    ];
    let installed_packages = vec![
        installed("a", "1.0", "h_0", &["b"]),
        installed("b", "1.0", "h_0", &[]),
    ];

    // Under UPDATE_SPECS the historical `b=1` keeps a at 1.0.
    let mut task = SolverTask::from_packages(vec![index.clone()]);
    task.history = history.clone();
    task.installed_packages = installed_packages.clone();
    task.specs = vec![spec("a")];
    task.config.update_modifier = UpdateModifier::UpdateSpecs;
    let transaction = solve(task).unwrap();
    assert_eq!(linked_version(&transaction, "a"), None);

    // Under UPDATE_DEPS the b constraint is relaxed and both move.
    let mut task = SolverTask::from_packages(vec![index]);
    task.history = history;
    task.installed_packages = installed_packages;
    task.specs = vec![spec("a")];
    task.config.update_modifier = UpdateModifier::UpdateDeps;
    let transaction = solve(task).unwrap();
    assert_eq!(
        linked_version(&transaction, "a"),
        Some(Version::from_str("2.0").unwrap())
    );
    assert_eq!(
        linked_version(&transaction, "b"),
        Some(Version::from_str("2.0").unwrap())
    );
}

/// Aggressive-update packages escape freezing and never downgrade.
#[test]
fn aggressive_update_wins_over_freeze() {
    let mut task = SolverTask::from_packages(vec![vec![
        record("openssl", "1.0.0", "h_0", &[]),
        record("openssl", "1.1.0", "h_0", &[]),
        record("openssl", "3.0.0", "h_0", &[]),
        record("foo", "1.0", "h_0", &[]),
    ]]);
    task.installed_packages = vec![installed("openssl", "1.1.0", "h_0", &[])];
    task.specs = vec![spec("foo")];
    task.config.update_modifier = UpdateModifier::FreezeInstalled;
    task.config.aggressive_update_packages = vec![spec("openssl")];

    let transaction = solve(task).unwrap();
    assert_eq!(
        linked_version(&transaction, "openssl"),
        Some(Version::from_str("3.0.0").unwrap())
    );
}

/// Feature-carrying variants lose against plain variants of the same
/// version.
#[test]
fn track_features_are_minimized() {
    let mut tracked = record("blas", "1.0", "mkl_0", &[]);
    tracked.package_record.track_features = vec!["mkl".to_string()];

    let mut task =
        SolverTask::from_packages(vec![vec![tracked, record("blas", "1.0", "openblas_0", &[])]]);
    task.specs = vec![spec("blas")];

    let transaction = solve(task).unwrap();
    assert_eq!(transaction.link.len(), 1);
    assert_eq!(transaction.link[0].package_record.build, "openblas_0");
}

/// Specs without candidates surface the channels that were searched.
#[test]
fn missing_package_reports_channels() {
    let mut task =
        SolverTask::from_packages(vec![vec![record("present", "1.0", "h_0", &[])]]);
    task.specs = vec![spec("doesnotexist")];

    let err = solve(task).unwrap_err();
    let (specs, channels) = assert_matches!(
        err,
        SolveError::PackagesNotFound { specs, channels } => (specs, channels)
    );
    assert_eq!(specs, vec!["doesnotexist"]);
    assert_eq!(channels, vec![CONDA_FORGE.to_string()]);
}

/// A raised cancellation flag terminates the solve cooperatively.
#[test]
fn cancellation_is_cooperative() {
    let cancel = Arc::new(AtomicBool::new(false));
    cancel.store(true, Ordering::Relaxed);

    let mut task = SolverTask::from_packages(vec![vec![record("foo", "1.0", "h_0", &[])]]);
    task.specs = vec![spec("foo")];
    task.cancel = Some(cancel);

    assert_matches!(solve(task), Err(SolveError::Cancelled));
}

/// A zero deadline produces a timeout.
#[test]
fn timeout_is_reported() {
    let mut task = SolverTask::from_packages(vec![vec![record("foo", "1.0", "h_0", &[])]]);
    task.specs = vec![spec("foo")];
    task.config.timeout = Some(Duration::ZERO);

    assert_matches!(solve(task), Err(SolveError::Timeout { .. }));
}

/// Invariant 7: for every link action, all its dependencies appear earlier
/// in the link list (none are installed here).
#[test]
fn long_dependency_chains_link_in_order() {
    let mut records = vec![record("pkg0", "1.0", "h_0", &[])];
    for i in 1..10 {
        let dep = format!("pkg{}", i - 1);
        records.push(record(
            &format!("pkg{i}"),
            "1.0",
            "h_0",
            &[dep.as_str()],
        ));
    }

    let mut task = SolverTask::from_packages(vec![records]);
    task.specs = vec![spec("pkg9")];

    let transaction = solve(task).unwrap();
    let names = link_names(&transaction);
    assert_eq!(names.len(), 10);
    for i in 1..10 {
        let dep_position = names
            .iter()
            .position(|n| n == &format!("pkg{}", i - 1))
            .unwrap();
        let position = names.iter().position(|n| n == &format!("pkg{i}")).unwrap();
        assert!(dep_position < position, "pkg{i} linked before its dependency");
    }
}

/// Invariant 9: python links before noarch python packages and unlinks
/// after them.
#[test]
fn python_brackets_noarch_packages() {
    let mut noarch = record("six", "1.16.0", "pyhd_0", &["python"]);
    noarch.package_record.noarch = NoArchType::python();

    let mut task = SolverTask::from_packages(vec![vec![
        noarch.clone(),
        record("python", "3.10.12", "h_0", &[]),
    ]]);
    task.specs = vec![spec("six")];
    let transaction = solve(task).unwrap();
    assert_eq!(link_names(&transaction), vec!["python", "six"]);

    // Removing everything unlinks python last.
    let mut task = SolverTask::from_packages(vec![vec![]]);
    task.installed_packages = vec![
        PrefixRecord::from_repodata_record(noarch, vec![], None, None),
        installed("python", "3.10.12", "h_0", &[]),
    ];
    task.specs_to_remove = vec![spec("six"), spec("python")];
    let transaction = solve(task).unwrap();
    assert_eq!(unlink_names(&transaction), vec!["six", "python"]);
}

/// The constrains field restricts versions without forcing installation.
#[test]
fn constrains_restrict_without_installing() {
    let mut constrainer = record("apple", "1.0", "h_0", &[]);
    constrainer.package_record.constrains = vec!["banana <2".to_string()];

    let index = vec![
        constrainer,
        record("banana", "1.0", "h_0", &[]),
        record("banana", "2.0", "h_0", &[]),
    ];

    // Requesting apple alone does not install banana.
    let mut task = SolverTask::from_packages(vec![index.clone()]);
    task.specs = vec![spec("apple")];
    let transaction = solve(task).unwrap();
    assert_eq!(link_names(&transaction), vec!["apple"]);

    // Requesting both keeps banana below the constraint.
    let mut task = SolverTask::from_packages(vec![index]);
    task.specs = vec![spec("apple"), spec("banana")];
    let transaction = solve(task).unwrap();
    assert_eq!(
        linked_version(&transaction, "banana"),
        Some(Version::from_str("1.0").unwrap())
    );
}

/// Invariant 6 (monotonicity): dropping a spec from an otherwise successful
/// request cannot make the solve fail.
#[test]
fn removing_a_spec_keeps_the_solve_succeeding() {
    let index = vec![
        record("a", "1.0", "h_0", &["c"]),
        record("b", "1.0", "h_0", &["c"]),
        record("c", "1.0", "h_0", &[]),
    ];

    let mut task = SolverTask::from_packages(vec![index.clone()]);
    task.specs = vec![spec("a"), spec("b")];
    assert!(solve(task).is_ok());

    let mut task = SolverTask::from_packages(vec![index]);
    task.specs = vec![spec("a")];
    assert!(solve(task).is_ok());
}
