//! The solver driver: assembles the specs of a request, reduces the index,
//! compiles the clauses, runs the lexicographic optimization sequence and
//! plans the resulting transaction.

use std::{cmp::Ordering, collections::VecDeque, time::Instant};

use fxhash::{FxHashMap, FxHashSet};
use krait_conda_types::{
    ChannelPriority, MatchSpec, Matches, ParseStrictness, RepoDataRecord, Revision,
};

use crate::{
    arena::ArenaId,
    id::{NameId, SolvableId, SpecId},
    pool::Pool,
    reduce::{reduce_index, ReducedIndex},
    sat::{eval_objective, Interrupted, Literal, SatResult, SatSolver, SearchBudget, Var},
    transaction::{plan_transaction, Transaction},
    SolveError, SolverTask, UpdateModifier,
};

/// The entry point of this crate: drives a [`SolverTask`] through the whole
/// pipeline and returns the ordered [`Transaction`].
#[derive(Debug, Default)]
pub struct Solver;

impl Solver {
    /// Solves the given task.
    pub fn solve(&self, task: SolverTask) -> Result<Transaction, SolveError> {
        let deadline = task.config.timeout.map(|timeout| Instant::now() + timeout);

        // SPECS_SATISFIED_SKIP_SOLVE: when the request is already satisfied
        // by the installed set there is nothing to do.
        if task.config.update_modifier == UpdateModifier::SpecsSatisfiedSkipSolve
            && task.specs_to_remove.is_empty()
            && task.specs.iter().all(|spec| {
                task.installed_packages
                    .iter()
                    .any(|record| spec.matches(record))
            })
        {
            return Ok(Transaction {
                unlink: Vec::new(),
                link: Vec::new(),
                revision: revision_base(&task),
            });
        }

        let ctx = SolveContext::from_task(&task)?;
        let budget = SearchBudget {
            deadline,
            cancel: task.cancel.as_deref(),
        };

        let model = ctx.solve_with_optimization(budget)?;
        let selected = ctx.extract_records(&model);
        ctx.verify(&selected)?;

        let transaction =
            plan_transaction(&task.installed_packages, selected, revision_base(&task))?;
        Ok(transaction)
    }
}

/// The history entry a successful application of the transaction should
/// persist. The package diff is filled in by the planner.
fn revision_base(task: &SolverTask) -> Revision {
    Revision {
        timestamp: chrono::Utc::now()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        cmd: task.cmd.clone(),
        update_specs: task.specs.iter().map(ToString::to_string).collect(),
        remove_specs: task.specs_to_remove.iter().map(ToString::to_string).collect(),
        ..Revision::default()
    }
}

/// Everything a single solve works on: the interned pool, the reduced index
/// and the classified spec sets.
struct SolveContext<'t> {
    task: &'t SolverTask,
    pool: Pool,
    reduced: ReducedIndex,

    /// All specs the solution must satisfy.
    hard_specs: Vec<SpecId>,
    /// The specs of the user's request, a subset of `hard_specs`.
    requested_specs: Vec<SpecId>,
    /// The subset of `hard_specs` that is reported when candidates are
    /// missing: the request, the pins and the history specs. Name-retention
    /// specs for installed packages are excluded, their absence from the
    /// channels is not the user's problem statement.
    diagnostic_specs: Vec<SpecId>,
    /// Specs the user asked to remove; all their candidates are forbidden.
    removal_specs: Vec<SpecId>,

    /// The names the user's request refers to.
    requested_names: FxHashSet<NameId>,
    /// The names affected by the removal specs.
    removal_names: FxHashSet<NameId>,
    /// Names under the aggressive-update policy (never downgraded, exempt
    /// from freezing).
    aggressive_names: FxHashSet<NameId>,
    /// The installed solvable per name.
    installed_by_name: FxHashMap<NameId, SolvableId>,
}

impl<'t> SolveContext<'t> {
    fn from_task(task: &'t SolverTask) -> Result<Self, SolveError> {
        let mut pool = build_pool(task);

        // Classify and intern the specs. A spec that is already present is
        // not added twice.
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut hard_specs = Vec::new();
        let mut diagnostic_specs = Vec::new();

        let removal_names_by_string: FxHashSet<String> = task
            .specs_to_remove
            .iter()
            .filter_map(|spec| spec.exact_name())
            .map(|name| name.as_normalized().to_string())
            .collect();

        {
            let mut push_spec = |pool: &mut Pool, spec: &MatchSpec, diagnostic: bool| {
                let key = spec.to_string();
                if seen.insert(key) {
                    let id = pool.intern_match_spec(spec);
                    hard_specs.push(id);
                    if diagnostic {
                        diagnostic_specs.push(id);
                    }
                }
            };

            for spec in &task.specs {
                push_spec(&mut pool, spec, true);
            }

            // History: what the user asked for in the past is still
            // requested, unless this request removes or replaces it.
            if task.config.update_modifier != UpdateModifier::UpdateAll {
                let relaxed_dependency_names =
                    if task.config.update_modifier == UpdateModifier::UpdateDeps {
                        dependency_closure_names(task)
                    } else {
                        FxHashSet::default()
                    };

                for spec in task.history.requested_specs() {
                    let Some(name) = spec.exact_name() else { continue };
                    let name_str = name.as_normalized().to_string();
                    if removal_names_by_string.contains(&name_str) {
                        continue;
                    }
                    if task
                        .specs
                        .iter()
                        .any(|requested| requested.exact_name() == Some(name))
                    {
                        // The new request wins over the historical one.
                        continue;
                    }
                    if relaxed_dependency_names.contains(&name_str) {
                        // UPDATE_DEPS: only the name survives, the version
                        // constraint is dropped so the dependency can move.
                        push_spec(&mut pool, &MatchSpec::from(name.clone()), true);
                    } else {
                        push_spec(&mut pool, &spec, true);
                    }
                }
            }

            // Pinned packages are hard requirements of every solve.
            for spec in &task.config.pinned_packages {
                let removed = spec
                    .exact_name()
                    .is_some_and(|name| removal_names_by_string.contains(name.as_normalized()));
                if !removed {
                    push_spec(&mut pool, spec, true);
                }
            }

            // Installed packages stay installed (in some version) unless
            // they are being removed. Under UPDATE_ALL this is also what
            // turns every installed name into a request.
            for record in &task.installed_packages {
                let name = &record.repodata_record.package_record.name;
                if removal_names_by_string.contains(name.as_normalized()) || name.is_virtual() {
                    continue;
                }
                push_spec(&mut pool, &MatchSpec::from(name.clone()), false);
            }
        }

        let removal_specs: Vec<SpecId> = task
            .specs_to_remove
            .iter()
            .map(|spec| pool.intern_match_spec(spec))
            .collect();

        let requested_specs: Vec<SpecId> = task
            .specs
            .iter()
            .map(|spec| pool.intern_match_spec(spec))
            .collect();
        let requested_names: FxHashSet<NameId> = requested_specs
            .iter()
            .flat_map(|&spec| pool.names_matching_spec(spec))
            .collect();
        let removal_names: FxHashSet<NameId> = removal_specs
            .iter()
            .flat_map(|&spec| pool.names_matching_spec(spec))
            .collect();
        let aggressive_names: FxHashSet<NameId> = task
            .config
            .aggressive_update_packages
            .iter()
            .filter_map(|spec| spec.exact_name())
            .filter_map(|name| pool.lookup_name(name))
            .collect();

        let installed_by_name: FxHashMap<NameId, SolvableId> = pool
            .solvables
            .iter()
            .filter(|(_, solvable)| solvable.installed)
            .map(|(id, solvable)| (solvable.name, id))
            .collect();

        let reduced = reduce_index(&pool, &hard_specs, &task.config.track_features);

        let ctx = Self {
            task,
            pool,
            reduced,
            hard_specs,
            requested_specs,
            diagnostic_specs,
            removal_specs,
            requested_names,
            removal_names,
            aggressive_names,
            installed_by_name,
        };

        ctx.check_missing_packages()?;
        Ok(ctx)
    }

    /// Emits `PackagesNotFound` when a user-visible spec has no candidates
    /// left after reduction.
    fn check_missing_packages(&self) -> Result<(), SolveError> {
        let missing: Vec<String> = self
            .diagnostic_specs
            .iter()
            .filter(|&&spec| self.reduced.candidates(&self.pool, spec).is_empty())
            .map(|&spec| self.pool.spec(spec).to_string())
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        let mut channels: Vec<String> = self
            .task
            .available_packages
            .iter()
            .filter_map(|records| records.first())
            .map(|record| record.channel.clone())
            .collect();
        channels.sort();
        channels.dedup();

        Err(SolveError::PackagesNotFound {
            specs: missing,
            channels,
        })
    }

    /// Runs the initial satisfiability query (with the freeze-then-retry
    /// dance) followed by the optimization sequence, and returns the final
    /// model.
    fn solve_with_optimization(&self, budget: SearchBudget<'_>) -> Result<Vec<bool>, SolveError> {
        let mut freeze = self.task.config.update_modifier == UpdateModifier::FreezeInstalled;

        let (mut sat, mut model) = loop {
            let mut sat = self.build_sat(freeze, None);
            match sat.solve(budget) {
                Ok(SatResult::Sat(model)) => break (sat, model),
                Ok(SatResult::Unsat) if freeze => {
                    // The frozen environment cannot satisfy the request;
                    // retry with the packages free to move.
                    tracing::debug!("frozen solve unsatisfiable, retrying without freezing");
                    freeze = false;
                }
                Ok(SatResult::Unsat) => return Err(self.conflict_analysis(budget)),
                Err(interrupt) => return Err(self.map_interrupt(interrupt, None)),
            }
        };

        for (label, terms) in self.objectives() {
            if terms.is_empty() {
                continue;
            }
            if let Err(interrupt) = budget.check() {
                return Err(self.map_interrupt(interrupt, Some(&model)));
            }

            // Descend on the objective value: repeatedly demand strictly
            // less than the best known value until that becomes
            // unsatisfiable, then freeze the optimum before moving to the
            // next objective.
            let mut best = eval_objective(&terms, &model);
            while best > 0 {
                sat.push_pb(terms.iter().copied(), best - 1);
                match sat.solve(budget) {
                    Ok(SatResult::Sat(better)) => {
                        sat.pop_pb();
                        best = eval_objective(&terms, &better);
                        model = better;
                    }
                    Ok(SatResult::Unsat) => {
                        sat.pop_pb();
                        break;
                    }
                    Err(interrupt) => {
                        sat.pop_pb();
                        return Err(self.map_interrupt(interrupt, Some(&model)));
                    }
                }
            }
            sat.push_pb(terms.iter().copied(), best);
            tracing::debug!("objective '{label}' fixed at {best}");
        }

        Ok(model)
    }

    /// Compiles the problem into a fresh SAT solver. `relax` removes the
    /// clauses of the given hard specs; conflict analysis probes subsets of
    /// the problem this way.
    fn build_sat(&self, freeze: bool, relax: Option<&FxHashSet<SpecId>>) -> SatSolver {
        let pool = &self.pool;
        let mut sat = SatSolver::new(pool.solvables.len());

        // Group the kept candidates by name and rank them.
        let mut by_name: FxHashMap<NameId, Vec<SolvableId>> = FxHashMap::default();
        for solvable in self.reduced.solvables() {
            by_name
                .entry(pool.solvable(solvable).name)
                .or_default()
                .push(solvable);
        }
        for candidates in by_name.values_mut() {
            candidates.sort_by(|&a, &b| self.compare_candidates(a, b));
        }

        // The engine decides variables to false in this order, so the last
        // surviving literal of an exactly-one group is the best ranked
        // candidate: worst candidates first.
        let mut names: Vec<NameId> = by_name.keys().copied().collect();
        names.sort();
        let mut decision_order: Vec<Var> = Vec::new();
        for &name in &names {
            decision_order.extend(by_name[&name].iter().rev().map(|id| id.to_usize()));
        }
        sat.set_decision_order(decision_order);

        // At most one candidate per name.
        for candidates in by_name.values() {
            for (i, &a) in candidates.iter().enumerate() {
                for &b in &candidates[i + 1..] {
                    sat.add_clause([
                        Literal::negative(a.to_usize()),
                        Literal::negative(b.to_usize()),
                    ]);
                }
            }
        }

        for solvable_id in self.reduced.solvables() {
            let solvable = pool.solvable(solvable_id);

            // A selected record needs one candidate per dependency.
            for &dep in &solvable.dependencies {
                let mut literals = vec![Literal::negative(solvable_id.to_usize())];
                literals.extend(
                    self.reduced
                        .candidates(pool, dep)
                        .into_iter()
                        .map(|candidate| Literal::positive(candidate.to_usize())),
                );
                sat.add_clause(literals);
            }

            // A constraint does not force a package in, but if a candidate
            // of the constrained name is selected it must comply.
            for &constraint in &solvable.constrains {
                for name in pool.names_matching_spec(constraint) {
                    let Some(candidates) = by_name.get(&name) else {
                        continue;
                    };
                    for &other in candidates {
                        if !pool.spec(constraint).matches(&pool.solvable(other).record) {
                            sat.add_clause([
                                Literal::negative(solvable_id.to_usize()),
                                Literal::negative(other.to_usize()),
                            ]);
                        }
                    }
                }
            }
        }

        // One positive disjunction per hard spec.
        for &spec in &self.hard_specs {
            if relax.is_some_and(|relaxed| relaxed.contains(&spec)) {
                continue;
            }
            sat.add_clause(
                self.reduced
                    .candidates(pool, spec)
                    .into_iter()
                    .map(|candidate| Literal::positive(candidate.to_usize())),
            );
        }

        // Records explicitly requested for removal are negated.
        for &spec in &self.removal_specs {
            for candidate in pool.candidates_matching_spec(spec) {
                sat.add_clause([Literal::negative(candidate.to_usize())]);
            }
        }

        // Strict channel priority: forbid candidates from any channel of
        // lower priority than the best channel providing the name.
        // Installed records and virtual packages are exempt.
        if self.task.config.channel_priority == ChannelPriority::Strict {
            for candidates in by_name.values() {
                let best_priority = candidates
                    .iter()
                    .filter_map(|&candidate| pool.solvable(candidate).channel_priority)
                    .min();
                let Some(best_priority) = best_priority else {
                    continue;
                };
                for &candidate in candidates {
                    if pool.solvable(candidate).channel_priority > Some(best_priority) {
                        sat.add_clause([Literal::negative(candidate.to_usize())]);
                    }
                }
            }
        }

        // Aggressive-update packages must not be downgraded below the
        // installed version.
        for (&name, &installed) in &self.installed_by_name {
            if !self.aggressive_names.contains(&name) {
                continue;
            }
            let installed_version = &pool.solvable(installed).record.package_record.version;
            if let Some(candidates) = by_name.get(&name) {
                for &candidate in candidates {
                    if &pool.solvable(candidate).record.package_record.version < installed_version
                    {
                        sat.add_clause([Literal::negative(candidate.to_usize())]);
                    }
                }
            }
        }

        // FREEZE_INSTALLED pins every installed record exactly, except the
        // names the request or the aggressive-update policy wants to move.
        if freeze {
            for (&name, &installed) in &self.installed_by_name {
                if self.requested_names.contains(&name)
                    || self.aggressive_names.contains(&name)
                    || self.removal_names.contains(&name)
                {
                    continue;
                }
                sat.add_clause([Literal::positive(installed.to_usize())]);
            }

            // The frozen attempt must give the user the best version of
            // what they asked for; it is only when that fails that the rest
            // of the environment is allowed to move. Restrict each
            // requested spec to its highest-version candidates.
            for &spec in &self.requested_specs {
                let candidates = self.reduced.candidates(pool, spec);
                let Some(best_version) = candidates
                    .iter()
                    .map(|&candidate| &pool.solvable(candidate).record.package_record.version)
                    .max()
                else {
                    continue;
                };
                let best_version = best_version.clone();
                sat.add_clause(
                    candidates
                        .into_iter()
                        .filter(|&candidate| {
                            pool.solvable(candidate).record.package_record.version == best_version
                        })
                        .map(|candidate| Literal::positive(candidate.to_usize())),
                );
            }
        }

        sat
    }

    /// The candidate preference used for the decision order: installed
    /// first, then feature-free, higher-priority channel, higher version,
    /// higher build, newer timestamp.
    fn compare_candidates(&self, a: SolvableId, b: SolvableId) -> Ordering {
        let a_solvable = self.pool.solvable(a);
        let b_solvable = self.pool.solvable(b);
        let a_record = &a_solvable.record.package_record;
        let b_record = &b_solvable.record.package_record;

        b_solvable
            .installed
            .cmp(&a_solvable.installed)
            .then_with(|| {
                a_record
                    .track_features
                    .len()
                    .cmp(&b_record.track_features.len())
            })
            .then_with(|| {
                a_solvable
                    .channel_priority
                    .unwrap_or(0)
                    .cmp(&b_solvable.channel_priority.unwrap_or(0))
            })
            .then_with(|| b_record.version.cmp(&a_record.version))
            .then_with(|| b_record.build_number.cmp(&a_record.build_number))
            .then_with(|| b_record.timestamp.cmp(&a_record.timestamp))
            .then_with(|| a.cmp(&b))
    }

    /// The lexicographic optimization sequence: each objective is a weighted
    /// sum over the candidate variables that gets minimized and then frozen.
    fn objectives(&self) -> Vec<(&'static str, Vec<(Var, u64)>)> {
        let pool = &self.pool;
        let forced_features: FxHashSet<&str> = self
            .task
            .config
            .track_features
            .iter()
            .map(String::as_str)
            .collect();

        // The kept, non-virtual candidates grouped by name.
        let mut by_name: FxHashMap<NameId, Vec<SolvableId>> = FxHashMap::default();
        for solvable in self.reduced.solvables() {
            if pool.solvable(solvable).record.channel == "@virtual" {
                continue;
            }
            by_name
                .entry(pool.solvable(solvable).name)
                .or_default()
                .push(solvable);
        }

        let mut channel_priority = Vec::new();
        let mut version_rank = Vec::new();
        let mut build_rank = Vec::new();
        let mut track_feature_count = Vec::new();
        let mut feature_count = Vec::new();
        let mut package_count = Vec::new();
        let mut timestamp_rank = Vec::new();

        for candidates in by_name.values() {
            // Ranks per name: the best value gets weight zero.
            let mut versions: Vec<_> = candidates
                .iter()
                .map(|&c| &pool.solvable(c).record.package_record.version)
                .collect();
            versions.sort();
            versions.dedup();

            let mut builds: Vec<_> = candidates
                .iter()
                .map(|&c| pool.solvable(c).record.package_record.build_number)
                .collect();
            builds.sort_unstable();
            builds.dedup();

            let mut timestamps: Vec<_> = candidates
                .iter()
                .map(|&c| pool.solvable(c).record.package_record.timestamp)
                .collect();
            timestamps.sort_unstable();
            timestamps.dedup();

            for &candidate in candidates {
                let record = &pool.solvable(candidate).record.package_record;
                let var = candidate.to_usize();

                if let Some(priority) = pool.solvable(candidate).channel_priority {
                    channel_priority.push((var, u64::from(priority)));
                }

                let version_position = versions
                    .iter()
                    .rev()
                    .position(|&v| v == &record.version)
                    .expect("the candidate's own version is ranked");
                version_rank.push((var, version_position as u64));

                let build_position = builds
                    .iter()
                    .rev()
                    .position(|&b| b == record.build_number)
                    .expect("the candidate's own build number is ranked");
                build_rank.push((var, build_position as u64));

                let tracked = record
                    .track_features
                    .iter()
                    .filter(|feature| !forced_features.contains(feature.as_str()))
                    .count();
                track_feature_count.push((var, tracked as u64));

                let features = record
                    .features_set()
                    .iter()
                    .filter(|feature| !forced_features.contains(**feature))
                    .count();
                feature_count.push((var, features as u64));

                package_count.push((var, 1));

                let timestamp_position = timestamps
                    .iter()
                    .rev()
                    .position(|&t| t == record.timestamp)
                    .expect("the candidate's own timestamp is ranked");
                timestamp_rank.push((var, timestamp_position as u64));
            }
        }

        let mut objectives = Vec::new();
        if self.task.config.channel_priority == ChannelPriority::Flexible {
            objectives.push(("channel-priority", channel_priority));
        }
        objectives.push(("version", version_rank));
        objectives.push(("build-number", build_rank));
        objectives.push(("track-features", track_feature_count));
        objectives.push(("features", feature_count));
        objectives.push(("package-count", package_count));
        objectives.push(("timestamp", timestamp_rank));
        objectives
    }

    /// Finds a minimal set of specs that cannot be satisfied together. The
    /// relaxation order is a breadth-first walk over dependency edges
    /// starting from the user's request, so the reported group stays close
    /// to what the user typed.
    fn conflict_analysis(&self, budget: SearchBudget<'_>) -> SolveError {
        let order = self.specs_in_bfs_order();

        let mut relaxed: FxHashSet<SpecId> = FxHashSet::default();
        for &spec in &order {
            relaxed.insert(spec);
            let mut sat = self.build_sat(false, Some(&relaxed));
            match sat.solve(budget) {
                // Still unsatisfiable without this spec: it is not part of
                // the conflict.
                Ok(SatResult::Unsat) => {}
                // Removing it resolves the conflict, so it belongs to the
                // core.
                Ok(SatResult::Sat(_)) => {
                    relaxed.remove(&spec);
                }
                Err(interrupt) => return self.map_interrupt(interrupt, None),
            }
        }

        let core: Vec<String> = order
            .iter()
            .filter(|spec| !relaxed.contains(spec))
            .map(|&spec| self.pool.spec(spec).to_string())
            .collect();

        SolveError::Unsatisfiable {
            conflicts: vec![core],
        }
    }

    /// Orders the hard specs by the distance of their names from the user's
    /// request along dependency edges.
    fn specs_in_bfs_order(&self) -> Vec<SpecId> {
        let pool = &self.pool;

        // Breadth-first depth per name, seeded with the requested names.
        let mut depth: FxHashMap<NameId, usize> = FxHashMap::default();
        let mut queue: VecDeque<NameId> = VecDeque::new();
        for &name in &self.requested_names {
            depth.insert(name, 0);
            queue.push_back(name);
        }
        while let Some(name) = queue.pop_front() {
            let next_depth = depth[&name] + 1;
            for &solvable in pool.candidates_by_name(name) {
                for &dep in &pool.solvable(solvable).dependencies {
                    for dep_name in pool.names_matching_spec(dep) {
                        if !depth.contains_key(&dep_name) {
                            depth.insert(dep_name, next_depth);
                            queue.push_back(dep_name);
                        }
                    }
                }
            }
        }

        let spec_depth = |spec: SpecId| {
            pool.names_matching_spec(spec)
                .into_iter()
                .filter_map(|name| depth.get(&name).copied())
                .min()
                .unwrap_or(usize::MAX)
        };

        let mut order = self.hard_specs.clone();
        order.sort_by_key(|&spec| (spec_depth(spec), pool.spec(spec).to_string()));
        order
    }

    /// Collects the records selected by a model, skipping virtual packages.
    fn extract_records(&self, model: &[bool]) -> Vec<RepoDataRecord> {
        self.reduced
            .solvables()
            .filter(|solvable| model[solvable.to_usize()])
            .map(|solvable| self.pool.solvable(solvable).record.clone())
            .filter(|record| record.channel != "@virtual")
            .collect()
    }

    /// Re-checks the final model: every hard spec must be satisfied by a
    /// selected record (the at-most-one clauses guarantee there is exactly
    /// one per name).
    fn verify(&self, selected: &[RepoDataRecord]) -> Result<(), SolveError> {
        for &spec in &self.hard_specs {
            let match_spec = self.pool.spec(spec);
            let satisfied = selected.iter().any(|record| match_spec.matches(record))
                || self.virtual_satisfies(match_spec);
            if !satisfied {
                return Err(SolveError::SolverInconsistency(format!(
                    "spec '{match_spec}' is not satisfied by the solution"
                )));
            }
        }
        Ok(())
    }

    /// Returns true when the spec is satisfied by one of the virtual
    /// packages, which never appear in the extracted record set.
    fn virtual_satisfies(&self, spec: &MatchSpec) -> bool {
        spec.is_virtual()
            && self
                .task
                .virtual_packages
                .iter()
                .any(|package| spec.matches(package))
    }

    fn map_interrupt(&self, interrupt: Interrupted, model: Option<&[bool]>) -> SolveError {
        match interrupt {
            Interrupted::Cancelled => SolveError::Cancelled,
            Interrupted::Timeout => SolveError::Timeout {
                best_effort: model.map(|model| self.extract_records(model)),
            },
        }
    }
}

/// Builds the pool of a task: virtual packages, installed records and the
/// channel records in priority order. Records with malformed dependency
/// strings are dropped with a warning; malformed channel data must not fail
/// the solve.
fn build_pool(task: &SolverTask) -> Pool {
    let mut pool = Pool::new();

    for package in &task.virtual_packages {
        pool.add_virtual_package(package);
    }

    for record in &task.installed_packages {
        if let Err(e) = pool.add_installed_record(record) {
            tracing::warn!(
                "installed record '{}' has a malformed dependency: {e}",
                record.repodata_record.file_name
            );
        }
    }

    for (priority, records) in task.available_packages.iter().enumerate() {
        for record in records {
            if let Err(e) = pool.add_repodata_record(
                record.clone(),
                Some(priority as u32),
                false,
                task.config.prefer_conda_format,
            ) {
                tracing::warn!(
                    "dropping record '{}' with malformed dependency: {e}",
                    record.file_name
                );
            }
        }
    }

    pool
}

/// The names reachable from the requested specs over the dependency edges of
/// the installed records. `UPDATE_DEPS` relaxes the history constraints of
/// exactly these names.
fn dependency_closure_names(task: &SolverTask) -> FxHashSet<String> {
    let installed_by_name: FxHashMap<&str, &krait_conda_types::PrefixRecord> = task
        .installed_packages
        .iter()
        .map(|record| {
            (
                record.repodata_record.package_record.name.as_normalized(),
                record,
            )
        })
        .collect();

    let mut closure: FxHashSet<String> = FxHashSet::default();
    let mut queue: VecDeque<String> = task
        .specs
        .iter()
        .filter_map(|spec| spec.exact_name())
        .map(|name| name.as_normalized().to_string())
        .collect();

    while let Some(name) = queue.pop_front() {
        let Some(record) = installed_by_name.get(name.as_str()) else {
            continue;
        };
        for dep in &record.repodata_record.package_record.depends {
            let Ok(spec) = MatchSpec::from_str(dep, ParseStrictness::Lenient) else {
                continue;
            };
            let Some(dep_name) = spec.exact_name() else {
                continue;
            };
            let dep_name = dep_name.as_normalized().to_string();
            if closure.insert(dep_name.clone()) {
                queue.push_back(dep_name);
            }
        }
    }

    // The requested names themselves are not "dependencies".
    for spec in &task.specs {
        if let Some(name) = spec.exact_name() {
            closure.remove(name.as_normalized());
        }
    }

    closure
}
