//! Index reduction: narrowing the universe of candidate packages to the
//! records reachable from the request.
//!
//! The SAT encoding stays tractable because only the name-closed subset of
//! the full index that the specs can reach ever becomes a variable. Any
//! satisfying solution over the reduced subset is also a solution of the
//! full problem.

use std::collections::VecDeque;

use fxhash::{FxHashMap, FxHashSet};
use krait_conda_types::Matches;

use crate::{
    id::{NameId, SolvableId, SpecId},
    pool::Pool,
};

/// The subset of the pool that takes part in a solve.
pub(crate) struct ReducedIndex {
    /// The solvables that survived reduction.
    kept: FxHashSet<SolvableId>,
}

impl ReducedIndex {
    /// Returns true when the given solvable survived reduction.
    pub(crate) fn contains(&self, solvable: SolvableId) -> bool {
        self.kept.contains(&solvable)
    }

    /// Returns an iterator over all kept solvables.
    pub(crate) fn solvables(&self) -> impl Iterator<Item = SolvableId> + '_ {
        self.kept.iter().copied()
    }

    /// Returns the kept candidates that fully match the given spec.
    pub(crate) fn candidates(&self, pool: &Pool, spec: SpecId) -> Vec<SolvableId> {
        pool.candidates_matching_spec(spec)
            .into_iter()
            .filter(|solvable| self.kept.contains(solvable))
            .collect()
    }

    /// Returns the kept candidates of a name.
    pub(crate) fn candidates_of_name(&self, pool: &Pool, name: NameId) -> Vec<SolvableId> {
        pool.candidates_by_name(name)
            .iter()
            .copied()
            .filter(|solvable| self.kept.contains(solvable))
            .collect()
    }
}

/// Computes the reduced index for the given root specs.
///
/// The closure works on package names: a breadth-first pass seeds the names
/// the root specs match and follows every `depends` edge of every candidate.
/// A dependency on a name pulls in *all* of that name's candidates, which is
/// why a single pass reaches the fixpoint.
///
/// Two refinements on top of the name closure:
///
/// * Track features are contagious: when any reachable record tracks a
///   feature, every record of the full index carrying that feature in its
///   `features` set is pulled in as well (the same applies to features
///   forced by configuration).
/// * `constrains` edges never seed new names, but they narrow the candidate
///   list of names that are already present: a candidate that violates a
///   constraint carried by a reachable record is excluded.
pub(crate) fn reduce_index(
    pool: &Pool,
    root_specs: &[SpecId],
    forced_features: &[String],
) -> ReducedIndex {
    let mut visited_names: FxHashSet<NameId> = FxHashSet::default();
    let mut queue: VecDeque<NameId> = VecDeque::new();

    let mut visit = |name: NameId,
                     visited_names: &mut FxHashSet<NameId>,
                     queue: &mut VecDeque<NameId>| {
        if visited_names.insert(name) {
            queue.push_back(name);
        }
    };

    // Seed: the names the root specs match.
    for &spec in root_specs {
        for name in pool.names_matching_spec(spec) {
            visit(name, &mut visited_names, &mut queue);
        }
    }

    // Features forced by configuration behave like track features of the
    // request itself.
    for feature in forced_features {
        for (_, solvable) in pool.solvables.iter() {
            if solvable
                .record
                .package_record
                .features_set()
                .contains(feature.as_str())
            {
                visit(solvable.name, &mut visited_names, &mut queue);
            }
        }
    }

    // Transitive closure over dependency names.
    while let Some(name) = queue.pop_front() {
        for &solvable_id in pool.candidates_by_name(name) {
            let solvable = pool.solvable(solvable_id);

            for &dep in &solvable.dependencies {
                for dep_name in pool.names_matching_spec(dep) {
                    visit(dep_name, &mut visited_names, &mut queue);
                }
            }

            // Track features select cross-cutting variants: pull in every
            // record that provides the feature.
            for feature in &solvable.record.package_record.track_features {
                for (_, provider) in pool.solvables.iter() {
                    if provider
                        .record
                        .package_record
                        .features_set()
                        .contains(feature.as_str())
                    {
                        visit(provider.name, &mut visited_names, &mut queue);
                    }
                }
            }
        }
    }

    // Collect the constraints that reachable records place on reachable
    // names.
    let mut constraints: FxHashMap<NameId, Vec<SpecId>> = FxHashMap::default();
    for &name in &visited_names {
        for &solvable_id in pool.candidates_by_name(name) {
            for &constraint in &pool.solvable(solvable_id).constrains {
                for constrained_name in pool.names_matching_spec(constraint) {
                    if visited_names.contains(&constrained_name) {
                        constraints
                            .entry(constrained_name)
                            .or_default()
                            .push(constraint);
                    }
                }
            }
        }
    }

    // Keep the candidates of every reachable name, narrowed by the
    // constraints placed on that name.
    let mut kept = FxHashSet::default();
    for &name in &visited_names {
        let name_constraints = constraints.get(&name);
        for &solvable_id in pool.candidates_by_name(name) {
            let admitted = name_constraints.is_none_or(|constraints| {
                constraints
                    .iter()
                    .all(|&c| pool.spec(c).matches(&pool.solvable(solvable_id).record))
            });
            if admitted {
                kept.insert(solvable_id);
            }
        }
    }

    ReducedIndex { kept }
}
