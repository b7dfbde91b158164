#![deny(missing_docs)]

//! `krait_solve` computes concrete environment changes for conda-style
//! package requests. Given the user's specs, the candidate records of the
//! configured channels, the installed state of a prefix and the history of
//! previous requests, [`Solver::solve`] produces an ordered
//! [`Transaction`] of unlink and link actions, or an error explaining why no
//! consistent assignment exists.
//!
//! The pipeline is: collect specs (request + history + pins) → reduce the
//! index to the reachable candidates → compile pseudo-boolean clauses →
//! search → lexicographic optimization → transaction planning. Everything
//! runs in-process; the SAT engine lives in this crate.

mod arena;
mod id;
mod pool;
mod reduce;
mod sat;
mod solver;
mod transaction;

use std::{sync::atomic::AtomicBool, sync::Arc, time::Duration};

use krait_conda_types::{
    ChannelPriority, GenericVirtualPackage, MatchSpec, ParsedHistory, PrefixRecord,
    RepoDataRecord,
};

pub use solver::Solver;
pub use transaction::{Transaction, TransactionOrderError};

/// Configuration of a solve beyond the specs themselves. The fields mirror
/// the conda configuration keys that influence solver behavior.
#[derive(Debug, Clone)]
pub struct SolveConfig {
    /// How channel priority influences candidate selection.
    pub channel_priority: ChannelPriority,

    /// Features that are forced globally, as if a package tracking them was
    /// installed.
    pub track_features: Vec<String>,

    /// Specs that are added to every solve as hard requirements.
    pub pinned_packages: Vec<MatchSpec>,

    /// Packages that are never downgraded: when installed, their candidates
    /// are restricted to `>=` the installed version even when the rest of
    /// the environment is frozen.
    pub aggressive_update_packages: Vec<MatchSpec>,

    /// Selects how the solver treats installed packages that are not part of
    /// the request.
    pub update_modifier: UpdateModifier,

    /// An optional wall-clock budget for the whole solve, shared by the
    /// freeze-then-retry phases.
    pub timeout: Option<Duration>,

    /// Prefer the `.conda` archive over `.tar.bz2` when a build is available
    /// in both formats.
    pub prefer_conda_format: bool,
}

impl Default for SolveConfig {
    fn default() -> Self {
        Self {
            channel_priority: ChannelPriority::default(),
            track_features: Vec::new(),
            pinned_packages: Vec::new(),
            aggressive_update_packages: Vec::new(),
            update_modifier: UpdateModifier::default(),
            timeout: None,
            prefer_conda_format: true,
        }
    }
}

/// Selects how installed packages that are not explicitly part of the
/// request are treated.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum UpdateModifier {
    /// Pin every installed record to its exact version and build, except the
    /// requested packages. When that turns out to be unsatisfiable the solve
    /// is retried without the pins.
    FreezeInstalled,

    /// Installed packages must stay installed but may change version when
    /// the request needs it.
    #[default]
    UpdateSpecs,

    /// Like [`UpdateModifier::UpdateSpecs`], but history constraints on the
    /// dependencies of the requested packages are relaxed so they can move
    /// too.
    UpdateDeps,

    /// Treat every installed package name as a request without a version
    /// pin.
    UpdateAll,

    /// When the request is already satisfied by the installed packages, skip
    /// the solve entirely and return the identity transaction.
    SpecsSatisfiedSkipSolve,
}

/// A dependency resolution task: all inputs to a single solve.
pub struct SolverTask {
    /// The new specs requested by the user.
    pub specs: Vec<MatchSpec>,

    /// The specs the user asked to remove from the environment.
    pub specs_to_remove: Vec<MatchSpec>,

    /// The available packages, one `Vec` per channel, ordered by descending
    /// channel priority (the first entry is the highest-priority channel).
    pub available_packages: Vec<Vec<RepoDataRecord>>,

    /// The records installed in the target prefix.
    pub installed_packages: Vec<PrefixRecord>,

    /// The virtual packages of the target system.
    pub virtual_packages: Vec<GenericVirtualPackage>,

    /// The parsed request history of the target prefix.
    pub history: ParsedHistory,

    /// The command to record in the history entry produced by this solve.
    pub cmd: Option<String>,

    /// The configuration of the solve.
    pub config: SolveConfig,

    /// An optional cooperative cancellation flag, checked between
    /// optimization passes and at a bounded frequency inside the search.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl SolverTask {
    /// Constructs a task with the given available packages and otherwise
    /// empty inputs.
    pub fn from_packages(available_packages: Vec<Vec<RepoDataRecord>>) -> Self {
        Self {
            specs: Vec::new(),
            specs_to_remove: Vec::new(),
            available_packages,
            installed_packages: Vec::new(),
            virtual_packages: Vec::new(),
            history: ParsedHistory::default(),
            cmd: None,
            config: SolveConfig::default(),
            cancel: None,
        }
    }
}

/// Represents an error when solving the dependencies for a given
/// environment.
#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    /// One or more specs have no candidates in the aggregated index.
    #[error("the following packages are not available from the configured channels {channels:?}: {specs:?}")]
    PackagesNotFound {
        /// The canonical form of the specs that had no candidates.
        specs: Vec<String>,
        /// The channels that were searched.
        channels: Vec<String>,
    },

    /// Candidates exist for every spec but no simultaneous assignment of
    /// them does.
    #[error("the following specs cannot be satisfied together: {conflicts:?}")]
    Unsatisfiable {
        /// Minimal groups of mutually conflicting specs, in canonical form.
        conflicts: Vec<Vec<String>>,
    },

    /// The cancellation flag was raised during the solve.
    #[error("the solve was cancelled")]
    Cancelled,

    /// The deadline passed during the solve.
    #[error("the solve exceeded its deadline")]
    Timeout {
        /// The best (not fully optimized) solution found before the deadline
        /// passed, if any.
        best_effort: Option<Vec<RepoDataRecord>>,
    },

    /// The model produced by the optimization passes failed verification.
    /// This is an internal error: it means the encoder and the search
    /// disagree, not that the input is wrong.
    #[error("solver produced an inconsistent result: {0}")]
    SolverInconsistency(String),

    /// The transaction planner produced an ordering that violates its own
    /// invariants.
    #[error(transparent)]
    TransactionOrder(#[from] TransactionOrderError),
}
