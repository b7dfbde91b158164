//! A small pseudo-boolean SAT engine.
//!
//! The solver pipeline compiles a package problem into plain boolean clauses
//! (disjunctions of literals over candidate variables) plus pseudo-boolean
//! side constraints of the form `Σ wᵢ·xᵢ ≤ bound`. This module contains the
//! search engine for that formula: unit propagation with two watched
//! literals per clause and depth-first search with chronological
//! backtracking over an explicit decision stack.
//!
//! The engine is deliberately modest. It has no clause learning and no
//! restarts; package problems after index reduction are small and heavily
//! structured (one at-most-one group per package name), and the encoder
//! hands the engine a decision order that makes the first model land close
//! to the greedy solution. Pseudo-boolean constraints use counter
//! propagation only: as soon as the weight of the variables assigned true
//! exceeds the bound the current branch is abandoned.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

/// A boolean variable of the problem. Variables are dense indices; the
/// encoder uses solvable ids as variables.
pub(crate) type Var = usize;

/// A positive or negated variable inside a clause.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct Literal {
    /// The variable this literal refers to.
    pub var: Var,
    /// True when the literal is the negation of the variable.
    pub negate: bool,
}

impl Literal {
    /// The literal that is true when the variable is true.
    pub fn positive(var: Var) -> Self {
        Self { var, negate: false }
    }

    /// The literal that is true when the variable is false.
    pub fn negative(var: Var) -> Self {
        Self { var, negate: true }
    }

    /// The index of this literal in watch lists.
    fn index(self) -> usize {
        self.var * 2 + usize::from(self.negate)
    }

    /// Evaluates the literal under a partial assignment.
    fn eval(self, assignment: &[Option<bool>]) -> Option<bool> {
        assignment[self.var].map(|value| value != self.negate)
    }
}

/// A disjunction of literals with two watched positions.
struct Clause {
    literals: Vec<Literal>,
    watched: [usize; 2],
}

/// A pseudo-boolean constraint `Σ wᵢ·xᵢ ≤ bound` over positive variables.
struct PbConstraint {
    terms: Vec<(Var, u64)>,
    bound: u64,
}

/// The result of a satisfiability query.
pub(crate) enum SatResult {
    /// A model was found; one boolean per variable.
    Sat(Vec<bool>),
    /// No assignment satisfies the formula.
    Unsat,
}

/// The reason a search was cut short.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Interrupted {
    /// The cancellation flag was raised.
    Cancelled,
    /// The deadline passed.
    Timeout,
}

/// The cooperative termination contract of a search: an optional deadline
/// and an optional cancellation flag, checked at a bounded frequency inside
/// the search loop.
#[derive(Default, Copy, Clone)]
pub(crate) struct SearchBudget<'a> {
    pub deadline: Option<Instant>,
    pub cancel: Option<&'a AtomicBool>,
}

impl SearchBudget<'_> {
    pub(crate) fn check(&self) -> Result<(), Interrupted> {
        if let Some(cancel) = self.cancel {
            if cancel.load(Ordering::Relaxed) {
                return Err(Interrupted::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Interrupted::Timeout);
            }
        }
        Ok(())
    }
}

/// A decision made during search, remembered so it can be undone and
/// flipped.
struct Decision {
    trail_len: usize,
    var: Var,
    value: bool,
    flipped: bool,
}

/// The clause database and search state.
pub(crate) struct SatSolver {
    num_vars: usize,
    clauses: Vec<Clause>,
    /// Literals asserted by clauses of length one, applied at level zero.
    unit_literals: Vec<Literal>,
    /// Watch lists: for every literal index, the clauses watching it.
    watches: Vec<Vec<usize>>,
    /// Pseudo-boolean constraints with their running weight of variables
    /// currently assigned true.
    pb: Vec<PbConstraint>,
    pb_current: Vec<u64>,
    /// For every variable, the pb constraints it participates in.
    pb_by_var: Vec<Vec<(usize, u64)>>,
    /// True when an empty clause was added: the formula is trivially unsat.
    empty_clause: bool,

    assignment: Vec<Option<bool>>,
    trail: Vec<Var>,
    trail_head: usize,
    decisions: Vec<Decision>,
    /// The order in which unassigned variables are picked for decisions.
    decision_order: Vec<Var>,
    steps: u64,
}

const BUDGET_CHECK_INTERVAL: u64 = 256;

impl SatSolver {
    /// Constructs a solver for a formula over `num_vars` variables.
    pub(crate) fn new(num_vars: usize) -> Self {
        Self {
            num_vars,
            clauses: Vec::new(),
            unit_literals: Vec::new(),
            watches: vec![Vec::new(); num_vars * 2],
            pb: Vec::new(),
            pb_current: Vec::new(),
            pb_by_var: vec![Vec::new(); num_vars],
            empty_clause: false,
            assignment: vec![None; num_vars],
            trail: Vec::new(),
            trail_head: 0,
            decisions: Vec::new(),
            decision_order: (0..num_vars).collect(),
            steps: 0,
        }
    }

    /// Sets the order in which the solver decides on unassigned variables.
    /// Variables missing from the order are decided last.
    pub(crate) fn set_decision_order(&mut self, order: Vec<Var>) {
        let mut seen = vec![false; self.num_vars];
        let mut full_order = Vec::with_capacity(self.num_vars);
        for var in order {
            if !seen[var] {
                seen[var] = true;
                full_order.push(var);
            }
        }
        for var in 0..self.num_vars {
            if !seen[var] {
                full_order.push(var);
            }
        }
        self.decision_order = full_order;
    }

    /// Adds a clause (a disjunction of literals) to the formula. Tautologies
    /// are dropped, duplicate literals are collapsed.
    pub(crate) fn add_clause(&mut self, literals: impl IntoIterator<Item = Literal>) {
        let mut clause: Vec<Literal> = Vec::new();
        for literal in literals {
            if clause.contains(&literal) {
                continue;
            }
            if clause.iter().any(|l| l.var == literal.var && l.negate != literal.negate) {
                // x ∨ ¬x: the clause is always true.
                return;
            }
            clause.push(literal);
        }

        match clause.len() {
            0 => self.empty_clause = true,
            1 => self.unit_literals.push(clause[0]),
            _ => {
                let clause_idx = self.clauses.len();
                let watched = [0, 1];
                self.watches[clause[0].index()].push(clause_idx);
                self.watches[clause[1].index()].push(clause_idx);
                self.clauses.push(Clause {
                    literals: clause,
                    watched,
                });
            }
        }
    }

    /// Adds a retractable pseudo-boolean constraint `Σ wᵢ·xᵢ ≤ bound`.
    /// Terms with zero weight are dropped.
    pub(crate) fn push_pb(&mut self, terms: impl IntoIterator<Item = (Var, u64)>, bound: u64) {
        let pb_idx = self.pb.len();
        let terms: Vec<(Var, u64)> = terms.into_iter().filter(|&(_, w)| w > 0).collect();
        for &(var, weight) in &terms {
            self.pb_by_var[var].push((pb_idx, weight));
        }
        self.pb.push(PbConstraint { terms, bound });
        self.pb_current.push(0);
    }

    /// Removes the most recently pushed pseudo-boolean constraint.
    pub(crate) fn pop_pb(&mut self) {
        let Some(pb) = self.pb.pop() else { return };
        self.pb_current.pop();
        let pb_idx = self.pb.len();
        for (var, _) in pb.terms {
            self.pb_by_var[var].retain(|&(idx, _)| idx != pb_idx);
        }
    }

    /// Runs the search from scratch and returns a model or `Unsat`. The
    /// clause database is kept, so constraints can be added between calls.
    pub(crate) fn solve(&mut self, budget: SearchBudget<'_>) -> Result<SatResult, Interrupted> {
        self.reset();

        if self.empty_clause {
            return Ok(SatResult::Unsat);
        }

        // Assert the unit clauses at level zero.
        let units = self.unit_literals.clone();
        for literal in units {
            if !self.assign(literal.var, !literal.negate) {
                return Ok(SatResult::Unsat);
            }
        }

        'search: loop {
            self.steps += 1;
            if self.steps % BUDGET_CHECK_INTERVAL == 0 {
                budget.check()?;
            }

            if self.propagate() {
                // No conflict: pick the next decision variable. The
                // preferred polarity is false, so packages stay uninstalled
                // unless a clause forces them in.
                match self.next_unassigned() {
                    None => return Ok(SatResult::Sat(self.model())),
                    Some(var) => {
                        self.decisions.push(Decision {
                            trail_len: self.trail.len(),
                            var,
                            value: false,
                            flipped: false,
                        });
                        let assigned = self.assign(var, false);
                        debug_assert!(assigned, "deciding false can never conflict");
                    }
                }
                continue 'search;
            }

            // Conflict: undo decisions chronologically until one can be
            // flipped.
            loop {
                let Some(decision) = self.decisions.pop() else {
                    return Ok(SatResult::Unsat);
                };
                self.undo_to(decision.trail_len);
                if decision.flipped {
                    continue;
                }

                let flipped_value = !decision.value;
                self.decisions.push(Decision {
                    trail_len: decision.trail_len,
                    var: decision.var,
                    value: flipped_value,
                    flipped: true,
                });
                if self.assign(decision.var, flipped_value) {
                    continue 'search;
                }

                // Flipping immediately violated a pseudo-boolean bound;
                // undo it and keep backtracking.
                let flipped = self.decisions.pop().expect("just pushed");
                self.undo_to(flipped.trail_len);
            }
        }
    }

    /// Clears all search state, keeping the clause database.
    fn reset(&mut self) {
        self.assignment.fill(None);
        self.trail.clear();
        self.trail_head = 0;
        self.decisions.clear();
        self.pb_current.fill(0);
    }

    /// Returns the model of the current (complete) assignment.
    fn model(&self) -> Vec<bool> {
        self.assignment
            .iter()
            .map(|value| value.unwrap_or(false))
            .collect()
    }

    fn next_unassigned(&self) -> Option<Var> {
        self.decision_order
            .iter()
            .copied()
            .find(|&var| self.assignment[var].is_none())
    }

    /// Assigns a value to a variable and updates the pseudo-boolean
    /// counters. Returns false when the assignment conflicts with an
    /// existing assignment or violates a pseudo-boolean bound.
    fn assign(&mut self, var: Var, value: bool) -> bool {
        match self.assignment[var] {
            Some(existing) => existing == value,
            None => {
                self.assignment[var] = Some(value);
                self.trail.push(var);
                if value {
                    for &(pb_idx, weight) in &self.pb_by_var[var] {
                        self.pb_current[pb_idx] += weight;
                        if self.pb_current[pb_idx] > self.pb[pb_idx].bound {
                            return false;
                        }
                    }
                }
                true
            }
        }
    }

    /// Undoes all assignments made after the trail was `trail_len` long.
    fn undo_to(&mut self, trail_len: usize) {
        while self.trail.len() > trail_len {
            let var = self.trail.pop().expect("trail is non-empty");
            if self.assignment[var] == Some(true) {
                for &(pb_idx, weight) in &self.pb_by_var[var] {
                    self.pb_current[pb_idx] -= weight;
                }
            }
            self.assignment[var] = None;
        }
        self.trail_head = self.trail.len().min(self.trail_head).min(trail_len);
    }

    /// Propagates all queued assignments. Returns false on conflict.
    fn propagate(&mut self) -> bool {
        while self.trail_head < self.trail.len() {
            let var = self.trail[self.trail_head];
            self.trail_head += 1;
            let value = self.assignment[var].expect("trail entries are assigned");

            // The literal that just became false.
            let falsified = Literal { var, negate: value };
            let watching = std::mem::take(&mut self.watches[falsified.index()]);
            let mut kept = Vec::with_capacity(watching.len());

            for (processed, &clause_idx) in watching.iter().enumerate() {
                let clause = &mut self.clauses[clause_idx];
                let w = if clause.literals[clause.watched[0]] == falsified {
                    0
                } else {
                    debug_assert_eq!(clause.literals[clause.watched[1]], falsified);
                    1
                };
                let other = clause.literals[clause.watched[1 - w]];

                if other.eval(&self.assignment) == Some(true) {
                    kept.push(clause_idx);
                    continue;
                }

                // Look for a replacement watch.
                let replacement = clause.literals.iter().position(|&l| {
                    l != falsified && l != other && l.eval(&self.assignment) != Some(false)
                });
                if let Some(new_watch) = replacement {
                    clause.watched[w] = new_watch;
                    let new_literal = clause.literals[new_watch];
                    self.watches[new_literal.index()].push(clause_idx);
                    continue;
                }

                kept.push(clause_idx);
                match other.eval(&self.assignment) {
                    Some(true) => {}
                    None => {
                        // Unit: the remaining literal must be true.
                        if !self.assign(other.var, !other.negate) {
                            kept.extend_from_slice(&watching[processed + 1..]);
                            self.watches[falsified.index()] = kept;
                            return false;
                        }
                    }
                    Some(false) => {
                        kept.extend_from_slice(&watching[processed + 1..]);
                        self.watches[falsified.index()] = kept;
                        return false;
                    }
                }
            }

            self.watches[falsified.index()] = kept;
        }
        true
    }
}

/// Evaluates a weighted sum objective under a model.
pub(crate) fn eval_objective(terms: &[(Var, u64)], model: &[bool]) -> u64 {
    terms
        .iter()
        .filter(|&&(var, _)| model[var])
        .map(|&(_, weight)| weight)
        .sum()
}
