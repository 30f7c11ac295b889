//! Step-wise dependency resolution with conflict-directed backjumping.
//!
//! The search is an explicit state machine. Each [`Resolver::step`] makes one
//! transition:
//!
//! - **Selecting** pops the next requirement. A requirement on an activated
//!   name is checked against that activation. Otherwise every pending
//!   requirement on the name is merged, candidates are fetched, and a
//!   decision point is opened.
//! - **Activating** binds the decision's next candidate version (one build,
//!   or one build per platform for platform-wide requirements) and queues
//!   its dependencies.
//! - **Conflict** blames the decisions whose choices produced the failure
//!   and picks the most recent one as the backjump target. With nothing to
//!   blame, the resolution is unsatisfiable.
//! - **Backjumping** discards every decision after the target and restores
//!   the target's snapshot, so its next candidate can be tried.
//!
//! A decision that runs out of candidates is itself a conflict, blamed on
//! the culprits accumulated for it and on the decisions that introduced its
//! requirements.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jewel_core::config::ResolverConfig;
use jewel_core::constraint::VersionConstraint;
use jewel_core::dependency::{Dependency, SourceRef};
use jewel_core::lockfile::{LockedPackage, Lockfile};
use jewel_core::platform::{DefaultScorer, Platform, PlatformScorer};
use jewel_core::version::Version;
use jewel_util::errors::JewelError;
use tracing::{debug, info, warn};

use crate::candidate::{Activation, CandidateSummary, PackageCandidate, SourceId, SourceKind};
use crate::conflict::{Conflict, ConflictCause, ConflictReport, ConflictTracker};
use crate::error::ResolveError;
use crate::graph::ResolutionGraph;
use crate::requirement::{Requirement, RequirementList};
use crate::source::{QueryContext, Refusal, SourceSet};
use crate::state::ActivationState;

/// Where the resolver is between two steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Selecting,
    Activating,
    Conflict,
    Backjumping,
    Satisfied,
    Unsatisfiable,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Satisfied | Phase::Unsatisfiable)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Selecting => "selecting",
            Phase::Activating => "activating",
            Phase::Conflict => "conflict",
            Phase::Backjumping => "backjumping",
            Phase::Satisfied => "satisfied",
            Phase::Unsatisfiable => "unsatisfiable",
        };
        f.write_str(name)
    }
}

/// Shared flag that stops a resolution at its next selection.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One candidate version of a decision, with the builds it would bind.
#[derive(Debug)]
struct VersionGroup {
    version: Version,
    builds: Vec<CandidateSummary>,
}

#[derive(Debug)]
struct Decision {
    name: String,
    requirements: Vec<Requirement>,
    remaining: VecDeque<VersionGroup>,
    /// Everything the search offered, for regrouping.
    candidates: Vec<CandidateSummary>,
    /// Whether versions are grouped with one build per target platform.
    platform_wide: bool,
    /// Activation state before this decision bound anything.
    state: ActivationState,
    /// Pending requirements once this decision's own were taken.
    frontier: RequirementList,
    /// Why earlier candidates failed.
    failures: Vec<Conflict>,
}

#[derive(Debug)]
enum Next {
    Select,
    Activate(usize),
    Conflict {
        conflict: Box<Conflict>,
        culprits: BTreeSet<usize>,
    },
    Backjump(usize),
    Satisfied,
    Unsatisfiable,
}

pub struct Resolver<'a> {
    sources: &'a SourceSet,
    config: &'a ResolverConfig,
    scorer: Arc<dyn PlatformScorer>,
    cancel: CancellationFlag,
    state: ActivationState,
    frontier: RequirementList,
    decisions: Vec<Decision>,
    tracker: ConflictTracker,
    next: Next,
    steps: usize,
    report: Option<ConflictReport>,
}

impl<'a> Resolver<'a> {
    /// Prepare a resolution of `root` against `sources`.
    ///
    /// Development dependencies and dependencies filtered to other
    /// platforms are dropped up front.
    pub fn new(
        root: &[Dependency],
        sources: &'a SourceSet,
        config: &'a ResolverConfig,
    ) -> Result<Self, ResolveError> {
        if config.platforms.is_empty() {
            return Err(JewelError::Config {
                message: "platforms must name at least one platform".to_string(),
            }
            .into());
        }
        let mut frontier = RequirementList::new();
        for dep in root {
            if dep.is_runtime() && dep.applies_to(&config.platforms) {
                frontier.push(Requirement::root(Arc::new(dep.clone())));
            }
        }
        Ok(Self {
            sources,
            config,
            scorer: Arc::new(DefaultScorer),
            cancel: CancellationFlag::new(),
            state: ActivationState::new(),
            frontier,
            decisions: Vec::new(),
            tracker: ConflictTracker::new(),
            next: Next::Select,
            steps: 0,
            report: None,
        })
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn PlatformScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn phase(&self) -> Phase {
        match self.next {
            Next::Select => Phase::Selecting,
            Next::Activate(_) => Phase::Activating,
            Next::Conflict { .. } => Phase::Conflict,
            Next::Backjump(_) => Phase::Backjumping,
            Next::Satisfied => Phase::Satisfied,
            Next::Unsatisfiable => Phase::Unsatisfiable,
        }
    }

    /// Transitions made so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn state(&self) -> &ActivationState {
        &self.state
    }

    pub fn tracker(&self) -> &ConflictTracker {
        &self.tracker
    }

    /// Number of open decision points.
    pub fn depth(&self) -> usize {
        self.decisions.len()
    }

    /// Make one transition and return the phase entered.
    ///
    /// Terminal phases are sticky. Cancellation is honoured before a
    /// selection and leaves the resolver where it was.
    pub fn step(&mut self) -> Result<Phase, ResolveError> {
        if self.phase().is_terminal() {
            return Ok(self.phase());
        }
        if matches!(self.next, Next::Select) && self.cancel.is_cancelled() {
            info!(steps = self.steps, "Resolution cancelled");
            return Err(ResolveError::Aborted);
        }
        self.next = match std::mem::replace(&mut self.next, Next::Select) {
            Next::Select => self.select(),
            Next::Activate(index) => self.activate(index),
            Next::Conflict { conflict, culprits } => self.handle_conflict(*conflict, culprits),
            Next::Backjump(target) => self.backjump(target),
            terminal @ (Next::Satisfied | Next::Unsatisfiable) => terminal,
        };
        self.steps += 1;
        Ok(self.phase())
    }

    /// Step until a terminal phase.
    pub fn run(mut self) -> Result<Resolution, ResolveError> {
        loop {
            match self.step()? {
                Phase::Satisfied => {
                    let resolution = Resolution::from_state(&self.state, self.steps);
                    info!(
                        packages = resolution.len(),
                        steps = self.steps,
                        "Resolution complete"
                    );
                    return Ok(resolution);
                }
                Phase::Unsatisfiable => {
                    return Err(ResolveError::Unsatisfiable {
                        report: self.report.take().unwrap_or_default(),
                    });
                }
                _ => {}
            }
        }
    }

    fn select(&mut self) -> Next {
        let Some(requirement) = self.frontier.pop_next(&self.state) else {
            return Next::Satisfied;
        };
        let name = requirement.name().to_string();

        if let Some(existing) = self.state.lookup(&name).cloned() {
            return self.check_existing(requirement, existing);
        }

        let mut requirements = vec![requirement.clone()];
        requirements.extend(self.frontier.take_matching(&name));
        let constraint = requirements
            .iter()
            .fold(VersionConstraint::any(), |merged, r| merged.intersect(r.constraint()));
        if constraint.is_unsatisfiable() {
            return conflict(Conflict::new(
                requirement,
                requirements,
                ConflictCause::EmptyIntersection,
            ));
        }

        let pins: BTreeSet<&SourceRef> = requirements
            .iter()
            .filter_map(|r| r.dependency.source.as_ref())
            .collect();
        if pins.len() > 1 {
            let pinned = pins.iter().map(|pin| pin.to_string()).collect();
            return conflict(Conflict::new(
                requirement,
                requirements,
                ConflictCause::SourceMismatch(pinned),
            ));
        }
        let pin = pins.into_iter().next().cloned();

        let all_platforms = requirements.iter().any(|r| r.dependency.all_platforms);
        let query = requirements
            .iter()
            .find(|r| r.dependency.source.is_some())
            .unwrap_or(&requirement)
            .dependency
            .clone();
        let ctx = QueryContext::new(self.config, self.scorer.as_ref());
        let search = self.sources.search(&query, &constraint, &ctx);
        let mut candidates = search.candidates;
        if let Some(pin) = &pin {
            candidates.retain(|c| pin_admits(pin, &c.source, self.config.frozen));
        }
        let groups = group_versions(&candidates, &ctx, all_platforms);

        if groups.is_empty() {
            let cause = match search.refusal {
                Some(Refusal::NotInLockfile) => ConflictCause::NotInLockfile,
                Some(Refusal::UnknownSource(source)) => ConflictCause::UnknownSource(source),
                None if !candidates.is_empty() => {
                    ConflictCause::PlatformIncomplete(self.config.platforms.clone())
                }
                None if !search.errors.is_empty() => {
                    let messages: Vec<String> = search.errors.iter().map(|e| e.to_string()).collect();
                    ConflictCause::FetchFailed(messages.join("; "))
                }
                None => ConflictCause::NoCandidate,
            };
            return conflict(Conflict::new(requirement, requirements, cause));
        }

        let index = self.decisions.len();
        debug!(
            package = %name,
            constraint = %constraint,
            candidates = groups.len(),
            decision = index,
            "Opening decision"
        );
        self.tracker.open(index, &name);
        self.decisions.push(Decision {
            name,
            requirements,
            remaining: groups.into(),
            candidates,
            platform_wide: all_platforms,
            state: self.state.fork(),
            frontier: self.frontier.clone(),
            failures: Vec::new(),
        });
        Next::Activate(index)
    }

    fn check_existing(&mut self, requirement: Requirement, existing: Arc<Activation>) -> Next {
        let dep = &requirement.dependency;
        let version_ok = dep.constraint.satisfied_by(&existing.version);
        let platforms_ok = !dep.all_platforms || existing.covers(&self.config.platforms);
        let source_ok = dep.source.as_ref().map_or(true, |pin| {
            existing
                .candidates
                .iter()
                .all(|c| pin_admits(pin, c.source(), self.config.frozen))
        });

        if version_ok && platforms_ok && source_ok {
            self.state = self.state.record_satisfied(requirement);
            return Next::Select;
        }
        let cause = if version_ok && source_ok {
            self.widen(&existing);
            ConflictCause::PlatformIncomplete(self.config.platforms.clone())
        } else {
            ConflictCause::Incompatible
        };
        conflict(Conflict::new(requirement.clone(), vec![requirement], cause).with_activation(existing))
    }

    fn activate(&mut self, index: usize) -> Next {
        let Some(group) = self
            .decisions
            .get_mut(index)
            .and_then(|d| d.remaining.pop_front())
        else {
            return self.exhausted(index);
        };

        let mut candidates = Vec::with_capacity(group.builds.len());
        for summary in &group.builds {
            match self.sources.materialize(summary) {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => {
                    warn!(candidate = %summary, "{e}");
                    let decision = &mut self.decisions[index];
                    let failure = Conflict::new(
                        decision.requirements[0].clone(),
                        decision.requirements.clone(),
                        ConflictCause::FetchFailed(e.to_string()),
                    );
                    decision.failures.push(failure);
                    return Next::Activate(index);
                }
            }
        }
        candidates.sort_by(|a, b| a.platform().cmp(b.platform()));

        let decision = &self.decisions[index];
        let activation = Arc::new(Activation {
            name: decision.name.clone(),
            version: group.version,
            candidates,
            requirements: decision.requirements.clone(),
            decision: index,
        });
        debug!(activation = %activation, decision = index, "Activating");

        self.state = decision.state.bind(activation.clone());
        self.frontier = decision.frontier.clone();
        for dep in activation.dependencies() {
            if !dep.is_runtime() || !dep.applies_to(&self.config.platforms) {
                continue;
            }
            self.tracker.touch(index, &dep.name);
            self.frontier.push(Requirement::from_activation(
                Arc::new(dep.clone()),
                activation.clone(),
            ));
        }
        Next::Select
    }

    /// Switch the decision that bound `activation` to one build per target
    /// platform. The bound version is offered again, regrouped, ahead of
    /// the versions it had left.
    fn widen(&mut self, activation: &Activation) {
        let ctx = QueryContext::new(self.config, self.scorer.as_ref());
        let Some(decision) = self.decisions.get_mut(activation.decision) else {
            return;
        };
        if decision.platform_wide || decision.name != activation.name {
            return;
        }
        let group_key = |group: &VersionGroup| {
            (group.version.clone(), group.builds.first().map(|b| b.source.clone()))
        };
        let mut keep: Vec<(Version, Option<SourceId>)> =
            decision.remaining.iter().map(group_key).collect();
        keep.push((
            activation.version.clone(),
            activation.candidates.first().map(|c| c.source().clone()),
        ));

        decision.platform_wide = true;
        decision.remaining = group_versions(&decision.candidates, &ctx, true)
            .into_iter()
            .filter(|group| keep.contains(&group_key(group)))
            .collect();
        debug!(
            package = %decision.name,
            decision = activation.decision,
            candidates = decision.remaining.len(),
            "Decision widened to every platform"
        );
    }

    /// The decision at `index` has no candidates left: drop it and blame
    /// whatever constrained it.
    fn exhausted(&mut self, index: usize) -> Next {
        let mut culprits = self.tracker.conflict_set(index);
        self.tracker.truncate(index);
        self.decisions.truncate(index + 1);
        let Some(decision) = self.decisions.pop() else {
            return Next::Unsatisfiable;
        };
        debug!(package = %decision.name, decision = index, "Candidates exhausted");

        let exhausted = Conflict::new(
            decision.requirements[0].clone(),
            decision.requirements,
            ConflictCause::Exhausted,
        )
        .with_underlying(decision.failures);
        culprits.extend(exhausted.culprits());
        self.state = decision.state;
        self.frontier = decision.frontier;
        Next::Conflict {
            conflict: Box::new(exhausted),
            culprits,
        }
    }

    fn handle_conflict(&mut self, conflict: Conflict, culprits: BTreeSet<usize>) -> Next {
        debug!(
            package = %conflict.name,
            cause = ?conflict.cause,
            culprits = ?culprits,
            touched_by = ?self.tracker.states_since(&conflict.name),
            "Conflict"
        );
        self.tracker.record(conflict.clone());
        match self.tracker.backjump_target(&culprits) {
            Some(target) if target < self.decisions.len() => {
                self.decisions[target].failures.push(conflict);
                Next::Backjump(target)
            }
            _ => {
                info!(steps = self.steps, "No decision left to revise");
                self.report = Some(ConflictReport::from_conflict(&conflict));
                Next::Unsatisfiable
            }
        }
    }

    fn backjump(&mut self, target: usize) -> Next {
        debug!(
            target,
            discarded = self.decisions.len().saturating_sub(target + 1),
            "Backjumping"
        );
        self.decisions.truncate(target + 1);
        self.tracker.truncate(target + 1);
        let decision = &self.decisions[target];
        self.state = decision.state.clone();
        self.frontier = decision.frontier.clone();
        Next::Activate(target)
    }
}

/// Whether a build from `source` honours a requirement pinned to `pin`.
/// Frozen resolutions take every build from the lockfile.
fn pin_admits(pin: &SourceRef, source: &SourceId, frozen: bool) -> bool {
    (frozen && source.kind == SourceKind::Locked) || *source == SourceId::pinned(pin)
}

fn conflict(conflict: Conflict) -> Next {
    Next::Conflict {
        culprits: conflict.culprits(),
        conflict: Box::new(conflict),
    }
}

/// Group summaries by version (and source), keeping their order, and pick
/// the builds each version would bind. Versions with no suitable build are
/// dropped.
fn group_versions(
    candidates: &[CandidateSummary],
    ctx: &QueryContext<'_>,
    all_platforms: bool,
) -> Vec<VersionGroup> {
    let mut grouped: Vec<(Version, SourceId, Vec<CandidateSummary>)> = Vec::new();
    for candidate in candidates {
        match grouped
            .iter_mut()
            .find(|(version, source, _)| version == &candidate.version && source == &candidate.source)
        {
            Some((_, _, builds)) => builds.push(candidate.clone()),
            None => grouped.push((
                candidate.version.clone(),
                candidate.source.clone(),
                vec![candidate.clone()],
            )),
        }
    }
    grouped
        .into_iter()
        .filter_map(|(version, _, builds)| {
            Some(VersionGroup {
                version,
                builds: select_builds(&builds, ctx, all_platforms)?,
            })
        })
        .collect()
}

/// Platform-wide: the best build for every target platform, or nothing.
/// Otherwise: the best build for the first target platform that has one.
fn select_builds(
    builds: &[CandidateSummary],
    ctx: &QueryContext<'_>,
    all_platforms: bool,
) -> Option<Vec<CandidateSummary>> {
    let best_for = |target: &Platform| {
        builds
            .iter()
            .filter(|b| b.platform.matches(target))
            .min_by(|a, b| {
                ctx.scorer
                    .score(&a.platform, target)
                    .cmp(&ctx.scorer.score(&b.platform, target))
                    .then_with(|| a.platform.cmp(&b.platform))
            })
    };

    if !all_platforms {
        return ctx
            .platforms()
            .iter()
            .find_map(best_for)
            .map(|build| vec![build.clone()]);
    }

    let mut chosen: Vec<CandidateSummary> = Vec::new();
    for target in ctx.platforms() {
        let build = best_for(target)?;
        if !chosen.contains(build) {
            chosen.push(build.clone());
        }
    }
    chosen.sort_by(|a, b| a.platform.cmp(&b.platform));
    Some(chosen)
}

/// A successful resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    activations: Vec<Arc<Activation>>,
    satisfied: Vec<Requirement>,
    steps: usize,
}

impl Resolution {
    fn from_state(state: &ActivationState, steps: usize) -> Self {
        Self {
            activations: state.activations(),
            satisfied: state.satisfied_requirements(),
            steps,
        }
    }

    /// Every bound build, sorted by name then platform.
    pub fn all_activated(&self) -> Vec<PackageCandidate> {
        self.activations
            .iter()
            .flat_map(|a| a.candidates.iter().cloned())
            .collect()
    }

    /// Activations sorted by name.
    pub fn activations(&self) -> &[Arc<Activation>] {
        &self.activations
    }

    pub fn activation(&self, name: &str) -> Option<&Arc<Activation>> {
        self.activations
            .binary_search_by(|a| a.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.activations[i])
    }

    pub fn version_of(&self, name: &str) -> Option<&Version> {
        self.activation(name).map(|a| &a.version)
    }

    /// Every requirement the resolution satisfies, each paired with the
    /// activation (or root) that declared it.
    pub fn requirements(&self) -> impl Iterator<Item = &Requirement> {
        self.activations
            .iter()
            .flat_map(|a| a.requirements.iter())
            .chain(self.satisfied.iter())
    }

    pub fn len(&self) -> usize {
        self.activations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activations.is_empty()
    }

    /// Transitions the search took.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn graph(&self) -> ResolutionGraph {
        ResolutionGraph::from_resolution(self)
    }

    /// The lockfile recording this resolution.
    pub fn to_lockfile(&self) -> Lockfile {
        let package = self
            .all_activated()
            .into_iter()
            .map(|candidate| LockedPackage {
                name: candidate.name().to_string(),
                version: candidate.version().clone(),
                platform: candidate.platform().clone(),
                source: match candidate.source().kind {
                    SourceKind::Locked => None,
                    _ => Some(candidate.source().to_string()),
                },
                dependencies: candidate
                    .dependencies
                    .iter()
                    .filter(|d| d.is_runtime())
                    .map(|d| d.to_string())
                    .collect(),
            })
            .collect();
        Lockfile { package }
    }
}

/// Resolve `root` against `sources` to completion.
#[tracing::instrument(skip_all, fields(requirements = root.len()))]
pub fn resolve(
    root: &[Dependency],
    sources: &SourceSet,
    config: &ResolverConfig,
) -> Result<Resolution, ResolveError> {
    Resolver::new(root, sources, config)?.run()
}
