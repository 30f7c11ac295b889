//! Pending requirements and the order they are worked through.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use jewel_core::constraint::VersionConstraint;
use jewel_core::dependency::Dependency;

use crate::candidate::Activation;
use crate::state::ActivationState;

/// Who introduced a requirement.
#[derive(Debug, Clone)]
pub enum Requester {
    /// The root request set.
    Root,
    Package(Arc<Activation>),
}

impl Requester {
    /// Decision index of the requesting activation; `None` for root.
    pub fn decision(&self) -> Option<usize> {
        match self {
            Requester::Root => None,
            Requester::Package(activation) => Some(activation.decision),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Requester::Root)
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requester::Root => f.write_str("root"),
            Requester::Package(activation) => {
                write!(f, "{} ({})", activation.name, activation.version)
            }
        }
    }
}

/// A dependency paired with the activation (or root) that introduced it.
#[derive(Debug, Clone)]
pub struct Requirement {
    pub dependency: Arc<Dependency>,
    pub requester: Requester,
}

impl Requirement {
    pub fn root(dependency: Arc<Dependency>) -> Self {
        Self {
            dependency,
            requester: Requester::Root,
        }
    }

    pub fn from_activation(dependency: Arc<Dependency>, activation: Arc<Activation>) -> Self {
        Self {
            dependency,
            requester: Requester::Package(activation),
        }
    }

    pub fn name(&self) -> &str {
        &self.dependency.name
    }

    pub fn constraint(&self) -> &VersionConstraint {
        &self.dependency.constraint
    }

    /// The requirements leading from the root request set to this one,
    /// root first.
    pub fn chain(&self) -> Vec<Requirement> {
        let mut chain = vec![self.clone()];
        let mut requester = self.requester.clone();
        while let Requester::Package(activation) = requester {
            let Some(parent) = activation.requirements.first() else {
                break;
            };
            chain.push(parent.clone());
            requester = parent.requester.clone();
        }
        chain.reverse();
        chain
    }

    /// Same dependency, requested by the same activation.
    pub fn same_as(&self, other: &Requirement) -> bool {
        let same_requester = match (&self.requester, &other.requester) {
            (Requester::Root, Requester::Root) => true,
            (Requester::Package(a), Requester::Package(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        same_requester && self.dependency == other.dependency
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.dependency.fmt(f)
    }
}

/// Requirements not yet checked against the activation state.
///
/// Cloned into every decision point, so a backjump restores the frontier
/// exactly as it was when that decision was opened.
#[derive(Debug, Clone, Default)]
pub struct RequirementList {
    pending: Vec<(u64, Requirement)>,
    next_seq: u64,
}

impl RequirementList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, requirement: Requirement) {
        self.pending.push((self.next_seq, requirement));
        self.next_seq += 1;
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Requirement> {
        self.pending.iter().map(|(_, r)| r)
    }

    /// Remove and return the next requirement to work on.
    ///
    /// Requirements on already-activated names come first (they only need
    /// checking), then exact pins, then the rest. Insertion order breaks
    /// ties within a tier.
    pub fn pop_next(&mut self, state: &ActivationState) -> Option<Requirement> {
        if self.pending.is_empty() {
            return None;
        }
        let activated = state.names();
        let position = self
            .pending
            .iter()
            .enumerate()
            .min_by_key(|(_, (seq, req))| (tier(req, &activated), *seq))
            .map(|(position, _)| position)?;
        Some(self.pending.remove(position).1)
    }

    /// Remove every pending requirement on `name`, in insertion order.
    pub fn take_matching(&mut self, name: &str) -> Vec<Requirement> {
        let (taken, kept) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|(_, req)| req.name() == name);
        self.pending = kept;
        taken.into_iter().map(|(_, req)| req).collect()
    }
}

fn tier(requirement: &Requirement, activated: &HashSet<&str>) -> u8 {
    if activated.contains(requirement.name()) {
        0
    } else if requirement.constraint().is_exact() {
        1
    } else {
        2
    }
}
