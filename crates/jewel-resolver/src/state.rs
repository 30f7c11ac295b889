//! The activation state: which version is bound for each name.
//!
//! Stored as persistent cons-lists behind `Arc`, so forking the state at a
//! decision point is a pointer copy and a discarded branch costs nothing.

use std::collections::HashSet;
use std::sync::Arc;

use crate::candidate::{Activation, PackageCandidate};
use crate::requirement::Requirement;

#[derive(Debug)]
struct Node<T> {
    value: T,
    next: Option<Arc<Node<T>>>,
}

#[derive(Debug)]
struct ConsList<T> {
    head: Option<Arc<Node<T>>>,
    len: usize,
}

impl<T> Clone for ConsList<T> {
    fn clone(&self) -> Self {
        Self {
            head: self.head.clone(),
            len: self.len,
        }
    }
}

impl<T> Default for ConsList<T> {
    fn default() -> Self {
        Self { head: None, len: 0 }
    }
}

impl<T> ConsList<T> {
    fn push(&self, value: T) -> Self {
        Self {
            head: Some(Arc::new(Node {
                value,
                next: self.head.clone(),
            })),
            len: self.len + 1,
        }
    }

    fn iter(&self) -> Iter<'_, T> {
        Iter {
            next: self.head.as_deref(),
        }
    }
}

struct Iter<'a, T> {
    next: Option<&'a Node<T>>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next?;
        self.next = node.next.as_deref();
        Some(&node.value)
    }
}

/// Immutable snapshot of the bindings made so far.
#[derive(Debug, Clone, Default)]
pub struct ActivationState {
    activations: ConsList<Arc<Activation>>,
    satisfied: ConsList<Requirement>,
}

impl ActivationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// An independent copy sharing all existing bindings.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// A new state with `activation` bound under its name.
    pub fn bind(&self, activation: Arc<Activation>) -> Self {
        Self {
            activations: self.activations.push(activation),
            satisfied: self.satisfied.clone(),
        }
    }

    /// A new state recording that `requirement` was met by an existing binding.
    pub fn record_satisfied(&self, requirement: Requirement) -> Self {
        Self {
            activations: self.activations.clone(),
            satisfied: self.satisfied.push(requirement),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<Activation>> {
        self.activations.iter().find(|a| a.name == name)
    }

    /// Names with a binding, collected in one pass over the list.
    pub fn names(&self) -> HashSet<&str> {
        self.activations.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.activations.len
    }

    pub fn is_empty(&self) -> bool {
        self.activations.len == 0
    }

    /// Bound activations, sorted by name.
    pub fn activations(&self) -> Vec<Arc<Activation>> {
        let mut all: Vec<Arc<Activation>> = self.activations.iter().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Every bound build, sorted by name then platform.
    pub fn all_activated(&self) -> Vec<PackageCandidate> {
        let mut all: Vec<PackageCandidate> = self
            .activations
            .iter()
            .flat_map(|a| a.candidates.iter().cloned())
            .collect();
        all.sort_by(|a, b| {
            a.name()
                .cmp(b.name())
                .then_with(|| a.platform().cmp(b.platform()))
        });
        all
    }

    /// Requirements met by an activation made for an earlier requirement,
    /// oldest first.
    pub fn satisfied_requirements(&self) -> Vec<Requirement> {
        let mut all: Vec<Requirement> = self.satisfied.iter().cloned().collect();
        all.reverse();
        all
    }
}
