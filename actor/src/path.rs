// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor paths
//!
//! Hierarchical names for actors. A path mirrors the supervision tree: the path of a child is
//! the path of its parent plus one segment, so `/user/parent/child` is supervised by
//! `/user/parent`.
//!

use serde::{Deserialize, Serialize};

use std::cmp::Ordering;
use std::fmt::{Error, Formatter};

/// Hierarchical actor path.
#[derive(
    Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ActorPath(Vec<String>);

impl ActorPath {
    /// Path of the supervising actor. The parent of a top level path is the empty path.
    pub fn parent(&self) -> Self {
        if self.0.len() > 1 {
            let mut tokens = self.0.clone();
            tokens.truncate(tokens.len() - 1);
            ActorPath(tokens)
        } else {
            ActorPath(Vec::new())
        }
    }

    /// Last segment of the path.
    pub fn key(&self) -> String {
        self.0.last().cloned().unwrap_or_default()
    }

    /// Number of segments.
    pub fn level(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_descendant_of(&self, other: &ActorPath) -> bool {
        self.0.len() > other.0.len() && self.0.starts_with(&other.0)
    }

    pub fn is_child_of(&self, other: &ActorPath) -> bool {
        !self.is_empty() && self.parent() == *other
    }

    pub fn is_parent_of(&self, other: &ActorPath) -> bool {
        other.is_child_of(self)
    }
}

fn tokens(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|x| !x.trim().is_empty())
        .map(|s| s.to_string())
        .collect()
}

impl From<&str> for ActorPath {
    fn from(str: &str) -> Self {
        ActorPath(tokens(str))
    }
}

impl From<String> for ActorPath {
    fn from(string: String) -> Self {
        ActorPath::from(string.as_str())
    }
}

impl std::ops::Div<&str> for ActorPath {
    type Output = ActorPath;

    fn div(self, rhs: &str) -> Self::Output {
        let mut keys = self.0;
        keys.append(&mut tokens(rhs));
        ActorPath(keys)
    }
}

impl std::fmt::Display for ActorPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        match self.level().cmp(&1) {
            Ordering::Less => write!(f, "/"),
            Ordering::Equal => write!(f, "/{}", self.0[0]),
            Ordering::Greater => write!(f, "/{}", self.0.join("/")),
        }
    }
}

impl std::fmt::Debug for ActorPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        std::fmt::Display::fmt(self, f)
    }
}
