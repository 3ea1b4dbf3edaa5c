//! Core data model.
//!
//! A worker is someone who can take a call. Its role determines the priority
//! class used to pick it over other available workers. A call is identified
//! only by the id the sequencer hands out at submission.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Role of a worker. Lower priority class = dispatched first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Director,
    Supervisor,
    Operator,
}

impl Role {
    /// Priority class of the role. 1 is the highest precedence.
    pub fn priority_class(self) -> u8 {
        match self {
            Role::Director => 1,
            Role::Supervisor => 2,
            Role::Operator => 3,
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("director") {
            Ok(Role::Director)
        } else if trimmed.eq_ignore_ascii_case("supervisor") {
            Ok(Role::Supervisor)
        } else if trimmed.eq_ignore_ascii_case("operator") {
            Ok(Role::Operator)
        } else {
            Err(Error::UnknownRole(s.to_string()))
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Director => "director",
            Role::Supervisor => "supervisor",
            Role::Operator => "operator",
        };
        f.pad(s)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// A worker that handles calls. Ids are not required to be unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Worker {
    pub id: u32,
    pub role: Role,
}

impl Worker {
    pub fn new(id: u32, role: Role) -> Self {
        Self { id, role }
    }

    pub fn priority_class(&self) -> u8 {
        self.role.priority_class()
    }
}

impl std::fmt::Display for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.role, self.id)
    }
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// Newtype for call ids. Issued by the sequencer, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub u64);

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
