//! Worker roster files.
//!
//! A roster is a TOML file listing the workers to register at startup:
//!
//! ```toml
//! [[worker]]
//! id = 1
//! role = "director"
//!
//! [[worker]]
//! id = 2
//! role = "operator"
//! ```

use serde::Deserialize;
use std::path::Path;

use crate::engine::Dispatcher;
use crate::error::{Error, Result};
use crate::model::{Role, Worker};

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    worker: Vec<RosterEntry>,
}

#[derive(Debug, Deserialize)]
struct RosterEntry {
    id: u32,
    role: String,
}

/// Workers in the order they should be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    workers: Vec<Worker>,
}

impl Roster {
    /// One director, one supervisor, two operators (ids 1 to 4).
    pub fn reference() -> Self {
        Self {
            workers: vec![
                Worker::new(1, Role::Director),
                Worker::new(2, Role::Supervisor),
                Worker::new(3, Role::Operator),
                Worker::new(4, Role::Operator),
            ],
        }
    }

    /// Parse a roster from TOML. Unknown role names are rejected.
    pub fn parse(content: &str) -> Result<Self> {
        let file: RosterFile =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad roster: {e}")))?;

        let workers = file
            .worker
            .into_iter()
            .map(|entry| {
                let role: Role = entry.role.parse().map_err(|e| {
                    Error::Config(format!("bad roster entry for worker {}: {e}", entry.id))
                })?;
                Ok(Worker::new(entry.id, role))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { workers })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read roster {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Register every worker with the dispatcher, in roster order.
    pub fn register(&self, dispatcher: &Dispatcher) -> Result<()> {
        for worker in &self.workers {
            dispatcher.add(*worker)?;
        }
        Ok(())
    }
}
