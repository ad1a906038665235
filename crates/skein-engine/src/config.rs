//! Engine configuration.
//!
//! [`EngineConfig`] is plain data with serde support so hosts can load it
//! from JSON. Every field has a default; a partial document only overrides
//! what it names.

use serde::{Deserialize, Serialize};

use crate::pool::{InlinePool, JobPool, WorkerPool};
use crate::EngineError;

/// How world jobs are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threading {
    /// Run every job on the thread that calls `update`.
    Inline,
    /// A fixed pool of worker threads.
    Workers(usize),
    /// One worker per available CPU.
    Available,
}

impl Threading {
    /// Worker threads this mode starts. Zero for inline execution.
    pub fn worker_count(self) -> usize {
        match self {
            Self::Inline => 0,
            Self::Workers(count) => count.max(1),
            Self::Available => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl Default for Threading {
    fn default() -> Self {
        Self::Available
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub threading: Threading,
    /// Schedule each world as soon as it is created.
    pub auto_schedule_on_create: bool,
    /// Check entity ownership on every world event.
    pub paranoid_world_events: bool,
    /// Update group worlds join unless their builder picks another.
    pub default_update_group: String,
    pub default_update_group_order: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threading: Threading::default(),
            auto_schedule_on_create: true,
            paranoid_world_events: false,
            default_update_group: "default".to_owned(),
            default_update_group_order: 0,
        }
    }
}

impl EngineConfig {
    pub fn inline() -> Self {
        Self {
            threading: Threading::Inline,
            ..Self::default()
        }
    }

    pub fn with_workers(workers: usize) -> Self {
        Self {
            threading: Threading::Workers(workers),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The job pool matching [`threading`](Self::threading).
    pub fn build_pool(&self) -> Box<dyn JobPool> {
        match self.threading {
            Threading::Inline => Box::new(InlinePool::new()),
            threading => Box::new(WorkerPool::new(threading.worker_count())),
        }
    }
}
