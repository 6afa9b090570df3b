//! Engine configuration.
//!
//! [`EngineConfig`] is deserialized from TOML. Every field is optional; a
//! missing field takes its default.
//!
//! ```toml
//! worker_threads = 4
//!
//! [executor]
//! spin_iterations = 64
//! stall_timeout_ms = 2000   # 0 disables the watchdog
//!
//! [graph]
//! conflict_policy = "registration_order"   # or "strict"
//!
//! [stages]
//! update = "ordered"
//! shutdown = "reverse_sequential"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::error::ConfigError;
use crate::engine::executor::{ExecutorKind, ExecutorSettings};
use crate::engine::graph::ConflictPolicy;
use crate::engine::types::Stage;


/// Top-level engine configuration.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Worker pool size; `None` lets rayon choose.
    pub worker_threads: Option<usize>,
    /// Ordered executor tuning.
    pub executor: ExecutorConfig,
    /// Graph builder options.
    pub graph: GraphConfig,
    /// Executor strategy per stage.
    pub stages: StageExecutors,
}

/// `[executor]` table.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Empty scans before the driving thread blocks.
    pub spin_iterations: u32,
    /// Stall watchdog deadline in milliseconds; `0` disables it.
    pub stall_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { spin_iterations: 64, stall_timeout_ms: 2000 }
    }
}

/// `[graph]` table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphConfig {
    /// Handling of unordered access conflicts.
    pub conflict_policy: ConflictPolicy,
}

/// `[stages]` table.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageExecutors {
    /// Executor for [`Stage::Init`].
    pub init: ExecutorKind,
    /// Executor for [`Stage::PreUpdate`].
    pub pre_update: ExecutorKind,
    /// Executor for [`Stage::Update`].
    pub update: ExecutorKind,
    /// Executor for [`Stage::PostUpdate`].
    pub post_update: ExecutorKind,
    /// Executor for [`Stage::Last`].
    pub last: ExecutorKind,
    /// Executor for [`Stage::Shutdown`].
    pub shutdown: ExecutorKind,
}

impl Default for StageExecutors {
    fn default() -> Self {
        Self {
            init: ExecutorKind::Sequential,
            pre_update: ExecutorKind::Ordered,
            update: ExecutorKind::Ordered,
            post_update: ExecutorKind::Ordered,
            last: ExecutorKind::Ordered,
            shutdown: ExecutorKind::ReverseSequential,
        }
    }
}

impl StageExecutors {
    /// Executor configured for `stage`.
    pub fn get(&self, stage: Stage) -> ExecutorKind {
        match stage {
            Stage::Init => self.init,
            Stage::PreUpdate => self.pre_update,
            Stage::Update => self.update,
            Stage::PostUpdate => self.post_update,
            Stage::Last => self.last,
            Stage::Shutdown => self.shutdown,
        }
    }

    /// Overrides the executor for `stage`.
    pub fn set(&mut self, stage: Stage, kind: ExecutorKind) {
        let slot = match stage {
            Stage::Init => &mut self.init,
            Stage::PreUpdate => &mut self.pre_update,
            Stage::Update => &mut self.update,
            Stage::PostUpdate => &mut self.post_update,
            Stage::Last => &mut self.last,
            Stage::Shutdown => &mut self.shutdown,
        };
        *slot = kind;
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Rejects values that parse but cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == Some(0) {
            return Err(ConfigError::Invalid {
                field: "worker_threads",
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }

    /// Settings for the ordered executor.
    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            spin_iterations: self.executor.spin_iterations,
            stall_timeout: match self.executor.stall_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }
}
