// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::context::ContextTimeouts;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Environment variable name that overrides the time budget of a single-host operation.
/// - Unit: humantime duration string, e.g. "10s".
/// - Example: `export RUSTFS_ORCHESTRATOR_SINGLE_OP_TIMEOUT=15s`
pub const ENV_ORCHESTRATOR_SINGLE_OP_TIMEOUT: &str = "RUSTFS_ORCHESTRATOR_SINGLE_OP_TIMEOUT";

/// Environment variable name that overrides the time budget of a multi-host batch operation.
/// - Unit: humantime duration string, e.g. "60s".
/// - Note: each node group of a batch is still bounded by the single-host budget.
pub const ENV_ORCHESTRATOR_BATCH_OP_TIMEOUT: &str = "RUSTFS_ORCHESTRATOR_BATCH_OP_TIMEOUT";

/// Environment variable name that overrides the time budget of an admin operation.
/// - Unit: humantime duration string, e.g. "5m".
pub const ENV_ORCHESTRATOR_ADMIN_OP_TIMEOUT: &str = "RUSTFS_ORCHESTRATOR_ADMIN_OP_TIMEOUT";

/// Environment variable name that overrides the time reserved for the unlock path
/// after an application lock has been taken.
/// - Unit: humantime duration string, e.g. "500ms".
/// - Note: must stay below the lock service's own session timeout margin.
pub const ENV_ORCHESTRATOR_LOCK_OVERHEAD: &str = "RUSTFS_ORCHESTRATOR_LOCK_OVERHEAD";

/// Environment variable name that overrides how long `resume` waits for the
/// health view to converge before evaluating.
/// - Unit: humantime duration string, e.g. "3s".
pub const ENV_ORCHESTRATOR_RESUME_GRACE_PERIOD: &str = "RUSTFS_ORCHESTRATOR_RESUME_GRACE_PERIOD";

/// Default single-host operation budget: 10 seconds.
pub const DEFAULT_SINGLE_OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default batch operation budget: 60 seconds.
pub const DEFAULT_BATCH_OP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default admin operation budget: 5 minutes.
pub const DEFAULT_ADMIN_OP_TIMEOUT: Duration = Duration::from_secs(300);

/// Default unlock-path reservation inside a lock: 500 milliseconds.
pub const DEFAULT_LOCK_OVERHEAD: Duration = Duration::from_millis(500);

/// Default resume grace period: 3 seconds.
pub const DEFAULT_RESUME_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Read a humantime duration from the environment, falling back to `default`.
pub fn get_env_duration(key: &str, default: Duration) -> Duration {
    match std::env::var(key) {
        Ok(value) => match humantime::parse_duration(value.trim()) {
            Ok(duration) => duration,
            Err(e) => {
                warn!("Invalid duration '{}' in {}: {}, using default {:?}", value, key, e, default);
                default
            }
        },
        Err(_) => default,
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Budget of a single-host or single-application operation
    #[serde(with = "humantime_duration")]
    pub single_op_timeout: Duration,
    /// Budget of a multi-host batch operation
    #[serde(with = "humantime_duration")]
    pub batch_op_timeout: Duration,
    /// Budget of an admin operation
    #[serde(with = "humantime_duration")]
    pub admin_op_timeout: Duration,
    /// Time reserved for the unlock path once a lock is held
    #[serde(with = "humantime_duration")]
    pub lock_overhead: Duration,
    /// Wait before a host resume is evaluated
    #[serde(with = "humantime_duration")]
    pub resume_grace_period: Duration,
}

impl OrchestratorConfig {
    /// Built-in defaults, ignoring the environment
    pub fn builtin() -> Self {
        Self {
            single_op_timeout: DEFAULT_SINGLE_OP_TIMEOUT,
            batch_op_timeout: DEFAULT_BATCH_OP_TIMEOUT,
            admin_op_timeout: DEFAULT_ADMIN_OP_TIMEOUT,
            lock_overhead: DEFAULT_LOCK_OVERHEAD,
            resume_grace_period: DEFAULT_RESUME_GRACE_PERIOD,
        }
    }

    pub fn with_resume_grace_period(mut self, grace: Duration) -> Self {
        self.resume_grace_period = grace;
        self
    }

    pub fn context_timeouts(&self) -> ContextTimeouts {
        ContextTimeouts {
            single_op: self.single_op_timeout,
            batch_op: self.batch_op_timeout,
            admin_op: self.admin_op_timeout,
            lock_overhead: self.lock_overhead,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            single_op_timeout: get_env_duration(ENV_ORCHESTRATOR_SINGLE_OP_TIMEOUT, DEFAULT_SINGLE_OP_TIMEOUT),
            batch_op_timeout: get_env_duration(ENV_ORCHESTRATOR_BATCH_OP_TIMEOUT, DEFAULT_BATCH_OP_TIMEOUT),
            admin_op_timeout: get_env_duration(ENV_ORCHESTRATOR_ADMIN_OP_TIMEOUT, DEFAULT_ADMIN_OP_TIMEOUT),
            lock_overhead: get_env_duration(ENV_ORCHESTRATOR_LOCK_OVERHEAD, DEFAULT_LOCK_OVERHEAD),
            resume_grace_period: get_env_duration(ENV_ORCHESTRATOR_RESUME_GRACE_PERIOD, DEFAULT_RESUME_GRACE_PERIOD),
        }
    }
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
