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

//! Time-budget contexts.
//!
//! Every orchestration request runs under a tree of [`OperationContext`]s. The
//! root is created per request with a deadline chosen by its [`ContextKind`];
//! sub-operations refine it into children whose deadlines never exceed their
//! parent's. When the root uses large locks, application locks taken anywhere
//! in the tree are registered on the root and released only when the root
//! closes.

use crate::config::{DEFAULT_ADMIN_OP_TIMEOUT, DEFAULT_BATCH_OP_TIMEOUT, DEFAULT_LOCK_OVERHEAD, DEFAULT_SINGLE_OP_TIMEOUT};
use crate::error::{Error, Result};
use crate::types::ApplicationReference;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Releases one application lock. Runs at most once.
pub type UnlockCallback = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Outcome of [`OperationContext::register_lock_acquisition`]
pub enum LockRegistration {
    /// The root context owns the release; the caller must not unlock.
    Deferred,
    /// Large locks are off; the caller releases with the returned callback.
    CallerReleases(UnlockCallback),
}

impl fmt::Debug for LockRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deferred => f.write_str("Deferred"),
            Self::CallerReleases(_) => f.write_str("CallerReleases"),
        }
    }
}

/// Kind of top-level operation, selecting the root time budget and flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Suspend, resume or remove a single host, or change one application
    SingleAppOp,
    /// Suspend many hosts in one batch, holding every lock until the end
    MultiAppOp,
    /// Operator initiated change
    AdminOp,
    /// Evaluate a batch without committing anything
    BatchProbe,
}

/// Time budgets used when creating contexts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextTimeouts {
    pub single_op: Duration,
    pub batch_op: Duration,
    pub admin_op: Duration,
    /// Reserved for the unlock path, subtracted by `child_within_lock`
    pub lock_overhead: Duration,
}

impl Default for ContextTimeouts {
    fn default() -> Self {
        Self {
            single_op: DEFAULT_SINGLE_OP_TIMEOUT,
            batch_op: DEFAULT_BATCH_OP_TIMEOUT,
            admin_op: DEFAULT_ADMIN_OP_TIMEOUT,
            lock_overhead: DEFAULT_LOCK_OVERHEAD,
        }
    }
}

struct ContextNode {
    operation_id: Uuid,
    parent: Option<Arc<ContextNode>>,
    deadline: Instant,
    probe: bool,
    large_locks: bool,
    timeouts: ContextTimeouts,
    /// Deferred unlocks, only ever populated on the root
    locks: Mutex<Vec<(ApplicationReference, UnlockCallback)>>,
    closed: AtomicBool,
}

impl ContextNode {
    fn root(&self) -> &ContextNode {
        let mut node = self;
        while let Some(parent) = node.parent.as_deref() {
            node = parent;
        }
        node
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let locks = std::mem::take(&mut *self.locks.lock());
        // Released newest first, every callback runs even if an earlier one failed
        for (reference, unlock) in locks.into_iter().rev() {
            match unlock() {
                Ok(()) => debug!("Released deferred lock of application {} (operation {})", reference, self.operation_id),
                Err(e) => warn!(
                    "Failed to release lock of application {} (operation {}): {}",
                    reference, self.operation_id, e
                ),
            }
        }
    }
}

/// A node in the operation context tree.
///
/// Dropping a context closes it. Closing the root runs every deferred unlock
/// exactly once.
pub struct OperationContext {
    node: Arc<ContextNode>,
}

impl OperationContext {
    /// Root context with the built-in time budgets
    pub fn root(kind: ContextKind) -> Self {
        Self::root_with(kind, &ContextTimeouts::default())
    }

    /// Root context with the given time budgets
    pub fn root_with(kind: ContextKind, timeouts: &ContextTimeouts) -> Self {
        let (timeout, probe, large_locks) = match kind {
            ContextKind::SingleAppOp => (timeouts.single_op, false, false),
            ContextKind::MultiAppOp => (timeouts.batch_op, false, true),
            ContextKind::AdminOp => (timeouts.admin_op, false, false),
            ContextKind::BatchProbe => (timeouts.batch_op, true, false),
        };

        Self::from_node(ContextNode {
            operation_id: Uuid::new_v4(),
            parent: None,
            deadline: Instant::now() + timeout,
            probe,
            large_locks,
            timeouts: *timeouts,
            locks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn from_node(node: ContextNode) -> Self {
        Self { node: Arc::new(node) }
    }

    fn child(&self, deadline: Instant, probe: bool) -> Self {
        Self::from_node(ContextNode {
            operation_id: self.node.operation_id,
            parent: Some(self.node.clone()),
            deadline: deadline.min(self.node.deadline),
            probe,
            large_locks: self.node.large_locks,
            timeouts: self.node.timeouts,
            locks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Identifier shared by every context of one request, for logging
    pub fn operation_id(&self) -> Uuid {
        self.node.operation_id
    }

    pub fn deadline(&self) -> Instant {
        self.node.deadline
    }

    /// Time left until the deadline; a `Timeout` error once it has passed
    pub fn time_remaining(&self) -> Result<Duration> {
        let now = Instant::now();
        if now >= self.node.deadline {
            return Err(Error::timeout(
                "operation",
                format!(
                    "deadline of operation {} exceeded by {:?}",
                    self.node.operation_id,
                    now - self.node.deadline
                ),
            ));
        }
        Ok(self.node.deadline - now)
    }

    pub fn is_probe(&self) -> bool {
        self.node.probe
    }

    pub fn uses_large_locks(&self) -> bool {
        self.node.large_locks
    }

    pub fn is_root(&self) -> bool {
        self.node.parent.is_none()
    }

    /// Sub-context for work done while holding an application lock. The
    /// deadline is pulled in by the lock overhead so the unlock path still has
    /// time before the lock service gives up on us.
    pub fn child_within_lock(&self) -> Self {
        let deadline = self
            .node
            .deadline
            .checked_sub(self.node.timeouts.lock_overhead)
            .unwrap_or_else(Instant::now);
        self.child(deadline, self.node.probe)
    }

    /// Sub-context for one node group of a batch, bounded by the single
    /// operation budget.
    pub fn child_for_single_app_op(&self, probe: bool) -> Self {
        let deadline = Instant::now() + self.node.timeouts.single_op;
        self.child(deadline, probe)
    }

    /// Record that `reference` was locked within this tree.
    ///
    /// With large locks the root keeps `unlock` and runs it when it closes. A
    /// second registration of the same application on one root releases the
    /// new lock immediately and fails.
    pub fn register_lock_acquisition(&self, reference: &ApplicationReference, unlock: UnlockCallback) -> Result<LockRegistration> {
        let root = self.node.root();
        if !root.large_locks {
            return Ok(LockRegistration::CallerReleases(unlock));
        }

        let mut locks = root.locks.lock();
        if root.closed.load(Ordering::Acquire) || locks.iter().any(|(r, _)| r == reference) {
            drop(locks);
            if let Err(e) = unlock() {
                warn!("Failed to release duplicate lock of application {}: {}", reference, e);
            }
            return Err(Error::invariant_violation(format!(
                "application {} already has a lock registered on operation {}, or the operation is closed",
                reference, root.operation_id
            )));
        }

        locks.push((reference.clone(), unlock));
        debug!(
            "Deferred release of application {} lock to root of operation {}",
            reference, root.operation_id
        );
        Ok(LockRegistration::Deferred)
    }

    /// Whether this tree already holds the lock of `reference`
    pub fn has_lock(&self, reference: &ApplicationReference) -> bool {
        self.node.root().locks.lock().iter().any(|(r, _)| r == reference)
    }

    /// Run every unlock registered on this node. Idempotent.
    pub fn close(&self) {
        self.node.close();
    }
}

impl Drop for OperationContext {
    fn drop(&mut self) {
        self.node.close();
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("operation_id", &self.node.operation_id)
            .field("deadline", &self.node.deadline)
            .field("probe", &self.node.probe)
            .field("large_locks", &self.node.large_locks)
            .field("root", &self.node.parent.is_none())
            .finish()
    }
}
