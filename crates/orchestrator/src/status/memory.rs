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

use crate::context::{OperationContext, UnlockCallback};
use crate::error::{Error, Result};
use crate::status::{ApplicationLock, StatusSession, StatusStore};
use crate::types::{ApplicationInstanceStatus, ApplicationReference, HostInfos, HostName, HostStatus};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::time::timeout;

#[derive(Debug, Default)]
struct ApplicationRecord {
    status: ApplicationInstanceStatus,
    hosts: HostInfos,
}

#[derive(Debug, Default)]
struct Shared {
    records: RwLock<HashMap<ApplicationReference, ApplicationRecord>>,
    locks: Mutex<HashMap<ApplicationReference, Arc<tokio::sync::Mutex<()>>>>,
}

/// Process-local status store.
///
/// Each application gets one exclusive async lock; waiting for it is bounded
/// by the deadline of the requesting context.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStatusStore {
    shared: Arc<Shared>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn application_mutex(&self, reference: &ApplicationReference) -> Arc<tokio::sync::Mutex<()>> {
        self.shared.locks.lock().entry(reference.clone()).or_default().clone()
    }

    fn session(&self, reference: &ApplicationReference) -> Box<dyn StatusSession> {
        Box::new(InMemorySession {
            reference: reference.clone(),
            shared: self.shared.clone(),
        })
    }

    /// Whether someone currently holds the lock of `reference`
    pub fn is_locked(&self, reference: &ApplicationReference) -> bool {
        self.application_mutex(reference).try_lock().is_err()
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn lock_application(&self, context: &OperationContext, reference: &ApplicationReference) -> Result<ApplicationLock> {
        if context.has_lock(reference) {
            return Ok(ApplicationLock::reentrant(context, reference.clone(), self.session(reference)));
        }

        let remaining = context.time_remaining()?;
        let guard = timeout(remaining, self.application_mutex(reference).lock_owned())
            .await
            .map_err(|_| {
                Error::timeout(
                    "application lock",
                    format!("gave up waiting {remaining:?} for the lock of application {reference}"),
                )
            })?;

        let unlock: UnlockCallback = Box::new(move || {
            drop(guard);
            Ok(())
        });
        ApplicationLock::acquired(context, reference.clone(), self.session(reference), unlock)
    }

    async fn host_infos(&self, reference: &ApplicationReference) -> Result<HostInfos> {
        Ok(self
            .shared
            .records
            .read()
            .get(reference)
            .map(|r| r.hosts.clone())
            .unwrap_or_default())
    }

    async fn application_instance_status(&self, reference: &ApplicationReference) -> Result<ApplicationInstanceStatus> {
        Ok(self.shared.records.read().get(reference).map(|r| r.status).unwrap_or_default())
    }
}

struct InMemorySession {
    reference: ApplicationReference,
    shared: Arc<Shared>,
}

#[async_trait]
impl StatusSession for InMemorySession {
    async fn host_infos(&self) -> Result<HostInfos> {
        Ok(self
            .shared
            .records
            .read()
            .get(&self.reference)
            .map(|r| r.hosts.clone())
            .unwrap_or_default())
    }

    async fn set_host_status(&self, hostname: &HostName, status: HostStatus) -> Result<()> {
        let mut records = self.shared.records.write();
        let record = records.entry(self.reference.clone()).or_default();
        let info = record.hosts.get_or_no_remarks(hostname).transition(status, SystemTime::now());
        record.hosts.set(hostname.clone(), info);
        Ok(())
    }

    async fn application_instance_status(&self) -> Result<ApplicationInstanceStatus> {
        Ok(self
            .shared
            .records
            .read()
            .get(&self.reference)
            .map(|r| r.status)
            .unwrap_or_default())
    }

    async fn set_application_instance_status(&self, status: ApplicationInstanceStatus) -> Result<()> {
        self.shared.records.write().entry(self.reference.clone()).or_default().status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextKind;
    use std::time::Duration;

    fn reference() -> ApplicationReference {
        ApplicationReference::new("tenant", "app")
    }

    #[tokio::test]
    async fn test_lock_released_on_drop() {
        let store = InMemoryStatusStore::new();
        let context = OperationContext::root(ContextKind::SingleAppOp);

        let lock = store.lock_application(&context, &reference()).await.unwrap();
        assert!(store.is_locked(&reference()));
        lock.set_host_state(&HostName::new("h1"), HostStatus::AllowedToBeDown).await.unwrap();
        drop(lock);
        assert!(!store.is_locked(&reference()));

        let infos = store.host_infos(&reference()).await.unwrap();
        let info = infos.get_or_no_remarks(&HostName::new("h1"));
        assert_eq!(info.status, HostStatus::AllowedToBeDown);
        assert!(info.suspended_since.is_some());
    }

    #[tokio::test]
    async fn test_probe_lock_does_not_write() {
        let store = InMemoryStatusStore::new();
        let context = OperationContext::root(ContextKind::BatchProbe);

        let lock = store.lock_application(&context, &reference()).await.unwrap();
        lock.set_host_state(&HostName::new("h1"), HostStatus::AllowedToBeDown).await.unwrap();
        lock.set_application_instance_status(ApplicationInstanceStatus::AllowedToBeDown)
            .await
            .unwrap();
        drop(lock);

        assert!(store.host_infos(&reference()).await.unwrap().is_empty());
        assert_eq!(
            store.application_instance_status(&reference()).await.unwrap(),
            ApplicationInstanceStatus::NoRemarks
        );
    }

    #[tokio::test]
    async fn test_large_locks_held_until_root_closes() {
        let store = InMemoryStatusStore::new();
        let root = OperationContext::root(ContextKind::MultiAppOp);

        let probe = root.child_for_single_app_op(true);
        drop(store.lock_application(&probe, &reference()).await.unwrap());
        drop(probe);
        assert!(store.is_locked(&reference()));

        // Commit pass re-enters without waiting on itself
        let commit = root.child_for_single_app_op(false);
        let lock = store.lock_application(&commit, &reference()).await.unwrap();
        lock.set_host_state(&HostName::new("h1"), HostStatus::AllowedToBeDown).await.unwrap();
        drop(lock);
        drop(commit);
        assert!(store.is_locked(&reference()));

        drop(root);
        assert!(!store.is_locked(&reference()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_wait_bounded_by_deadline() {
        let store = InMemoryStatusStore::new();
        let holder = OperationContext::root(ContextKind::AdminOp);
        let _held = store.lock_application(&holder, &reference()).await.unwrap();

        let waiter = OperationContext::root(ContextKind::SingleAppOp);
        let started = tokio::time::Instant::now();
        let err = store.lock_application(&waiter, &reference()).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}
