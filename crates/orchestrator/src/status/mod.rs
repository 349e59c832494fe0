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

pub mod memory;

use crate::context::{LockRegistration, OperationContext, UnlockCallback};
use crate::error::Result;
use crate::types::{ApplicationInstanceStatus, ApplicationReference, HostInfos, HostName, HostStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use tracing::{debug, warn};

/// Durable, lock-guarded storage of host and application status
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Take the exclusive lock of one application, waiting at most until the
    /// context deadline. If the context tree already holds the lock, a handle
    /// sharing it is returned without waiting.
    async fn lock_application(&self, context: &OperationContext, reference: &ApplicationReference) -> Result<ApplicationLock>;

    /// Unlocked read of every host status of an application. May be stale.
    async fn host_infos(&self, reference: &ApplicationReference) -> Result<HostInfos>;

    /// Unlocked read of an application status. May be stale.
    async fn application_instance_status(&self, reference: &ApplicationReference) -> Result<ApplicationInstanceStatus>;
}

/// Store access for one locked application. Only reachable through an
/// [`ApplicationLock`].
#[async_trait]
pub trait StatusSession: Send + Sync {
    async fn host_infos(&self) -> Result<HostInfos>;

    async fn set_host_status(&self, hostname: &HostName, status: HostStatus) -> Result<()>;

    async fn application_instance_status(&self) -> Result<ApplicationInstanceStatus>;

    async fn set_application_instance_status(&self, status: ApplicationInstanceStatus) -> Result<()>;
}

/// Scoped handle on one application's lock.
///
/// Dropping the handle releases the lock unless the release was deferred to
/// the root context or the handle re-entered a lock the tree already held.
/// Writes are skipped when the handle was taken under a probe context.
pub struct ApplicationLock {
    reference: ApplicationReference,
    probe: bool,
    session: Box<dyn StatusSession>,
    release: Mutex<Option<UnlockCallback>>,
}

impl ApplicationLock {
    /// Wrap a freshly acquired lock and register it with the context tree
    pub fn acquired(
        context: &OperationContext,
        reference: ApplicationReference,
        session: Box<dyn StatusSession>,
        unlock: UnlockCallback,
    ) -> Result<Self> {
        let release = match context.register_lock_acquisition(&reference, unlock)? {
            LockRegistration::Deferred => None,
            LockRegistration::CallerReleases(unlock) => Some(unlock),
        };
        debug!("Locked application {} (operation {})", reference, context.operation_id());

        Ok(Self {
            reference,
            probe: context.is_probe(),
            session,
            release: Mutex::new(release),
        })
    }

    /// Handle on a lock the context tree already holds
    pub fn reentrant(context: &OperationContext, reference: ApplicationReference, session: Box<dyn StatusSession>) -> Self {
        debug!(
            "Re-entering lock of application {} (operation {})",
            reference,
            context.operation_id()
        );
        Self {
            reference,
            probe: context.is_probe(),
            session,
            release: Mutex::new(None),
        }
    }

    pub fn reference(&self) -> &ApplicationReference {
        &self.reference
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub async fn host_infos(&self) -> Result<HostInfos> {
        self.session.host_infos().await
    }

    pub async fn host_status(&self, hostname: &HostName) -> Result<HostStatus> {
        Ok(self.session.host_infos().await?.get_or_no_remarks(hostname).status)
    }

    pub async fn set_host_state(&self, hostname: &HostName, status: HostStatus) -> Result<()> {
        if self.probe {
            return Ok(());
        }
        debug!("Setting host {} of application {} to {}", hostname, self.reference, status);
        self.session.set_host_status(hostname, status).await
    }

    pub async fn application_instance_status(&self) -> Result<ApplicationInstanceStatus> {
        self.session.application_instance_status().await
    }

    pub async fn set_application_instance_status(&self, status: ApplicationInstanceStatus) -> Result<()> {
        if self.probe {
            return Ok(());
        }
        self.session.set_application_instance_status(status).await
    }
}

impl Drop for ApplicationLock {
    fn drop(&mut self) {
        if let Some(unlock) = self.release.get_mut().take() {
            match unlock() {
                Ok(()) => debug!("Released lock of application {}", self.reference),
                Err(e) => warn!("Failed to release lock of application {}: {}", self.reference, e),
            }
        }
    }
}

impl fmt::Debug for ApplicationLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationLock")
            .field("reference", &self.reference)
            .field("probe", &self.probe)
            .field("releases_on_drop", &self.release.lock().is_some())
            .finish()
    }
}
