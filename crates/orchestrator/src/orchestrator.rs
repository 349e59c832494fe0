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

use crate::config::OrchestratorConfig;
use crate::context::{ContextKind, ContextTimeouts, OperationContext};
use crate::controller::ClusterControllerClient;
use crate::error::{Error, ErrorKind, Result};
use crate::node_group::{NodeGroup, group_by_application, order_for_suspend};
use crate::policy::{AdmissionPolicy, ApplicationApi};
use crate::status::StatusStore;
use crate::topology::{ApplicationInstance, ServiceInstance, TopologySource};
use crate::types::{
    ApplicationInstanceStatus, ApplicationReference, ClusterControllerNodeState, HostInfo, HostInfos, HostName, HostStatus,
    SuspensionReasons,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything known about one host, read without locking
#[derive(Debug, Clone)]
pub struct Host {
    pub hostname: HostName,
    pub info: HostInfo,
    pub application: ApplicationReference,
    pub service_instances: Vec<ServiceInstance>,
}

/// Orchestration engine.
///
/// Enforces the host and application state machines. Every mutation happens
/// under the affected application's lock, and every operation is bounded by
/// the deadline of its own root context.
pub struct Orchestrator {
    config: OrchestratorConfig,
    timeouts: ContextTimeouts,
    status_store: Arc<dyn StatusStore>,
    topology: Arc<dyn TopologySource>,
    policy: Arc<dyn AdmissionPolicy>,
    cluster_controller: Arc<dyn ClusterControllerClient>,
}

impl Orchestrator {
    /// Create an orchestrator configured from the environment
    pub fn new(
        status_store: Arc<dyn StatusStore>,
        topology: Arc<dyn TopologySource>,
        policy: Arc<dyn AdmissionPolicy>,
        cluster_controller: Arc<dyn ClusterControllerClient>,
    ) -> Self {
        Self::with_config(OrchestratorConfig::default(), status_store, topology, policy, cluster_controller)
    }

    pub fn with_config(
        config: OrchestratorConfig,
        status_store: Arc<dyn StatusStore>,
        topology: Arc<dyn TopologySource>,
        policy: Arc<dyn AdmissionPolicy>,
        cluster_controller: Arc<dyn ClusterControllerClient>,
    ) -> Self {
        Self {
            timeouts: config.context_timeouts(),
            config,
            status_store,
            topology,
            policy,
            cluster_controller,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Root context of a new request
    pub fn new_context(&self, kind: ContextKind) -> OperationContext {
        OperationContext::root_with(kind, &self.timeouts)
    }

    fn application_of(&self, hostname: &HostName) -> Result<Arc<ApplicationInstance>> {
        self.topology.application_of(hostname).ok_or_else(|| Error::HostNotFound {
            hostname: hostname.clone(),
        })
    }

    fn application(&self, reference: &ApplicationReference) -> Result<Arc<ApplicationInstance>> {
        self.topology.application(reference).ok_or_else(|| Error::ApplicationNotFound {
            reference: reference.clone(),
        })
    }

    // ------------------------------------------------------------------
    // Host operations
    // ------------------------------------------------------------------

    /// Suspend one host if the admission policy allows it
    pub async fn suspend(&self, hostname: &HostName) -> Result<SuspensionReasons> {
        let application = self.application_of(hostname)?;
        let context = self.new_context(ContextKind::SingleAppOp);
        let group = NodeGroup::with_host(application, hostname.clone());
        self.suspend_group(&context, &group).await
    }

    /// Suspend every host of `group` under `context`.
    ///
    /// Succeeds without asking the policy when the whole application is
    /// already allowed to be down.
    pub async fn suspend_group(&self, context: &OperationContext, group: &NodeGroup) -> Result<SuspensionReasons> {
        let reasons = {
            let lock = self.status_store.lock_application(context, group.reference()).await?;

            if lock.application_instance_status().await? == ApplicationInstanceStatus::AllowedToBeDown {
                debug!("Application {} is allowed to be down, {} is implicitly suspended", group.reference(), group);
                return Ok(SuspensionReasons::new());
            }

            let mut application = ApplicationApi::new(group, &lock, self.cluster_controller.as_ref()).await?;
            let within_lock = context.child_within_lock();
            self.policy.grant_suspension_request(&within_lock, &mut application).await?
        };

        if let Some(message) = reasons.log_message() {
            info!(
                "{} ({}, operation {}{})",
                message,
                group,
                context.operation_id(),
                if context.is_probe() { ", probe" } else { "" }
            );
        }
        Ok(reasons)
    }

    /// Return a suspended host to service.
    ///
    /// Waits the resume grace period first so health reports of restarted
    /// services can settle. A no-op unless the host is `AllowedToBeDown` and
    /// its application is not.
    pub async fn resume(&self, hostname: &HostName) -> Result<()> {
        let application = self.application_of(hostname)?;

        let grace = self.config.resume_grace_period;
        if !grace.is_zero() {
            debug!("Waiting {:?} before evaluating resume of {}", grace, hostname);
            tokio::time::sleep(grace).await;
        }

        let context = self.new_context(ContextKind::SingleAppOp);
        let group = NodeGroup::with_host(application, hostname.clone());
        let lock = self.status_store.lock_application(&context, group.reference()).await?;

        let status = lock.host_status(hostname).await?;
        if status != HostStatus::AllowedToBeDown {
            debug!("Host {} is {}, nothing to resume", hostname, status);
            return Ok(());
        }
        if lock.application_instance_status().await? == ApplicationInstanceStatus::AllowedToBeDown {
            debug!(
                "Application {} is allowed to be down, leaving {} suspended",
                group.reference(),
                hostname
            );
            return Ok(());
        }

        let mut application = ApplicationApi::new(&group, &lock, self.cluster_controller.as_ref()).await?;
        let within_lock = context.child_within_lock();
        self.policy
            .release_suspension_grant(&within_lock, &mut application, hostname)
            .await?;
        application.set_host_state(hostname, HostStatus::NoRemarks).await?;

        info!("Resumed host {} of application {}", hostname, group.reference());
        Ok(())
    }

    /// Ask whether the host may be removed for good. Host status is not
    /// changed; the caller carries out the removal.
    pub async fn acquire_permission_to_remove(&self, hostname: &HostName) -> Result<()> {
        let application = self.application_of(hostname)?;
        let context = self.new_context(ContextKind::SingleAppOp);
        let group = NodeGroup::with_host(application, hostname.clone());
        let lock = self.status_store.lock_application(&context, group.reference()).await?;

        let mut application = ApplicationApi::new(&group, &lock, self.cluster_controller.as_ref()).await?;
        let within_lock = context.child_within_lock();
        self.policy.acquire_permission_to_remove(&within_lock, &mut application).await?;

        debug!("Granted permission to remove {}", hostname);
        Ok(())
    }

    /// Move a suspended host to the terminal `PermanentlyDown` status.
    ///
    /// Refused for a host with no remarks; a no-op when already permanently
    /// down.
    pub async fn mark_permanently_down(&self, hostname: &HostName) -> Result<()> {
        let application = self.application_of(hostname)?;
        let context = self.new_context(ContextKind::AdminOp);
        let lock = self.status_store.lock_application(&context, &application.reference).await?;

        match lock.host_status(hostname).await? {
            HostStatus::PermanentlyDown => {
                debug!("Host {} is already permanently down", hostname);
                Ok(())
            }
            HostStatus::NoRemarks => Err(Error::denied(
                hostname.clone(),
                "host state machine",
                "a host must be allowed to be down before it can be marked permanently down",
            )),
            HostStatus::AllowedToBeDown => {
                lock.set_host_state(hostname, HostStatus::PermanentlyDown).await?;
                info!("Host {} of application {} is permanently down", hostname, application.reference);
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Batch operations
    // ------------------------------------------------------------------

    /// Suspend `hostnames` on behalf of `parent_host`, all or nothing per
    /// application.
    ///
    /// Groups are probed in the global application order, then committed in
    /// the same order. Locks taken by the probe pass are held until the batch
    /// returns, so nothing can change between probe and commit.
    pub async fn suspend_all(&self, parent_host: &HostName, hostnames: &[HostName]) -> Result<SuspensionReasons> {
        let groups = group_by_application(self.topology.as_ref(), hostnames).map_err(|e| match e {
            Error::HostNotFound { .. } => Error::BatchHostNotFound {
                parent_host: parent_host.clone(),
                hostnames: hostnames.to_vec(),
                source: Box::new(e),
            },
            other => other,
        })?;
        let groups = order_for_suspend(groups);

        let context = self.new_context(ContextKind::MultiAppOp);

        for group in &groups {
            let probe = context.child_for_single_app_op(true);
            self.suspend_group(&probe, group)
                .await
                .map_err(|e| batch_error(parent_host, group, e))?;
        }

        let mut reasons = SuspensionReasons::new();
        for group in &groups {
            let commit = context.child_for_single_app_op(false);
            let granted = self
                .suspend_group(&commit, group)
                .await
                .map_err(|e| batch_error(parent_host, group, e))?;
            reasons.merge(granted);
        }

        info!(
            "Suspended {} hosts in {} applications for parent host {} (operation {})",
            groups.iter().map(|g| g.hostnames().len()).sum::<usize>(),
            groups.len(),
            parent_host,
            context.operation_id()
        );
        context.close();
        Ok(reasons)
    }

    // ------------------------------------------------------------------
    // Application operations
    // ------------------------------------------------------------------

    /// Take a whole application down for maintenance
    pub async fn suspend_application(&self, reference: &ApplicationReference) -> Result<()> {
        self.set_application_status(reference, ApplicationInstanceStatus::AllowedToBeDown)
            .await
    }

    /// Bring a whole application back from maintenance.
    ///
    /// The admission policy signs off on every host the application still
    /// holds down. A refusal leaves the application allowed to be down.
    pub async fn resume_application(&self, reference: &ApplicationReference) -> Result<()> {
        self.set_application_status(reference, ApplicationInstanceStatus::NoRemarks)
            .await
    }

    async fn set_application_status(&self, reference: &ApplicationReference, status: ApplicationInstanceStatus) -> Result<()> {
        let application = self.application(reference)?;
        let context = self.new_context(ContextKind::SingleAppOp);
        let lock = self.status_store.lock_application(&context, reference).await?;

        if lock.application_instance_status().await? == status {
            debug!("Application {} is already {}", reference, status);
            return Ok(());
        }

        if status == ApplicationInstanceStatus::AllowedToBeDown {
            let host_infos = lock.host_infos().await?;
            for hostname in application.hostnames() {
                if host_infos.get_or_no_remarks(&hostname).status == HostStatus::NoRemarks {
                    lock.set_host_state(&hostname, HostStatus::AllowedToBeDown).await?;
                }
            }

            // Hosts are not rolled back if a controller refuses; the next
            // resume reconciles them.
            let within_lock = context.child_within_lock();
            self.set_content_clusters_state(&within_lock, &application, ClusterControllerNodeState::Maintenance)
                .await?;
        } else {
            let mut group = NodeGroup::new(application.clone());
            let host_infos = lock.host_infos().await?;
            for hostname in application.hostnames() {
                if host_infos.get_or_no_remarks(&hostname).status == HostStatus::AllowedToBeDown {
                    group.add_host(hostname);
                }
            }

            let within_lock = context.child_within_lock();
            let mut api = ApplicationApi::new(&group, &lock, self.cluster_controller.as_ref()).await?;
            for hostname in group.hostnames() {
                self.policy
                    .release_suspension_grant(&within_lock, &mut api, hostname)
                    .await
                    .map_err(|e| match e.kind() {
                        ErrorKind::Denied => Error::ApplicationStateChangeDenied {
                            reference: reference.clone(),
                            message: e.to_string(),
                        },
                        _ => e,
                    })?;
            }

            self.set_content_clusters_state(&within_lock, &application, ClusterControllerNodeState::Up)
                .await?;
            for hostname in group.hostnames() {
                api.set_host_state(hostname, HostStatus::NoRemarks).await?;
            }
        }

        lock.set_application_instance_status(status).await?;
        info!("Application {} is now {}", reference, status);
        Ok(())
    }

    /// Ask the controller of every content cluster of `application` for
    /// `state`. A timeout is returned as is, any other failure as an internal
    /// error.
    async fn set_content_clusters_state(
        &self,
        context: &OperationContext,
        application: &ApplicationInstance,
        state: ClusterControllerNodeState,
    ) -> Result<()> {
        let reference = &application.reference;
        for cluster in application.content_clusters() {
            if let Err(e) = self
                .cluster_controller
                .set_application_state(context, reference, &cluster.id, state)
                .await
            {
                if e.is_timeout() {
                    return Err(e);
                }
                warn!(
                    "Failed to set content cluster {} of application {} to {}, host statuses are kept: {}",
                    cluster.id, reference, state, e
                );
                return Err(Error::internal(format!(
                    "failed to set content cluster {} of application {} to {}: {}",
                    cluster.id, reference, state, e
                )));
            }
        }
        Ok(())
    }

    /// Whether every storage node of the application could enter maintenance
    /// right now. Nothing is changed; any failure reads as `false`.
    pub async fn is_quiescent(&self, reference: &ApplicationReference) -> bool {
        let Some(application) = self.topology.application(reference) else {
            debug!("Application {} is unknown, not quiescent", reference);
            return false;
        };
        let context = self.new_context(ContextKind::BatchProbe);

        for cluster in application.content_clusters() {
            for instance in &cluster.instances {
                let Some(index) = instance.storage_node_index else {
                    continue;
                };
                match self
                    .cluster_controller
                    .try_set_node_state(
                        &context,
                        &cluster.id,
                        &instance.hostname,
                        index,
                        ClusterControllerNodeState::Maintenance,
                        true,
                    )
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(
                            "Storage node {} ({}) of cluster {} cannot enter maintenance, {} is not quiescent",
                            index, instance.config_id, cluster.id, reference
                        );
                        return false;
                    }
                    Err(e) => {
                        debug!("Quiescence probe of {} failed: {}", reference, e);
                        return false;
                    }
                }
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Unlocked reads
    // ------------------------------------------------------------------

    pub async fn host(&self, hostname: &HostName) -> Result<Host> {
        let application = self.application_of(hostname)?;
        let info = self
            .status_store
            .host_infos(&application.reference)
            .await?
            .get_or_no_remarks(hostname);

        Ok(Host {
            hostname: hostname.clone(),
            info,
            application: application.reference.clone(),
            service_instances: application.service_instances_on(hostname),
        })
    }

    pub async fn host_status(&self, hostname: &HostName) -> Result<HostStatus> {
        let application = self.application_of(hostname)?;
        Ok(self
            .status_store
            .host_infos(&application.reference)
            .await?
            .get_or_no_remarks(hostname)
            .status)
    }

    /// Snapshot of every host status of an application. May be stale.
    pub async fn host_infos(&self, reference: &ApplicationReference) -> Result<HostInfos> {
        self.application(reference)?;
        self.status_store.host_infos(reference).await
    }

    pub async fn application_status(&self, reference: &ApplicationReference) -> Result<ApplicationInstanceStatus> {
        self.application(reference)?;
        self.status_store.application_instance_status(reference).await
    }

    /// Every known application currently allowed to be down
    pub async fn suspended_applications(&self) -> Result<Vec<ApplicationReference>> {
        let mut suspended = Vec::new();
        for reference in self.topology.all_known_applications() {
            if self.status_store.application_instance_status(&reference).await? == ApplicationInstanceStatus::AllowedToBeDown {
                suspended.push(reference);
            }
        }
        Ok(suspended)
    }
}

/// Attach the failing group and the parent host to an error from a batch.
/// Timeouts pass through untouched.
fn batch_error(parent_host: &HostName, group: &NodeGroup, error: Error) -> Error {
    match error.kind() {
        ErrorKind::Timeout => error,
        ErrorKind::Denied => Error::BatchDenied {
            parent_host: parent_host.clone(),
            reference: group.reference().clone(),
            hostnames: group.hostname_list(),
            source: Box::new(error),
        },
        ErrorKind::NotFound | ErrorKind::Internal => Error::BatchInternal {
            parent_host: parent_host.clone(),
            reference: group.reference().clone(),
            hostnames: group.hostname_list(),
            source: Box::new(error),
        },
    }
}
