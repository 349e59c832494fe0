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

//! Fakes shared by the orchestrator integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rustfs_orchestrator::{
    AdmissionPolicy, ApplicationApi, ApplicationInstance, ApplicationInstanceStatus, ApplicationLock, ApplicationReference,
    ClusterControllerClient, ClusterControllerNodeState, ClusterKind, Error, HostInfos, HostName, HostStatus, OperationContext,
    Orchestrator, OrchestratorConfig, Result, ServiceCluster, ServiceInstance, StaticTopology, StatusSession,
    StatusStore, SuspensionReasons, UnlockCallback,
};
use rustfs_orchestrator::{ClusterId, InMemoryStatusStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Once;
use std::time::{Duration, SystemTime};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

pub fn host(name: &str) -> HostName {
    HostName::new(name)
}

pub fn hosts(names: &[&str]) -> Vec<HostName> {
    names.iter().map(|n| HostName::new(*n)).collect()
}

/// Application with one content cluster holding a storage node on every host
pub fn content_application(tenant: &str, name: &str, hostnames: &[&str]) -> ApplicationInstance {
    let instances = hostnames
        .iter()
        .enumerate()
        .map(|(i, h)| ServiceInstance::storage_node(*h, format!("{name}/storage/{i}"), i as u32))
        .collect();
    ApplicationInstance::new(
        ApplicationReference::new(tenant, name),
        vec![ServiceCluster::new(format!("{name}-content"), ClusterKind::Content, instances)],
    )
}

pub fn topology(applications: Vec<ApplicationInstance>) -> Arc<StaticTopology> {
    Arc::new(StaticTopology::new(applications).expect("valid topology"))
}

/// Built-in budgets with no resume grace period
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig::builtin().with_resume_grace_period(Duration::ZERO)
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<dyn StatusStore>,
    pub controller: Arc<FakeClusterController>,
}

pub fn harness(applications: Vec<ApplicationInstance>, min_up: usize) -> Harness {
    harness_with(applications, min_up, test_config(), Arc::new(InMemoryStatusStore::new()))
}

pub fn harness_with(
    applications: Vec<ApplicationInstance>,
    min_up: usize,
    config: OrchestratorConfig,
    store: Arc<dyn StatusStore>,
) -> Harness {
    init_tracing();
    let controller = Arc::new(FakeClusterController::default());
    let orchestrator = Arc::new(Orchestrator::with_config(
        config,
        store.clone(),
        topology(applications),
        Arc::new(RedundancyPolicy::new(min_up)),
        controller.clone(),
    ));
    Harness {
        orchestrator,
        store,
        controller,
    }
}

/// Requires at least `min_up` hosts with no remarks in every cluster
pub struct RedundancyPolicy {
    min_up: usize,
}

impl RedundancyPolicy {
    pub fn new(min_up: usize) -> Self {
        Self { min_up }
    }

    /// Hosts left up per cluster if the group goes down, or a denial
    fn check(&self, application: &ApplicationApi<'_>) -> Result<SuspensionReasons> {
        let mut reasons = SuspensionReasons::new();
        let group = application.node_group();

        for cluster in application.clusters() {
            let cluster_hosts = cluster.hostnames();
            let going_down: Vec<&HostName> = cluster_hosts
                .iter()
                .filter(|h| group.contains(h) && application.host_status(h) == HostStatus::NoRemarks)
                .collect();
            let Some(first) = going_down.first() else {
                continue;
            };

            let up = cluster_hosts
                .iter()
                .filter(|h| application.host_status(h) == HostStatus::NoRemarks)
                .count();
            let remaining = up - going_down.len();
            if remaining < self.min_up {
                return Err(Error::denied(
                    (*first).clone(),
                    "redundancy",
                    format!(
                        "only {remaining} of {} hosts in cluster {} would be up, {} required",
                        cluster_hosts.len(),
                        cluster.id,
                        self.min_up
                    ),
                ));
            }
            for hostname in going_down {
                reasons.add(
                    hostname.clone(),
                    format!("{remaining} of {} hosts in cluster {} remain up", cluster_hosts.len(), cluster.id),
                );
            }
        }
        Ok(reasons)
    }
}

#[async_trait]
impl AdmissionPolicy for RedundancyPolicy {
    async fn grant_suspension_request(
        &self,
        context: &OperationContext,
        application: &mut ApplicationApi<'_>,
    ) -> Result<SuspensionReasons> {
        let reasons = self.check(application)?;

        for node in application.storage_nodes_in_group() {
            if application.host_status(&node.hostname) == HostStatus::NoRemarks {
                application
                    .set_storage_node_state(context, &node, ClusterControllerNodeState::Maintenance)
                    .await?;
            }
        }
        for hostname in application.hosts_in_group_with_status(HostStatus::NoRemarks) {
            application.set_host_state(&hostname, HostStatus::AllowedToBeDown).await?;
        }
        Ok(reasons)
    }

    async fn release_suspension_grant(
        &self,
        context: &OperationContext,
        application: &mut ApplicationApi<'_>,
        hostname: &HostName,
    ) -> Result<()> {
        for node in application.storage_nodes_on(hostname) {
            application
                .set_storage_node_state(context, &node, ClusterControllerNodeState::Up)
                .await?;
        }
        Ok(())
    }

    async fn acquire_permission_to_remove(&self, _context: &OperationContext, application: &mut ApplicationApi<'_>) -> Result<()> {
        self.check(application).map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCall {
    ApplicationState {
        reference: ApplicationReference,
        cluster: ClusterId,
        state: ClusterControllerNodeState,
    },
    NodeState {
        hostname: HostName,
        index: u32,
        state: ClusterControllerNodeState,
        probe: bool,
    },
}

/// Records every call; refuses or fails nodes on listed hosts and can fail
/// application-wide requests
#[derive(Default)]
pub struct FakeClusterController {
    calls: Mutex<Vec<ControllerCall>>,
    refused_hosts: Mutex<HashSet<HostName>>,
    refused_commits: Mutex<HashSet<HostName>>,
    failed_commits: Mutex<HashSet<HostName>>,
    fail_application_state: Mutex<bool>,
}

impl FakeClusterController {
    pub fn refuse(&self, hostname: &HostName) {
        self.refused_hosts.lock().insert(hostname.clone());
    }

    /// Accept evaluation requests for the host but refuse real ones
    pub fn refuse_commit(&self, hostname: &HostName) {
        self.refused_commits.lock().insert(hostname.clone());
    }

    /// Accept evaluation requests for the host but fail real ones
    pub fn fail_commit(&self, hostname: &HostName) {
        self.failed_commits.lock().insert(hostname.clone());
    }

    pub fn fail_application_state(&self) {
        *self.fail_application_state.lock() = true;
    }

    pub fn calls(&self) -> Vec<ControllerCall> {
        self.calls.lock().clone()
    }

    pub fn node_calls(&self, probe: bool) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, ControllerCall::NodeState { probe: p, .. } if *p == probe))
            .count()
    }
}

#[async_trait]
impl ClusterControllerClient for FakeClusterController {
    async fn set_application_state(
        &self,
        context: &OperationContext,
        application: &ApplicationReference,
        cluster: &ClusterId,
        state: ClusterControllerNodeState,
    ) -> Result<()> {
        context.time_remaining()?;
        self.calls.lock().push(ControllerCall::ApplicationState {
            reference: application.clone(),
            cluster: cluster.clone(),
            state,
        });
        if *self.fail_application_state.lock() {
            return Err(Error::internal(format!("controller of cluster {cluster} is unreachable")));
        }
        Ok(())
    }

    async fn try_set_node_state(
        &self,
        context: &OperationContext,
        _cluster: &ClusterId,
        hostname: &HostName,
        node_index: u32,
        state: ClusterControllerNodeState,
        probe: bool,
    ) -> Result<bool> {
        context.time_remaining()?;
        self.calls.lock().push(ControllerCall::NodeState {
            hostname: hostname.clone(),
            index: node_index,
            state,
            probe,
        });
        if !probe && self.failed_commits.lock().contains(hostname) {
            return Err(Error::internal(format!("controller lost the request for {hostname}")));
        }
        if !probe && self.refused_commits.lock().contains(hostname) {
            return Ok(false);
        }
        Ok(!self.refused_hosts.lock().contains(hostname))
    }
}

#[derive(Default)]
struct SpyRecords {
    applications: HashMap<ApplicationReference, ApplicationInstanceStatus>,
    hosts: HashMap<ApplicationReference, HostInfos>,
}

/// Status store that records every host status write
#[derive(Default)]
pub struct SpyStatusStore {
    records: Arc<Mutex<SpyRecords>>,
    locks: Mutex<HashMap<ApplicationReference, Arc<tokio::sync::Mutex<()>>>>,
    host_writes: Arc<Mutex<Vec<(HostName, HostStatus)>>>,
}

impl SpyStatusStore {
    pub fn host_writes(&self) -> Vec<(HostName, HostStatus)> {
        self.host_writes.lock().clone()
    }

    fn session(&self, reference: &ApplicationReference) -> Box<dyn StatusSession> {
        Box::new(SpySession {
            reference: reference.clone(),
            records: self.records.clone(),
            host_writes: self.host_writes.clone(),
        })
    }
}

#[async_trait]
impl StatusStore for SpyStatusStore {
    async fn lock_application(&self, context: &OperationContext, reference: &ApplicationReference) -> Result<ApplicationLock> {
        if context.has_lock(reference) {
            return Ok(ApplicationLock::reentrant(context, reference.clone(), self.session(reference)));
        }
        let mutex = self.locks.lock().entry(reference.clone()).or_default().clone();
        let guard = tokio::time::timeout(context.time_remaining()?, mutex.lock_owned())
            .await
            .map_err(|_| Error::timeout("application lock", format!("lock of {reference} not acquired")))?;
        let unlock: UnlockCallback = Box::new(move || {
            drop(guard);
            Ok(())
        });
        ApplicationLock::acquired(context, reference.clone(), self.session(reference), unlock)
    }

    async fn host_infos(&self, reference: &ApplicationReference) -> Result<HostInfos> {
        Ok(self.records.lock().hosts.get(reference).cloned().unwrap_or_default())
    }

    async fn application_instance_status(&self, reference: &ApplicationReference) -> Result<ApplicationInstanceStatus> {
        Ok(self.records.lock().applications.get(reference).copied().unwrap_or_default())
    }
}

struct SpySession {
    reference: ApplicationReference,
    records: Arc<Mutex<SpyRecords>>,
    host_writes: Arc<Mutex<Vec<(HostName, HostStatus)>>>,
}

#[async_trait]
impl StatusSession for SpySession {
    async fn host_infos(&self) -> Result<HostInfos> {
        Ok(self.records.lock().hosts.get(&self.reference).cloned().unwrap_or_default())
    }

    async fn set_host_status(&self, hostname: &HostName, status: HostStatus) -> Result<()> {
        self.host_writes.lock().push((hostname.clone(), status));
        let mut records = self.records.lock();
        let infos = records.hosts.entry(self.reference.clone()).or_default();
        let info = infos.get_or_no_remarks(hostname).transition(status, SystemTime::now());
        infos.set(hostname.clone(), info);
        Ok(())
    }

    async fn application_instance_status(&self) -> Result<ApplicationInstanceStatus> {
        Ok(self
            .records
            .lock()
            .applications
            .get(&self.reference)
            .copied()
            .unwrap_or_default())
    }

    async fn set_application_instance_status(&self, status: ApplicationInstanceStatus) -> Result<()> {
        self.records.lock().applications.insert(self.reference.clone(), status);
        Ok(())
    }
}
