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

use crate::context::OperationContext;
use crate::controller::ClusterControllerClient;
use crate::error::{Error, Result};
use crate::node_group::NodeGroup;
use crate::status::ApplicationLock;
use crate::topology::{ApplicationInstance, ServiceCluster};
use crate::types::{
    ApplicationInstanceStatus, ApplicationReference, ClusterControllerNodeState, ClusterId, HostInfos, HostName, HostStatus,
    SuspensionReasons,
};
use async_trait::async_trait;

/// Decides whether taking hosts of an application down is safe.
///
/// A grant is applied by the policy itself through the [`ApplicationApi`];
/// a refusal is returned as a `HostStateChangeDenied` error.
#[async_trait]
pub trait AdmissionPolicy: Send + Sync {
    /// Suspend the hosts of the application's node group, or refuse
    async fn grant_suspension_request(&self, context: &OperationContext, application: &mut ApplicationApi<'_>)
    -> Result<SuspensionReasons>;

    /// Sign off on `hostname` leaving suspension. The caller resets the host
    /// status afterwards.
    async fn release_suspension_grant(
        &self,
        context: &OperationContext,
        application: &mut ApplicationApi<'_>,
        hostname: &HostName,
    ) -> Result<()>;

    /// Allow the hosts of the node group to be removed for good. Host status
    /// is left untouched.
    async fn acquire_permission_to_remove(&self, context: &OperationContext, application: &mut ApplicationApi<'_>) -> Result<()>;
}

/// A content storage node on a host of the node group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageNode {
    pub cluster: ClusterId,
    pub hostname: HostName,
    pub index: u32,
}

/// View of one locked application, scoped to a node group.
///
/// Host statuses are read once when the view is created and kept in step with
/// the writes made through it.
pub struct ApplicationApi<'a> {
    node_group: &'a NodeGroup,
    lock: &'a ApplicationLock,
    controller: &'a dyn ClusterControllerClient,
    host_infos: HostInfos,
}

impl<'a> ApplicationApi<'a> {
    pub async fn new(
        node_group: &'a NodeGroup,
        lock: &'a ApplicationLock,
        controller: &'a dyn ClusterControllerClient,
    ) -> Result<ApplicationApi<'a>> {
        let host_infos = lock.host_infos().await?;
        Ok(Self {
            node_group,
            lock,
            controller,
            host_infos,
        })
    }

    pub fn reference(&self) -> &'a ApplicationReference {
        self.node_group.reference()
    }

    pub fn application(&self) -> &'a ApplicationInstance {
        self.node_group.application()
    }

    pub fn node_group(&self) -> &'a NodeGroup {
        self.node_group
    }

    pub fn clusters(&self) -> &'a [ServiceCluster] {
        &self.node_group.application().clusters
    }

    pub fn host_infos(&self) -> &HostInfos {
        &self.host_infos
    }

    pub fn host_status(&self, hostname: &HostName) -> HostStatus {
        self.host_infos.get_or_no_remarks(hostname).status
    }

    pub fn hosts_in_group_with_status(&self, status: HostStatus) -> Vec<HostName> {
        self.node_group
            .hostnames()
            .iter()
            .filter(|h| self.host_status(h) == status)
            .cloned()
            .collect()
    }

    /// Storage nodes running on the group's hosts, in cluster order
    pub fn storage_nodes_in_group(&self) -> Vec<StorageNode> {
        self.storage_nodes_matching(|h| self.node_group.contains(h))
    }

    pub fn storage_nodes_on(&self, hostname: &HostName) -> Vec<StorageNode> {
        self.storage_nodes_matching(|h| h == hostname)
    }

    fn storage_nodes_matching(&self, include: impl Fn(&HostName) -> bool) -> Vec<StorageNode> {
        self.application()
            .content_clusters()
            .flat_map(|cluster| {
                cluster.instances.iter().filter_map(|instance| match instance.storage_node_index {
                    Some(index) if include(&instance.hostname) => Some(StorageNode {
                        cluster: cluster.id.clone(),
                        hostname: instance.hostname.clone(),
                        index,
                    }),
                    _ => None,
                })
            })
            .collect()
    }

    pub async fn application_status(&self) -> Result<ApplicationInstanceStatus> {
        self.lock.application_instance_status().await
    }

    /// Record a host status. A no-op on the store under a probe context.
    pub async fn set_host_state(&mut self, hostname: &HostName, status: HostStatus) -> Result<()> {
        self.lock.set_host_state(hostname, status).await?;
        let info = self
            .host_infos
            .get_or_no_remarks(hostname)
            .transition(status, std::time::SystemTime::now());
        self.host_infos.set(hostname.clone(), info);
        Ok(())
    }

    /// Ask the cluster controller to move a storage node. A refusal becomes a
    /// denial naming the node's host.
    pub async fn set_storage_node_state(
        &self,
        context: &OperationContext,
        node: &StorageNode,
        state: ClusterControllerNodeState,
    ) -> Result<()> {
        let accepted = self
            .controller
            .try_set_node_state(context, &node.cluster, &node.hostname, node.index, state, context.is_probe())
            .await?;
        if !accepted {
            return Err(Error::denied(
                node.hostname.clone(),
                "cluster-controller",
                format!(
                    "controller of cluster {} refused to set storage node {} to {}",
                    node.cluster, node.index, state
                ),
            ));
        }
        Ok(())
    }
}
