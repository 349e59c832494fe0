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

use crate::error::{Error, Result};
use crate::types::{ApplicationReference, ClusterId, HostName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Role of a service cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterKind {
    /// Stores replicated data; managed by a cluster controller
    Content,
    /// Stateless serving
    Container,
    Other,
}

/// One service running on one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub hostname: HostName,
    pub config_id: String,
    /// Distribution index of a content storage node
    pub storage_node_index: Option<u32>,
}

impl ServiceInstance {
    pub fn new(hostname: impl Into<HostName>, config_id: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            config_id: config_id.into(),
            storage_node_index: None,
        }
    }

    pub fn storage_node(hostname: impl Into<HostName>, config_id: impl Into<String>, index: u32) -> Self {
        Self {
            storage_node_index: Some(index),
            ..Self::new(hostname, config_id)
        }
    }
}

/// A set of service instances forming one cluster of an application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCluster {
    pub id: ClusterId,
    pub kind: ClusterKind,
    pub instances: Vec<ServiceInstance>,
}

impl ServiceCluster {
    pub fn new(id: impl Into<Arc<str>>, kind: ClusterKind, instances: Vec<ServiceInstance>) -> Self {
        Self {
            id: ClusterId::new(id),
            kind,
            instances,
        }
    }

    pub fn is_content(&self) -> bool {
        self.kind == ClusterKind::Content
    }

    pub fn hostnames(&self) -> BTreeSet<HostName> {
        self.instances.iter().map(|i| i.hostname.clone()).collect()
    }
}

/// One deployed application instance and its service clusters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInstance {
    pub reference: ApplicationReference,
    pub clusters: Vec<ServiceCluster>,
}

impl ApplicationInstance {
    pub fn new(reference: ApplicationReference, clusters: Vec<ServiceCluster>) -> Self {
        Self { reference, clusters }
    }

    /// Every host used by any cluster of the application
    pub fn hostnames(&self) -> BTreeSet<HostName> {
        self.clusters.iter().flat_map(|c| c.instances.iter().map(|i| i.hostname.clone())).collect()
    }

    pub fn content_clusters(&self) -> impl Iterator<Item = &ServiceCluster> {
        self.clusters.iter().filter(|c| c.is_content())
    }

    pub fn service_instances_on(&self, hostname: &HostName) -> Vec<ServiceInstance> {
        self.clusters
            .iter()
            .flat_map(|c| c.instances.iter())
            .filter(|i| &i.hostname == hostname)
            .cloned()
            .collect()
    }
}

/// Source of the host → application mapping.
///
/// Implementations serve from a snapshot; lookups never block.
pub trait TopologySource: Send + Sync {
    /// Application the host currently belongs to
    fn application_of(&self, hostname: &HostName) -> Option<Arc<ApplicationInstance>>;

    fn application(&self, reference: &ApplicationReference) -> Option<Arc<ApplicationInstance>>;

    fn all_known_applications(&self) -> BTreeSet<ApplicationReference>;
}

/// Fixed in-memory topology
#[derive(Debug, Default)]
pub struct StaticTopology {
    applications: HashMap<ApplicationReference, Arc<ApplicationInstance>>,
    hosts: HashMap<HostName, ApplicationReference>,
}

impl StaticTopology {
    /// Build the topology. A host may belong to at most one application.
    pub fn new(applications: impl IntoIterator<Item = ApplicationInstance>) -> Result<Self> {
        let mut topology = Self::default();
        for application in applications {
            let reference = application.reference.clone();
            if topology.applications.contains_key(&reference) {
                return Err(Error::invariant_violation(format!("application {reference} listed twice")));
            }
            for hostname in application.hostnames() {
                if let Some(owner) = topology.hosts.get(&hostname) {
                    return Err(Error::invariant_violation(format!(
                        "host {hostname} belongs to both {owner} and {reference}"
                    )));
                }
                topology.hosts.insert(hostname, reference.clone());
            }
            topology.applications.insert(reference, Arc::new(application));
        }
        Ok(topology)
    }
}

impl TopologySource for StaticTopology {
    fn application_of(&self, hostname: &HostName) -> Option<Arc<ApplicationInstance>> {
        self.hosts.get(hostname).and_then(|r| self.applications.get(r)).cloned()
    }

    fn application(&self, reference: &ApplicationReference) -> Option<Arc<ApplicationInstance>> {
        self.applications.get(reference).cloned()
    }

    fn all_known_applications(&self) -> BTreeSet<ApplicationReference> {
        self.applications.keys().cloned().collect()
    }
}
