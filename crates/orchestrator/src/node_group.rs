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
use crate::topology::{ApplicationInstance, TopologySource};
use crate::types::{ApplicationReference, HostName};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Hosts of one application that are suspended together
#[derive(Debug, Clone)]
pub struct NodeGroup {
    application: Arc<ApplicationInstance>,
    hostnames: BTreeSet<HostName>,
}

impl NodeGroup {
    pub fn new(application: Arc<ApplicationInstance>) -> Self {
        Self {
            application,
            hostnames: BTreeSet::new(),
        }
    }

    pub fn with_host(application: Arc<ApplicationInstance>, hostname: HostName) -> Self {
        let mut group = Self::new(application);
        group.add_host(hostname);
        group
    }

    pub fn add_host(&mut self, hostname: HostName) {
        self.hostnames.insert(hostname);
    }

    pub fn application(&self) -> &Arc<ApplicationInstance> {
        &self.application
    }

    pub fn reference(&self) -> &ApplicationReference {
        &self.application.reference
    }

    pub fn hostnames(&self) -> &BTreeSet<HostName> {
        &self.hostnames
    }

    pub fn contains(&self, hostname: &HostName) -> bool {
        self.hostnames.contains(hostname)
    }

    pub fn hostname_list(&self) -> Vec<HostName> {
        self.hostnames.iter().cloned().collect()
    }
}

impl fmt::Display for NodeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hosts: Vec<&str> = self.hostnames.iter().map(|h| h.as_str()).collect();
        write!(f, "NodeGroup{{application={}, hosts=[{}]}}", self.reference(), hosts.join(", "))
    }
}

/// One node group per application, in order of first appearance.
///
/// Fails before anything else happens if a hostname is unknown.
pub fn group_by_application(topology: &dyn TopologySource, hostnames: &[HostName]) -> Result<Vec<NodeGroup>> {
    let mut groups: Vec<NodeGroup> = Vec::new();
    let mut index: HashMap<ApplicationReference, usize> = HashMap::with_capacity(hostnames.len());

    for hostname in hostnames {
        let application = topology
            .application_of(hostname)
            .ok_or_else(|| Error::HostNotFound {
                hostname: hostname.clone(),
            })?;
        let slot = *index.entry(application.reference.clone()).or_insert_with(|| {
            groups.push(NodeGroup::new(application.clone()));
            groups.len() - 1
        });
        groups[slot].add_host(hostname.clone());
    }

    Ok(groups)
}

/// Groups sorted by the canonical string form of their application reference.
///
/// Every batch in the fleet takes application locks in this one global order,
/// so two batches sharing applications can never wait on each other in a
/// cycle.
pub fn order_for_suspend(mut groups: Vec<NodeGroup>) -> Vec<NodeGroup> {
    groups.sort_by(|left, right| left.reference().cmp(right.reference()));
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{ClusterKind, ServiceCluster, ServiceInstance, StaticTopology};

    fn application(tenant: &str, name: &str, hosts: &[&str]) -> ApplicationInstance {
        let instances = hosts
            .iter()
            .map(|h| ServiceInstance::new(*h, format!("{name}/container")))
            .collect();
        ApplicationInstance::new(
            ApplicationReference::new(tenant, name),
            vec![ServiceCluster::new("default", ClusterKind::Container, instances)],
        )
    }

    fn hosts(names: &[&str]) -> Vec<HostName> {
        names.iter().map(|n| HostName::new(*n)).collect()
    }

    #[test]
    fn test_group_merges_hosts_of_same_application() {
        let topology = StaticTopology::new(vec![
            application("tenant", "app-b", &["h2"]),
            application("tenant", "app-a", &["h1", "h3"]),
        ])
        .unwrap();

        let groups = group_by_application(&topology, &hosts(&["h2", "h1", "h3"])).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].reference().to_string(), "tenant:app-b");
        assert_eq!(groups[1].hostname_list(), hosts(&["h1", "h3"]));

        let ordered = order_for_suspend(groups);
        let order: Vec<String> = ordered.iter().map(|g| g.reference().to_string()).collect();
        assert_eq!(order, vec!["tenant:app-a", "tenant:app-b"]);
    }

    #[test]
    fn test_unknown_host_fails_grouping() {
        let topology = StaticTopology::new(vec![application("tenant", "app-a", &["h1"])]).unwrap();
        let err = group_by_application(&topology, &hosts(&["h1", "missing"])).unwrap_err();
        match err {
            Error::HostNotFound { hostname } => assert_eq!(hostname.as_str(), "missing"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_order_is_independent_of_input_order() {
        let topology = StaticTopology::new(vec![
            application("zeta", "x", &["h1"]),
            application("alpha", "y", &["h2"]),
            application("alpha-2", "y", &["h3"]),
        ])
        .unwrap();

        let forward = order_for_suspend(group_by_application(&topology, &hosts(&["h1", "h2", "h3"])).unwrap());
        let backward = order_for_suspend(group_by_application(&topology, &hosts(&["h3", "h2", "h1"])).unwrap());
        let names = |groups: &[NodeGroup]| groups.iter().map(|g| g.reference().to_string()).collect::<Vec<_>>();

        assert_eq!(names(&forward), names(&backward));
        // '-' sorts before ':' in the canonical form
        assert_eq!(names(&forward), vec!["alpha-2:y", "alpha:y", "zeta:x"]);
    }
}
