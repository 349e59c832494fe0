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

//! Coordinates temporary removal of hosts and applications from service.
//!
//! Callers ask the [`Orchestrator`] whether a host or a whole application may
//! go down. The decision is delegated to an [`AdmissionPolicy`] and recorded
//! in a [`StatusStore`] while holding that application's lock. Content
//! clusters are told about application-wide maintenance through a
//! [`ClusterControllerClient`].

// ============================================================================
// Core Module Declarations
// ============================================================================

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod node_group;
pub mod orchestrator;
pub mod policy;
pub mod status;
pub mod topology;
pub mod types;

// ============================================================================
// Public API Exports
// ============================================================================

pub use crate::{
    config::OrchestratorConfig,
    context::{ContextKind, ContextTimeouts, LockRegistration, OperationContext, UnlockCallback},
    controller::ClusterControllerClient,
    error::{Error, ErrorKind, Result},
    node_group::{NodeGroup, group_by_application, order_for_suspend},
    orchestrator::{Host, Orchestrator},
    policy::{AdmissionPolicy, ApplicationApi, StorageNode},
    status::{ApplicationLock, StatusSession, StatusStore, memory::InMemoryStatusStore},
    topology::{ApplicationInstance, ClusterKind, ServiceCluster, ServiceInstance, StaticTopology, TopologySource},
    types::{
        ApplicationInstanceStatus, ApplicationReference, ClusterControllerNodeState, ClusterId, HostInfo, HostInfos, HostName,
        HostStatus, SuspensionReasons,
    },
};

/// Current version of the orchestrator crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
