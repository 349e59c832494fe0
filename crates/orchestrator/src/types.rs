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

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Identifier of one application instance (tenant + instance id).
///
/// Ordering is the byte order of the canonical `tenant:instance` form, so
/// every process in the fleet sorts references identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationReference {
    pub tenant: Arc<str>,
    pub instance: Arc<str>,
}

impl ApplicationReference {
    pub fn new(tenant: impl Into<Arc<str>>, instance: impl Into<Arc<str>>) -> Self {
        Self {
            tenant: tenant.into(),
            instance: instance.into(),
        }
    }

    /// Canonical string form, e.g. "hosted:routing:default"
    pub fn as_string(&self) -> String {
        format!("{}:{}", self.tenant, self.instance)
    }

    fn canonical_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.tenant
            .bytes()
            .chain(std::iter::once(b':'))
            .chain(self.instance.bytes())
    }
}

impl Ord for ApplicationReference {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical_bytes().cmp(other.canonical_bytes())
    }
}

impl PartialOrd for ApplicationReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ApplicationReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tenant, self.instance)
    }
}

/// Fully qualified host name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostName(Arc<str>);

impl HostName {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HostName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Identifier of a service cluster within an application
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(Arc<str>);

impl ClusterId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Orchestration status of a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    /// Normal resting state
    #[default]
    NoRemarks,
    /// Suspended, services on the host may be down
    AllowedToBeDown,
    /// Terminal, the host is about to leave the application
    PermanentlyDown,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoRemarks => "no_remarks",
            Self::AllowedToBeDown => "allowed_to_be_down",
            Self::PermanentlyDown => "permanently_down",
        }
    }

    /// Whether the host is out of service as far as the orchestrator is concerned
    pub fn is_suspended(&self) -> bool {
        !matches!(self, Self::NoRemarks)
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestration status of a whole application instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationInstanceStatus {
    #[default]
    NoRemarks,
    AllowedToBeDown,
}

impl ApplicationInstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoRemarks => "no_remarks",
            Self::AllowedToBeDown => "allowed_to_be_down",
        }
    }
}

impl fmt::Display for ApplicationInstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node state requested from a content cluster controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterControllerNodeState {
    Up,
    Maintenance,
}

impl fmt::Display for ClusterControllerNodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Up => "up",
            Self::Maintenance => "maintenance",
        };
        f.write_str(s)
    }
}

/// Stored status of one host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostInfo {
    pub status: HostStatus,
    /// When the host left `NoRemarks`, if it is suspended
    pub suspended_since: Option<SystemTime>,
}

impl HostInfo {
    pub fn no_remarks() -> Self {
        Self::default()
    }

    /// The info after moving to `status` at `now`. `suspended_since` is kept
    /// while the host stays suspended.
    pub fn transition(self, status: HostStatus, now: SystemTime) -> Self {
        let suspended_since = match (self.status.is_suspended(), status.is_suspended()) {
            (_, false) => None,
            (true, true) => self.suspended_since.or(Some(now)),
            (false, true) => Some(now),
        };
        Self { status, suspended_since }
    }
}

/// Host statuses of one application. Hosts without an entry have `NoRemarks`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfos {
    infos: HashMap<HostName, HostInfo>,
}

impl HostInfos {
    pub fn new(infos: HashMap<HostName, HostInfo>) -> Self {
        Self { infos }
    }

    pub fn get_or_no_remarks(&self, hostname: &HostName) -> HostInfo {
        self.infos.get(hostname).copied().unwrap_or_default()
    }

    pub fn set(&mut self, hostname: HostName, info: HostInfo) {
        self.infos.insert(hostname, info);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HostName, &HostInfo)> {
        self.infos.iter()
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

/// One justification recorded by the admission policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspensionReason {
    pub hostname: HostName,
    pub reason: String,
}

/// Caveats attached to a granted suspension. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspensionReasons {
    reasons: Vec<SuspensionReason>,
}

impl SuspensionReasons {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, hostname: HostName, reason: impl Into<String>) {
        self.reasons.push(SuspensionReason {
            hostname,
            reason: reason.into(),
        });
    }

    pub fn merge(&mut self, other: SuspensionReasons) {
        self.reasons.extend(other.reasons);
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn len(&self) -> usize {
        self.reasons.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SuspensionReason> {
        self.reasons.iter()
    }

    /// Single log line, or `None` when there is nothing to say
    pub fn log_message(&self) -> Option<String> {
        if self.reasons.is_empty() {
            return None;
        }
        let parts: Vec<String> = self.reasons.iter().map(|r| format!("{}: {}", r.hostname, r.reason)).collect();
        Some(format!("Suspension granted with reasons: {}", parts.join("; ")))
    }
}
