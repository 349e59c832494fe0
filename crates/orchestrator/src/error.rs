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

use crate::types::{ApplicationReference, HostName};
use thiserror::Error;

/// Reason class of a failed orchestration request.
///
/// Callers retry `Timeout`, must not retry `Denied`, and should alert on
/// `Internal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Denied,
    Internal,
    Timeout,
}

/// Orchestration error types
#[derive(Error, Debug)]
pub enum Error {
    /// Hostname unknown to the topology source
    #[error("Host '{hostname}' not found")]
    HostNotFound { hostname: HostName },

    /// Application reference unknown to the topology source
    #[error("Application '{reference}' not found")]
    ApplicationNotFound { reference: ApplicationReference },

    /// A hostname of a batch request could not be resolved
    #[error("Failed to resolve hosts {hostnames:?} of parent host '{parent_host}': {source}")]
    BatchHostNotFound {
        parent_host: HostName,
        hostnames: Vec<HostName>,
        #[source]
        source: Box<Error>,
    },

    /// The admission policy refused to change the state of a host
    #[error("Changing the state of host '{hostname}' would violate {constraint}: {message}")]
    HostStateChangeDenied {
        hostname: HostName,
        constraint: String,
        message: String,
    },

    /// The state of a whole application could not be changed
    #[error("Changing the state of application '{reference}' was denied: {message}")]
    ApplicationStateChangeDenied { reference: ApplicationReference, message: String },

    /// A denial in the middle of a batch suspension
    #[error("Failed to suspend {hostnames:?} of application '{reference}' with parent host '{parent_host}': {source}")]
    BatchDenied {
        parent_host: HostName,
        reference: ApplicationReference,
        hostnames: Vec<HostName>,
        #[source]
        source: Box<Error>,
    },

    /// An unexpected failure in the middle of a batch suspension
    #[error(
        "Failed to suspend {hostnames:?} of application '{reference}' with parent host '{parent_host}' due to an internal error: {source}"
    )]
    BatchInternal {
        parent_host: HostName,
        reference: ApplicationReference,
        hostnames: Vec<HostName>,
        #[source]
        source: Box<Error>,
    },

    /// Deadline exceeded while waiting for a lock or a collaborator
    #[error("Timed out during {operation}: {message}")]
    Timeout { operation: String, message: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// A broken assumption about the fleet or the context tree
    #[error("Invariant violation: {message}")]
    InvariantViolation { message: String },
}

impl Error {
    /// Create timeout error
    pub fn timeout(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Create a host state change denial
    pub fn denied(hostname: HostName, constraint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HostStateChangeDenied {
            hostname,
            constraint: constraint.into(),
            message: message.into(),
        }
    }

    pub fn invariant_violation(message: impl Into<String>) -> Self {
        Self::InvariantViolation { message: message.into() }
    }

    /// Reason class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::HostNotFound { .. } | Self::ApplicationNotFound { .. } | Self::BatchHostNotFound { .. } => ErrorKind::NotFound,
            Self::HostStateChangeDenied { .. } | Self::ApplicationStateChangeDenied { .. } | Self::BatchDenied { .. } => {
                ErrorKind::Denied
            }
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::BatchInternal { .. } | Self::Internal { .. } | Self::InvariantViolation { .. } => ErrorKind::Internal,
        }
    }

    /// Only timeouts are worth retrying; a denial stays a denial.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    pub fn is_denied(&self) -> bool {
        self.kind() == ErrorKind::Denied
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

/// Orchestration Result type
pub type Result<T, E = Error> = std::result::Result<T, E>;
