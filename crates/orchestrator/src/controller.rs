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
use crate::error::Result;
use crate::types::{ApplicationReference, ClusterControllerNodeState, ClusterId, HostName};
use async_trait::async_trait;

/// Client of the controllers that own replica placement for content clusters.
///
/// Implementations bound every RPC by `context.time_remaining()` and report an
/// exceeded deadline as a `Timeout` error.
#[async_trait]
pub trait ClusterControllerClient: Send + Sync {
    /// Set the wanted state of every node of a content cluster
    async fn set_application_state(
        &self,
        context: &OperationContext,
        application: &ApplicationReference,
        cluster: &ClusterId,
        state: ClusterControllerNodeState,
    ) -> Result<()>;

    /// Ask to move one storage node to `state`. Returns whether the controller
    /// accepted. With `probe` set the controller only evaluates the request.
    async fn try_set_node_state(
        &self,
        context: &OperationContext,
        cluster: &ClusterId,
        hostname: &HostName,
        node_index: u32,
        state: ClusterControllerNodeState,
        probe: bool,
    ) -> Result<bool>;
}
