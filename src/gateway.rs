// Copyright 2025 Lablup Inc. and Jeongkyu Shin
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

//! Jump hosts shared by every host that tunnels through them.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;
use crate::host::Host;
use crate::transport::Tunnel;

/// A host other hosts reach the network through.
///
/// The tunnel is built on first request and shared afterwards. Concurrent
/// first requests wait on the same lock, so exactly one tunnel is built.
pub struct Gateway {
    host: Arc<Host>,
    tunnel: Mutex<Option<Arc<dyn Tunnel>>>,
}

impl Gateway {
    pub(crate) fn new(host: Arc<Host>) -> Self {
        Self {
            host,
            tunnel: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.host.name()
    }

    /// The gateway as a host, for running commands on the jump box itself.
    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    /// The shared tunnel, built on first use.
    pub async fn gateway_tunnel(&self) -> Result<Arc<dyn Tunnel>> {
        let mut slot = self.tunnel.lock().await;
        if let Some(tunnel) = slot.as_ref() {
            return Ok(Arc::clone(tunnel));
        }

        let user = self.host.user();
        info!(gateway = %self.name(), "opening tunnel as {user}");
        let tunnel = self.host.transport().open_tunnel(self.name(), &user).await?;
        *slot = Some(Arc::clone(&tunnel));
        Ok(tunnel)
    }

    /// Whether the tunnel has been built yet.
    pub async fn is_open(&self) -> bool {
        self.tunnel.lock().await.is_some()
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway").field("name", &self.name()).finish()
    }
}
