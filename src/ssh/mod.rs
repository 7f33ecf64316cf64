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

//! SSH transport built on `russh`.
//!
//! [`SshTransport`] implements the fleet [`Transport`](crate::transport::Transport)
//! seam: direct connections, gateway tunnels over `direct-tcpip` channels,
//! command channels and SFTP file transfer.

pub mod auth;
mod client;
mod error;
pub mod known_hosts;
mod transport;

pub use auth::{AuthContext, AuthMethod};
pub use client::SshClient;
pub use error::SshError;
pub use known_hosts::StrictHostKeyChecking;
pub use transport::{SshOptions, SshTransport};
