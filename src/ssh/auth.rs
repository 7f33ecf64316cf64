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

//! SSH authentication method selection and the authentication exchange.

use russh::client::{Handle, Handler};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::Zeroizing;

use super::error::SshError;

/// How to prove identity to a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Password(Zeroizing<String>),
    PrivateKeyFile {
        key_file_path: PathBuf,
        key_pass: Option<Zeroizing<String>>,
    },
    Agent,
}

impl AuthMethod {
    pub fn with_password(password: &str) -> Self {
        Self::Password(Zeroizing::new(password.to_string()))
    }

    pub fn with_key_file<T: AsRef<Path>>(key_file_path: T, passphrase: Option<&str>) -> Self {
        Self::PrivateKeyFile {
            key_file_path: key_file_path.as_ref().to_path_buf(),
            key_pass: passphrase.map(|p| Zeroizing::new(p.to_string())),
        }
    }
}

/// Inputs for picking an [`AuthMethod`].
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub key_path: Option<PathBuf>,
    pub key_passphrase: Option<Zeroizing<String>>,
    pub use_agent: bool,
    pub password: Option<Zeroizing<String>>,
}

impl AuthContext {
    /// Pick the authentication method.
    ///
    /// Priority:
    /// 1. Password, if one is configured
    /// 2. SSH agent, if requested and `SSH_AUTH_SOCK` is set
    /// 3. The configured key file
    /// 4. Default key locations (`~/.ssh/id_ed25519`, `~/.ssh/id_rsa`, ...)
    pub fn determine_method(&self) -> Result<AuthMethod, SshError> {
        if let Some(password) = &self.password {
            return Ok(AuthMethod::Password(password.clone()));
        }

        if self.use_agent && std::env::var("SSH_AUTH_SOCK").is_ok() {
            tracing::debug!("Using SSH agent for authentication");
            return Ok(AuthMethod::Agent);
        }

        if let Some(key_path) = &self.key_path {
            tracing::debug!("Authenticating with key: {:?}", key_path);
            return Ok(self.key_file(key_path));
        }

        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let ssh_dir = Path::new(&home).join(".ssh");
        for name in ["id_ed25519", "id_rsa", "id_ecdsa"] {
            let default_key = ssh_dir.join(name);
            if default_key.exists() {
                tracing::debug!("Using default key: {:?}", default_key);
                return Ok(self.key_file(&default_key));
            }
        }

        Err(SshError::NoAuthMethod(format!(
            "no password, no key file and no default key in {}; SSH agent {}",
            ssh_dir.display(),
            if self.use_agent {
                "requested but SSH_AUTH_SOCK is not set"
            } else {
                "not enabled"
            }
        )))
    }

    fn key_file(&self, path: &Path) -> AuthMethod {
        AuthMethod::with_key_file(path, self.key_passphrase.as_ref().map(|p| p.as_str()))
    }
}

/// Run the authentication exchange on a fresh handle.
pub(super) async fn authenticate<H: Handler>(
    handle: &mut Handle<H>,
    username: &str,
    auth: AuthMethod,
) -> Result<(), SshError> {
    match auth {
        AuthMethod::Password(password) => {
            let result = handle.authenticate_password(username, &**password).await?;
            if !result.success() {
                return Err(SshError::AuthFailed {
                    user: username.to_string(),
                });
            }
        }
        AuthMethod::PrivateKeyFile {
            key_file_path,
            key_pass,
        } => {
            let key = russh::keys::load_secret_key(key_file_path, key_pass.as_ref().map(|p| &***p))?;
            let result = handle
                .authenticate_publickey(
                    username,
                    russh::keys::PrivateKeyWithHashAlg::new(
                        Arc::new(key),
                        handle.best_supported_rsa_hash().await?.flatten(),
                    ),
                )
                .await?;
            if !result.success() {
                return Err(SshError::AuthFailed {
                    user: username.to_string(),
                });
            }
        }
        AuthMethod::Agent => {
            let mut agent = russh::keys::agent::client::AgentClient::connect_env()
                .await
                .map_err(|_| SshError::AgentConnectionFailed)?;
            let identities = agent
                .request_identities()
                .await
                .map_err(|_| SshError::AgentConnectionFailed)?;
            if identities.is_empty() {
                return Err(SshError::AgentNoIdentities);
            }

            let mut authenticated = false;
            for identity in identities {
                let result = handle
                    .authenticate_publickey_with(
                        username,
                        identity,
                        handle.best_supported_rsa_hash().await?.flatten(),
                        &mut agent,
                    )
                    .await;
                if matches!(result, Ok(ref r) if r.success()) {
                    authenticated = true;
                    break;
                }
            }
            if !authenticated {
                return Err(SshError::AuthFailed {
                    user: username.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_wins() {
        let ctx = AuthContext {
            password: Some(Zeroizing::new("pw".to_string())),
            key_path: Some(PathBuf::from("/nonexistent")),
            ..Default::default()
        };
        assert_eq!(ctx.determine_method().unwrap(), AuthMethod::with_password("pw"));
    }

    #[test]
    fn test_explicit_key_file() {
        let ctx = AuthContext {
            key_path: Some(PathBuf::from("/keys/deploy")),
            ..Default::default()
        };
        assert_eq!(
            ctx.determine_method().unwrap(),
            AuthMethod::with_key_file("/keys/deploy", None)
        );
    }
}
