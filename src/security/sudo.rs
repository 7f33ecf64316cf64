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

//! Sudo password handling with automatic memory clearing.
//!
//! Passwords are fed to `sudo -S` on standard input and never appear on a
//! command line or in logs.

use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use zeroize::Zeroizing;

/// Environment variable the CLI reads a sudo password from.
pub const SUDO_PASSWORD_ENV: &str = "BFLEET_SUDO_PASSWORD";

/// Patterns indicating sudo authentication failure
pub const SUDO_FAILURE_PATTERNS: &[&str] = &[
    "sorry, try again",
    "incorrect password",
    "authentication failure",
    "sudo: 3 incorrect password attempts",
    "sudo: no password was provided",
    "a password is required",
];

/// A sudo password that is zeroized when dropped.
///
/// Debug output does not reveal the password. Each clone is cleared
/// independently.
#[derive(Clone)]
pub struct SudoPassword {
    inner: SecretString,
}

impl SudoPassword {
    /// Wrap a password. Empty passwords are rejected.
    pub fn new(password: String) -> Result<Self> {
        if password.is_empty() {
            anyhow::bail!("Password cannot be empty");
        }
        Ok(Self {
            inner: SecretString::new(password.into_boxed_str()),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.inner.expose_secret().as_bytes()
    }

    /// The password followed by the newline sudo waits for.
    pub fn with_newline(&self) -> Zeroizing<Vec<u8>> {
        let mut bytes = self.inner.expose_secret().as_bytes().to_vec();
        bytes.push(b'\n');
        Zeroizing::new(bytes)
    }
}

impl fmt::Debug for SudoPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SudoPassword")
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Check if command output reports a failed sudo authentication.
pub fn contains_sudo_failure(output: &str) -> bool {
    let lower = output.to_lowercase();
    SUDO_FAILURE_PATTERNS
        .iter()
        .any(|pattern| lower.contains(*pattern))
}

/// Sudo password from `BFLEET_SUDO_PASSWORD`, if set.
///
/// Environment variables can leak through process listings; prefer
/// setting passwords in a protected fleet file.
pub fn sudo_password_from_env() -> Result<Option<SudoPassword>> {
    match std::env::var(SUDO_PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => Ok(Some(SudoPassword::new(password)?)),
        Ok(_) => {
            anyhow::bail!("{SUDO_PASSWORD_ENV} is set but empty. Empty passwords are not allowed.")
        }
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_sudo_password_empty_rejection() {
        let result = SudoPassword::new(String::new());
        assert!(result.unwrap_err().to_string().contains("cannot be empty"));
    }

    #[test]
    fn test_sudo_password_with_newline() {
        let password = SudoPassword::new("test123".to_string()).unwrap();
        assert_eq!(password.as_bytes(), b"test123");
        assert_eq!(&*password.with_newline(), b"test123\n");
    }

    #[test]
    fn test_sudo_password_debug_redaction() {
        let password = SudoPassword::new("secret".to_string()).unwrap();
        let debug_output = format!("{:?}", password);
        assert!(!debug_output.contains("secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_contains_sudo_failure() {
        assert!(contains_sudo_failure("Sorry, try again."));
        assert!(contains_sudo_failure("sudo: 3 incorrect password attempts"));
        assert!(contains_sudo_failure("sudo: a password is required"));
        assert!(!contains_sudo_failure("Command executed successfully"));
    }

    #[test]
    #[serial]
    fn test_password_from_env() {
        std::env::remove_var(SUDO_PASSWORD_ENV);
        assert!(sudo_password_from_env().unwrap().is_none());

        std::env::set_var(SUDO_PASSWORD_ENV, "");
        assert!(sudo_password_from_env().is_err());

        std::env::set_var(SUDO_PASSWORD_ENV, "hunter2");
        let password = sudo_password_from_env().unwrap().unwrap();
        std::env::remove_var(SUDO_PASSWORD_ENV);
        assert_eq!(password.as_bytes(), b"hunter2");
    }
}
