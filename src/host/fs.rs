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

//! Remote filesystem helpers built on top of [`Host::exec`].

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::PoisonError;
use tracing::debug;
use uuid::Uuid;

use super::{ExecOptions, Host};
use crate::error::{FleetError, Result};
use crate::utils::shell::{absolute_path, basename, chomp, dirname, escape};

static TILDE: Lazy<Regex> = Lazy::new(|| Regex::new(r"~(\w+)?").expect("valid tilde pattern"));

/// Kind of a remote filesystem entry as reported by `stat -c %F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    CharDevice,
    BlockDevice,
    Symlink,
    Socket,
    Fifo,
}

impl FileType {
    /// Map `stat` output to a file type.
    pub fn parse(output: &str) -> Option<Self> {
        let kind = output.trim().to_lowercase();
        match kind.as_str() {
            "regular file" | "regular empty file" => return Some(Self::File),
            "directory" => return Some(Self::Directory),
            "character special file" => return Some(Self::CharDevice),
            "block special file" => return Some(Self::BlockDevice),
            _ => {}
        }
        if kind.contains("link") {
            Some(Self::Symlink)
        } else if kind.contains("socket") {
            Some(Self::Socket)
        } else if kind.contains("fifo") || kind.contains("pipe") {
            Some(Self::Fifo)
        } else {
            None
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::CharDevice => "char-device",
            Self::BlockDevice => "block-device",
            Self::Symlink => "symlink",
            Self::Socket => "socket",
            Self::Fifo => "fifo",
        };
        f.write_str(s)
    }
}

fn is_not_found(output: &str) -> bool {
    output.to_lowercase().contains("no such file or directory")
}

#[cfg(unix)]
fn local_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn local_mode(_meta: &std::fs::Metadata) -> u32 {
    0o644
}

#[cfg(unix)]
async fn set_local_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_local_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

impl Host {
    /// Current remote directory. The first call asks the remote shell.
    pub async fn cwd(&self) -> Result<String> {
        if let Some(cwd) = self.state().cwd.clone() {
            return Ok(cwd);
        }
        let cwd = self.exec("pwd", ExecOptions::new()).await?;
        self.state().cwd = Some(cwd.clone());
        Ok(cwd)
    }

    /// Change the remote directory; `None` goes to the home directory.
    pub async fn cd(&self, dir: Option<&str>) -> Result<String> {
        let target = match dir {
            Some(dir) => dir.to_string(),
            None => self.homedir(None).await?,
        };
        let path = self.expand_path(&target).await?;
        if !self.is_dir(&path).await? {
            return Err(FleetError::FileNotFound {
                host: self.name.clone(),
                path,
            });
        }
        self.state().cwd = Some(path.clone());
        Ok(path)
    }

    /// Home directory of `user`, defaulting to the effective remote user.
    pub async fn homedir(&self, user: Option<&str>) -> Result<String> {
        let user = match user {
            Some(user) => user.to_string(),
            None => self.sudo_target().unwrap_or_else(|| self.user()),
        };
        let cached = self
            .homedirs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user)
            .cloned();
        if let Some(home) = cached {
            return Ok(home);
        }

        let command = format!(
            "awk -F: -v u={} '$1 == u {{ print $6 }}' /etc/passwd",
            escape(&user)
        );
        let home = self.exec(&command, ExecOptions::new()).await?;
        let home = home.lines().next().unwrap_or_default().trim().to_string();
        if home.is_empty() {
            return Err(FleetError::FileNotFound {
                host: self.name.clone(),
                path: format!("~{user}"),
            });
        }
        self.homedirs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user, home.clone());
        Ok(home)
    }

    /// Replace `~` and `~user` with home directories and make the result
    /// absolute against the current directory.
    pub async fn expand_path(&self, path: &str) -> Result<String> {
        let mut expanded = String::with_capacity(path.len());
        let mut last = 0;
        let tokens: Vec<(usize, usize, Option<String>)> = TILDE
            .captures_iter(path)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let user = caps.get(1).map(|m| m.as_str().to_string());
                Some((whole.start(), whole.end(), user))
            })
            .collect();
        for (start, end, user) in tokens {
            let home = self.homedir(user.as_deref()).await?;
            expanded.push_str(&path[last..start]);
            expanded.push_str(&home);
            last = end;
        }
        expanded.push_str(&path[last..]);

        if expanded.starts_with('/') {
            Ok(absolute_path(&expanded, "/"))
        } else {
            let cwd = self.cwd().await?;
            Ok(absolute_path(&expanded, &cwd))
        }
    }

    /// Type of the remote entry at `path`.
    pub async fn ftype(&self, path: &str) -> Result<FileType> {
        let path = &self.expand_path(path).await?;
        let command = format!("stat -c '%F' {}", escape(path));
        let output = self.exec_output(&command, ExecOptions::new().unchecked()).await?;
        if is_not_found(&output.stdout) || is_not_found(&output.stderr) {
            return Err(FleetError::FileNotFound {
                host: self.name.clone(),
                path: path.to_string(),
            });
        }
        let stdout = chomp(&output.stdout);
        FileType::parse(stdout).ok_or_else(|| FleetError::UnknownFileType {
            host: self.name.clone(),
            path: path.to_string(),
            output: if stdout.is_empty() {
                chomp(&output.stderr).to_string()
            } else {
                stdout.to_string()
            },
        })
    }

    async fn probe(&self, path: &str, accept: impl Fn(FileType) -> bool) -> Result<bool> {
        match self.ftype(path).await {
            Ok(kind) => Ok(accept(kind)),
            Err(err) if err.is_missing_file() => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        self.probe(path, |_| true).await
    }

    pub async fn is_file(&self, path: &str) -> Result<bool> {
        self.probe(path, |kind| kind == FileType::File).await
    }

    pub async fn is_dir(&self, path: &str) -> Result<bool> {
        self.probe(path, |kind| kind == FileType::Directory).await
    }

    async fn stat_field(&self, format: &str, path: &str) -> Result<String> {
        let path = self.expand_path(path).await?;
        let command = format!("stat -c '{format}' {}", escape(&path));
        self.exec(&command, ExecOptions::new()).await
    }

    /// Permission bits of `path`.
    pub async fn mode(&self, path: &str) -> Result<u32> {
        let mode = self.stat_field("%a", path).await?;
        u32::from_str_radix(mode.trim(), 8).map_err(|_| FleetError::UnknownFileType {
            host: self.name.clone(),
            path: path.to_string(),
            output: mode,
        })
    }

    pub async fn owner(&self, path: &str) -> Result<String> {
        self.stat_field("%U", path).await
    }

    pub async fn group_owner(&self, path: &str) -> Result<String> {
        self.stat_field("%G", path).await
    }

    /// `chmod` with a numeric or symbolic mode.
    pub async fn chmod(&self, mode: &str, path: &str) -> Result<()> {
        let path = self.expand_path(path).await?;
        let command = format!("chmod {} {}", escape(mode), escape(&path));
        self.exec(&command, ExecOptions::new()).await.map(drop)
    }

    pub async fn chmod_r(&self, mode: &str, path: &str) -> Result<()> {
        let path = self.expand_path(path).await?;
        let command = format!("chmod -R {} {}", escape(mode), escape(&path));
        self.exec(&command, ExecOptions::new()).await.map(drop)
    }

    /// Append `text` as a line of `file`. With `uniq`, nothing is written
    /// when the line is already present. Returns whether the file changed.
    pub async fn append(&self, text: &str, file: &str, uniq: bool) -> Result<bool> {
        let file = &self.expand_path(file).await?;
        if uniq {
            let check = format!("grep -qxF {} {}", escape(text), escape(file));
            let found = self
                .exec_output(&check, ExecOptions::new().unchecked())
                .await?;
            if found.success() {
                return Ok(false);
            }
        }
        let mut line = text.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        let command = format!("tee -a {} >/dev/null", escape(file));
        self.exec(&command, ExecOptions::new().stdin(line)).await?;
        Ok(true)
    }

    /// Copy a local file to the host. The remote path defaults to the
    /// file's basename in the current directory. Returns the remote path.
    pub async fn upload(&self, local: &Path, remote: Option<&str>) -> Result<String> {
        let remote = match remote {
            Some(remote) => remote.to_string(),
            None => local
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| FleetError::transfer(&self.name, "local path has no file name"))?,
        };
        let remote = self.expand_path(&remote).await?;
        debug!(host = %self.name, "upload {} -> {}", local.display(), remote);
        self.connection().await?.upload(local, &remote).await?;
        Ok(remote)
    }

    /// Copy a remote file here. The local path defaults to the remote
    /// basename in the working directory.
    pub async fn download(&self, remote: &str, local: Option<&Path>) -> Result<PathBuf> {
        let remote = self.expand_path(remote).await?;
        let local = match local {
            Some(local) => local.to_path_buf(),
            None => PathBuf::from(basename(&remote)),
        };
        debug!(host = %self.name, "download {} -> {}", remote, local.display());
        self.connection().await?.download(&remote, &local).await?;
        Ok(local)
    }

    /// Install a local file at a path only root can write.
    ///
    /// The file travels through a private temp file under `/tmp` and is
    /// moved into place as root. An existing target keeps its owner, group
    /// and mode; a new one takes owner and group from its directory and
    /// the local file's mode.
    pub async fn sudo_upload(&self, local: &Path, remote: &str) -> Result<String> {
        let remote = self.expand_path(remote).await?;
        let local_mode = local_mode(&tokio::fs::metadata(local).await?);

        let temp = loop {
            let candidate = format!("/tmp/bfleet-{}", Uuid::new_v4().simple());
            if !self.exists(&candidate).await? {
                break candidate;
            }
        };

        set_local_mode(local, 0o600).await?;
        let uploaded = self.connection().await;
        let uploaded = match uploaded {
            Ok(connection) => connection.upload(local, &temp).await,
            Err(err) => Err(err),
        };
        set_local_mode(local, local_mode).await?;
        uploaded?;

        let _root = self.as_user("root");
        let (owner, group, mode) = if self.exists(&remote).await? {
            (
                self.owner(&remote).await?,
                self.group_owner(&remote).await?,
                self.mode(&remote).await?,
            )
        } else {
            let parent = dirname(&remote);
            (
                self.owner(parent).await?,
                self.group_owner(parent).await?,
                local_mode,
            )
        };

        self.exec(&format!("mv {} {}", escape(&temp), escape(&remote)), ExecOptions::new())
            .await?;
        self.chmod(&format!("{mode:o}"), &remote).await?;
        let chown = format!("chown {}:{} {}", escape(&owner), escape(&group), escape(&remote));
        self.exec(&chown, ExecOptions::new()).await?;
        Ok(remote)
    }
}
