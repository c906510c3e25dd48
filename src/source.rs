//! Where the renderer gets the log bytes from.
//!
//! Every pass reads the whole file again; nothing is cached between passes.
use std::fmt;
use std::io::Read;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use ssh2::Session;
use thiserror::Error;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// SSH socket timeout in milliseconds.
const SSH_TIMEOUT_MS: u32 = 30_000;

/// Reads the full contents of the probe log.
#[async_trait]
pub trait LogReader: Send + Sync {
    async fn read_all(&self) -> Result<Vec<u8>>;

    /// Human-readable location for diagnostics.
    fn describe(&self) -> String;
}

/// Log file on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalLog {
    path: PathBuf,
}

impl LocalLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LogReader for LocalLog {
    async fn read_all(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("failed to read log file: {}", self.path.display()))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("expected user@host[:port], got {0:?}")]
    MissingUser(String),

    #[error("empty host in {0:?}")]
    EmptyHost(String),

    #[error("invalid port {port:?} in {input:?}")]
    InvalidPort { input: String, port: String },
}

/// `user@host[:port]` descriptor of an SSH endpoint.
///
/// IPv6 hosts with a port must be bracketed: `user@[::1]:2222`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl FromStr for RemoteTarget {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user, rest) = s
            .split_once('@')
            .filter(|(user, _)| !user.is_empty())
            .ok_or_else(|| RemoteError::MissingUser(s.to_string()))?;

        let (host, port) = if let Some(inner) = rest.strip_prefix('[') {
            match inner.split_once(']') {
                Some((host, "")) => (host, None),
                Some((host, tail)) => match tail.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => return Err(RemoteError::EmptyHost(s.to_string())),
                },
                None => return Err(RemoteError::EmptyHost(s.to_string())),
            }
        } else {
            match rest.split_once(':') {
                // More than one colon: an unbracketed IPv6 literal.
                Some((_, port)) if port.contains(':') => (rest, None),
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(RemoteError::EmptyHost(s.to_string()));
        }
        let port = match port {
            Some(p) => p.parse::<u16>().ok().filter(|p| *p != 0).ok_or_else(|| {
                RemoteError::InvalidPort {
                    input: s.to_string(),
                    port: p.to_string(),
                }
            })?,
            None => DEFAULT_SSH_PORT,
        };

        Ok(Self {
            user: user.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}@[{}]:{}", self.user, self.host, self.port)
        } else {
            write!(f, "{}@{}:{}", self.user, self.host, self.port)
        }
    }
}

/// Log file read over SFTP through one long-lived SSH session.
pub struct RemoteLog {
    target: RemoteTarget,
    path: PathBuf,
    session: Arc<Mutex<Session>>,
}

impl RemoteLog {
    /// Connect and authenticate. Uses the key file when given, ssh-agent otherwise.
    pub async fn connect(
        target: RemoteTarget,
        path: PathBuf,
        identity: Option<PathBuf>,
    ) -> Result<Self> {
        let t = target.clone();
        let session = tokio::task::spawn_blocking(move || open_session(&t, identity.as_deref()))
            .await
            .context("ssh connect task failed")??;
        tracing::info!(target = %target, "ssh session established");
        Ok(Self {
            target,
            path,
            session: Arc::new(Mutex::new(session)),
        })
    }
}

fn open_session(target: &RemoteTarget, identity: Option<&Path>) -> Result<Session> {
    let tcp = TcpStream::connect((target.host.as_str(), target.port))
        .with_context(|| format!("failed to connect to {target}"))?;
    let mut session = Session::new().context("failed to create ssh session")?;
    session.set_timeout(SSH_TIMEOUT_MS);
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .with_context(|| format!("ssh handshake with {target} failed"))?;

    match identity {
        Some(key) => session
            .userauth_pubkey_file(&target.user, None, key, None)
            .with_context(|| format!("public key authentication with {} failed", key.display()))?,
        None => session
            .userauth_agent(&target.user)
            .context("ssh-agent authentication failed")?,
    }
    if !session.authenticated() {
        bail!("ssh authentication as {} was rejected", target.user);
    }
    Ok(session)
}

#[async_trait]
impl LogReader for RemoteLog {
    async fn read_all(&self) -> Result<Vec<u8>> {
        let session = Arc::clone(&self.session);
        let path = self.path.clone();
        let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let session = session
                .lock()
                .map_err(|_| anyhow!("ssh session lock poisoned"))?;
            let sftp = session.sftp().context("failed to start sftp subsystem")?;
            let mut file = sftp.open(&path)?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            Ok(buf)
        })
        .await
        .context("sftp read task failed")?
        .with_context(|| format!("failed to read {}", self.describe()))?;
        Ok(bytes)
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.target, self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(s: &str) -> Result<RemoteTarget, RemoteError> {
        s.parse()
    }

    #[test]
    fn parses_user_host_with_default_port() {
        let t = target("pi@raspberrypi.local").unwrap();
        assert_eq!(t.user, "pi");
        assert_eq!(t.host, "raspberrypi.local");
        assert_eq!(t.port, DEFAULT_SSH_PORT);
    }

    #[test]
    fn parses_explicit_port() {
        assert_eq!(target("me@10.0.0.2:2222").unwrap().port, 2222);
    }

    #[test]
    fn parses_ipv6_forms() {
        let bracketed = target("me@[fe80::1]:2200").unwrap();
        assert_eq!(bracketed.host, "fe80::1");
        assert_eq!(bracketed.port, 2200);

        let bare = target("me@fe80::1").unwrap();
        assert_eq!(bare.host, "fe80::1");
        assert_eq!(bare.port, DEFAULT_SSH_PORT);
        assert_eq!(bare.to_string(), "me@[fe80::1]:22");
    }

    #[test]
    fn rejects_bad_descriptors() {
        assert!(matches!(target("host"), Err(RemoteError::MissingUser(_))));
        assert!(matches!(target("@host"), Err(RemoteError::MissingUser(_))));
        assert!(matches!(target("me@"), Err(RemoteError::EmptyHost(_))));
        assert!(matches!(target("me@:22"), Err(RemoteError::EmptyHost(_))));
        assert!(matches!(
            target("me@host:ssh"),
            Err(RemoteError::InvalidPort { .. })
        ));
        assert!(matches!(
            target("me@host:0"),
            Err(RemoteError::InvalidPort { .. })
        ));
    }

    #[tokio::test]
    async fn local_log_reads_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ping.log");
        std::fs::write(&path, b"abc\n").unwrap();
        let log = LocalLog::new(&path);
        assert_eq!(log.read_all().await.unwrap(), b"abc\n");
        assert!(LocalLog::new(dir.path().join("missing.log"))
            .read_all()
            .await
            .is_err());
    }
}
