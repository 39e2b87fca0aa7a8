use crate::error::{Error, Result};
use base64::Engine;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ssh2::Session as Ssh2Session;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

/// Credentials for opening a connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    /// Path to the private key file used for public-key authentication
    pub key_path: PathBuf,
}

pub fn default_port() -> u16 {
    22
}

/// Send SSH keepalives every 20s so idle sessions survive NAT state expiry
const KEEPALIVE_INTERVAL_SECS: u32 = 20;

/// Connection metadata for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub session: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub connected_at: i64,
    pub host_key_fingerprint: Option<String>,
}

/// An authenticated SSH connection bound to one session key.
///
/// The underlying `ssh2::Session` sits behind a mutex: concurrent commands
/// against the same session key take turns on the transport, so callers get a
/// predictable per-session ordering.
pub struct Connection {
    session_key: String,
    host: String,
    port: u16,
    username: String,
    connected_at: i64,
    host_key_fingerprint: Option<String>,
    ssh: Mutex<Ssh2Session>,
}

impl Connection {
    /// Establish and authenticate a connection.
    ///
    /// The private key is read before anything touches the network, so an
    /// unreadable path fails with `KeyRead` and no connection attempt.
    pub fn open(
        session_key: &str,
        credentials: &Credentials,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let key_material =
            std::fs::read_to_string(&credentials.key_path).map_err(|source| Error::KeyRead {
                path: credentials.key_path.clone(),
                source,
            })?;

        // Log connection attempt (no secrets!)
        tracing::info!(
            "Connecting to {}@{}:{} (session {})",
            credentials.username,
            credentials.host,
            credentials.port,
            session_key
        );

        let addr = format!("{}:{}", credentials.host, credentials.port);
        let sock_addr = addr
            .to_socket_addrs()
            .map_err(|e| Error::Connection(format!("Failed to resolve {}: {}", addr, e)))?
            .next()
            .ok_or_else(|| Error::Connection(format!("No addresses resolved for {}", addr)))?;

        let tcp = TcpStream::connect_timeout(&sock_addr, connect_timeout)
            .map_err(|e| Error::Connection(format!("TCP connect failed: {}", e)))?;
        tcp.set_nodelay(true)?;
        tcp.set_write_timeout(Some(connect_timeout))?;

        let mut ssh = Ssh2Session::new()
            .map_err(|e| Error::Connection(format!("Failed to create SSH session: {}", e)))?;

        ssh.set_tcp_stream(tcp);
        ssh.set_timeout(connect_timeout.as_millis() as u32);
        ssh.set_keepalive(true, KEEPALIVE_INTERVAL_SECS);

        ssh.handshake()
            .map_err(|e| Error::Connection(format!("SSH handshake failed: {}", e)))?;

        let host_key_fingerprint = ssh.host_key().map(|(key, _)| sha256_fingerprint(key));
        if let Some(ref fp) = host_key_fingerprint {
            tracing::debug!("Host key for {}:{} is {}", credentials.host, credentials.port, fp);
        }

        ssh.userauth_pubkey_memory(&credentials.username, None, &key_material, None)
            .map_err(|e| Error::Connection(format!("Authentication failed: {}", e)))?;

        if !ssh.authenticated() {
            return Err(Error::Connection("Authentication failed".to_string()));
        }

        tracing::info!("SSH connected successfully (session {})", session_key);

        Ok(Self {
            session_key: session_key.to_string(),
            host: credentials.host.clone(),
            port: credentials.port,
            username: credentials.username.clone(),
            connected_at: chrono::Utc::now().timestamp(),
            host_key_fingerprint,
            ssh: Mutex::new(ssh),
        })
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            session: self.session_key.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            connected_at: self.connected_at,
            host_key_fingerprint: self.host_key_fingerprint.clone(),
        }
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Lock the transport for one command. Held for the full duration of the
    /// command, which is what serializes same-session executions.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Ssh2Session> {
        self.ssh.lock()
    }

    /// Shut down the transport. Errors are ignored; the peer may already be gone.
    pub fn shutdown(&self) {
        let ssh = self.ssh.lock();
        if let Err(e) = ssh.disconnect(None, "closing session", None) {
            tracing::debug!("Disconnect for session {} returned: {}", self.session_key, e);
        }
    }
}

/// Compute SHA256 fingerprint of a host key
fn sha256_fingerprint(key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key);
    let result = hasher.finalize();

    // Format as SHA256:base64
    let b64 = base64::engine::general_purpose::STANDARD.encode(result);
    format!("SHA256:{}", b64.trim_end_matches('='))
}
