use crate::config::RemoteConfig;
use crate::services::transfer::{
    ExecOutput, RemoteConnector, RemoteSession, TransferError, TransferTarget,
};
use anyhow::anyhow;
use async_trait::async_trait;
use russh::ChannelMsg;
use russh::client::{AuthResult, Config, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// Host key policy applied during the handshake.
#[derive(Clone, Debug)]
struct ClientHandler {
    host: String,
    port: u16,
    known_hosts_path: Option<PathBuf>,
    strict: bool,
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        if !self.strict {
            tracing::debug!(
                "Host key checking disabled, accepting key for {}:{}",
                self.host,
                self.port
            );
            return Ok(true);
        }

        let known = match &self.known_hosts_path {
            Some(path) => {
                russh::keys::check_known_hosts_path(&self.host, self.port, server_public_key, path)
            }
            None => russh::keys::check_known_hosts(&self.host, self.port, server_public_key),
        };

        match known {
            Ok(true) => Ok(true),
            Ok(false) => {
                tracing::warn!("Unknown host key for {}:{}", self.host, self.port);
                Ok(false)
            }
            Err(e) => Err(anyhow!(
                "server key validation failed for {}:{}: {}",
                self.host,
                self.port,
                e
            )),
        }
    }
}

/// Opens SSH sessions authenticated with a private key.
pub struct SshConnector {
    config: Arc<Config>,
    known_hosts_path: Option<PathBuf>,
    strict_host_key_checking: bool,
}

impl SshConnector {
    pub fn new(remote: &RemoteConfig) -> Self {
        Self {
            config: Arc::new(Config::default()),
            known_hosts_path: remote.known_hosts_path.as_deref().map(expand_home),
            strict_host_key_checking: remote.strict_host_key_checking,
        }
    }
}

#[async_trait]
impl RemoteConnector for SshConnector {
    async fn connect(
        &self,
        target: &TransferTarget,
    ) -> Result<Box<dyn RemoteSession>, TransferError> {
        let handler = ClientHandler {
            host: target.remote_host.clone(),
            port: target.remote_port,
            known_hosts_path: self.known_hosts_path.clone(),
            strict: self.strict_host_key_checking,
        };

        let mut handle = russh::client::connect(
            self.config.clone(),
            (target.remote_host.as_str(), target.remote_port),
            handler,
        )
        .await
        .map_err(|e| TransferError::ConnectFailed(format!("{:#}", e)))?;

        let key_path = expand_home(&target.private_key_path);
        let key = russh::keys::load_secret_key(&key_path, None).map_err(|e| {
            TransferError::AuthenticationFailed(format!(
                "failed to load private key {}: {}",
                key_path.display(),
                e
            ))
        })?;

        let hash = handle
            .best_supported_rsa_hash()
            .await
            .map_err(|e| TransferError::ConnectFailed(e.to_string()))?
            .flatten();
        let result = handle
            .authenticate_publickey(
                target.username.clone(),
                PrivateKeyWithHashAlg::new(Arc::new(key), hash),
            )
            .await
            .map_err(|e| TransferError::AuthenticationFailed(e.to_string()))?;

        if !matches!(result, AuthResult::Success) {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
            return Err(TransferError::AuthenticationFailed(format!(
                "public key rejected for {}",
                target.username
            )));
        }

        Ok(Box::new(SshSession {
            handle: Mutex::new(handle),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "sftp"
    }
}

struct SshSession {
    handle: Mutex<Handle<ClientHandler>>,
}

impl SshSession {
    async fn sftp(&self) -> Result<SftpSession, TransferError> {
        let handle = self.handle.lock().await;
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| TransferError::TransferFailed(format!("open channel: {}", e)))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| TransferError::TransferFailed(format!("sftp subsystem: {}", e)))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| TransferError::TransferFailed(format!("sftp init: {}", e)))
    }
}

fn sftp_failed(remote_path: &str) -> impl Fn(russh_sftp::client::error::Error) -> TransferError {
    let remote_path = remote_path.to_string();
    move |e| TransferError::TransferFailed(format!("{}: {}", remote_path, e))
}

fn io_failed(remote_path: &str) -> impl Fn(std::io::Error) -> TransferError {
    let remote_path = remote_path.to_string();
    move |e| TransferError::TransferFailed(format!("{}: {}", remote_path, e))
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn put_file(&self, local_path: &Path, remote_path: &str) -> Result<u64, TransferError> {
        let mut local = tokio::fs::File::open(local_path)
            .await
            .map_err(|_| TransferError::LocalFileNotFound(local_path.to_path_buf()))?;

        let sftp = self.sftp().await?;
        let mut remote = sftp.create(remote_path).await.map_err(sftp_failed(remote_path))?;
        let bytes = tokio::io::copy(&mut local, &mut remote)
            .await
            .map_err(io_failed(remote_path))?;
        remote.shutdown().await.map_err(io_failed(remote_path))?;
        let _ = sftp.close().await;
        Ok(bytes)
    }

    async fn read_file(&self, remote_path: &str) -> Result<Option<Vec<u8>>, TransferError> {
        let sftp = self.sftp().await?;
        let mut remote = match sftp.open(remote_path).await {
            Ok(file) => file,
            Err(russh_sftp::client::error::Error::Status(status))
                if status.status_code == StatusCode::NoSuchFile =>
            {
                let _ = sftp.close().await;
                return Ok(None);
            }
            Err(e) => return Err(sftp_failed(remote_path)(e)),
        };

        let mut contents = Vec::new();
        remote
            .read_to_end(&mut contents)
            .await
            .map_err(io_failed(remote_path))?;
        let _ = remote.shutdown().await;
        let _ = sftp.close().await;
        Ok(Some(contents))
    }

    async fn write_file(&self, remote_path: &str, contents: &[u8]) -> Result<(), TransferError> {
        let sftp = self.sftp().await?;
        let mut remote = sftp.create(remote_path).await.map_err(sftp_failed(remote_path))?;
        remote
            .write_all(contents)
            .await
            .map_err(io_failed(remote_path))?;
        remote.shutdown().await.map_err(io_failed(remote_path))?;
        let _ = sftp.close().await;
        Ok(())
    }

    async fn exec(&self, command: &str) -> Result<ExecOutput, TransferError> {
        let handle = self.handle.lock().await;
        let mut chan = handle
            .channel_open_session()
            .await
            .map_err(|e| TransferError::TransferFailed(format!("open channel: {}", e)))?;
        tracing::debug!("executing '{}'", command);
        chan.exec(true, command)
            .await
            .map_err(|e| TransferError::TransferFailed(format!("exec request: {}", e)))?;

        let mut output = ExecOutput::default();
        while let Some(msg) = chan.wait().await {
            match msg {
                ChannelMsg::Data { data } => output.stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => {
                    output.stderr.extend_from_slice(&data)
                }
                ChannelMsg::ExitStatus { exit_status } => output.exit_code = exit_status,
                ChannelMsg::Close => break,
                _ => {}
            }
        }
        let _ = chan.close().await;
        Ok(output)
    }

    async fn close(self: Box<Self>) {
        let handle = self.handle.into_inner();
        if let Err(e) = handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("SSH disconnect failed: {}", e);
        }
    }
}

/// Expands a leading `~/` against `$HOME`.
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}
