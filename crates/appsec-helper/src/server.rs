//! Unix socket server: one session task per connected extension.

use std::fs::{File, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use tokio::net::{UnixListener as TokioUnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::client::Client;
use crate::clock::SystemClock;
use crate::config::HelperConfig;
use crate::error::{Result, ServerError};
use crate::service::{ServiceCache, ServiceOptions};
use crate::transport::StreamTransport;

/// Exclusive lock held for the lifetime of the process.
#[derive(Debug)]
pub struct InstanceLock {
    _file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Takes the lock at `path`, writing our pid into it.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(ServerError::AlreadyRunning(path.display().to_string()));
            }
            return Err(e.into());
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The helper's listening socket. The socket file is removed on drop.
#[derive(Debug)]
pub struct UnixListener {
    inner: TokioUnixListener,
    path: PathBuf,
}

impl UnixListener {
    /// Binds at `path` and sets the socket file to `mode`.
    ///
    /// A socket left behind by an earlier run is replaced. Any other file at
    /// `path` is left alone and the bind fails.
    pub fn bind(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref();

        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_socket() => {
                debug!(path = %path.display(), "Removing stale socket");
                std::fs::remove_file(path)?;
            }
            Ok(_) => {
                return Err(ServerError::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists and is not a socket", path.display()),
                )));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let inner = TokioUnixListener::bind(path)?;
        let listener = Self {
            inner,
            path: path.to_path_buf(),
        };
        std::fs::set_permissions(path, Permissions::from_mode(mode))?;
        Ok(listener)
    }

    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self.inner.accept().await?;
        Ok(stream)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Accepts only root and peers running as our own effective user.
fn peer_allowed(stream: &UnixStream) -> bool {
    match stream.peer_cred() {
        Ok(cred) => {
            let uid = cred.uid();
            uid == 0 || uid == nix::unistd::geteuid().as_raw()
        }
        Err(e) => {
            warn!(error = %e, "Failed to read peer credentials");
            false
        }
    }
}

/// The helper's socket server.
#[derive(Debug)]
pub struct Server {
    listener: UnixListener,
    _lock: InstanceLock,
    cache: ServiceCache,
    connections: Arc<Semaphore>,
    client_init_timeout: Duration,
    check_peer_uid: bool,
}

impl Server {
    /// Takes the instance lock, then binds the socket.
    pub fn bind(config: &HelperConfig) -> Result<Self> {
        let lock = InstanceLock::acquire(&config.lock_path)?;
        // Owner only when foreign users are refused anyway.
        let mode = if config.check_peer_uid { 0o600 } else { 0o666 };
        let listener = UnixListener::bind(&config.socket_path, mode)?;
        let cache = ServiceCache::new(ServiceOptions {
            clock: Arc::new(SystemClock),
            rc_poll_interval: config.rc_poll_interval(),
        });

        Ok(Self {
            listener,
            _lock: lock,
            cache,
            connections: Arc::new(Semaphore::new(config.max_connections)),
            client_init_timeout: config.client_init_timeout(),
            check_peer_uid: config.check_peer_uid,
        })
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        self.listener.path()
    }

    #[must_use]
    pub const fn cache(&self) -> &ServiceCache {
        &self.cache
    }

    /// Accepts connections until `cancel` fires, then waits for every
    /// session to finish.
    pub async fn serve(self, cancel: CancellationToken) -> Result<()> {
        info!(
            socket = %self.listener.path().display(),
            max_connections = self.connections.available_permits(),
            "Helper listening"
        );

        let mut sessions = JoinSet::new();
        loop {
            let stream = tokio::select! {
                () = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            while sessions.try_join_next().is_some() {}

            if self.check_peer_uid && !peer_allowed(&stream) {
                warn!("Rejected connection from foreign user");
                continue;
            }

            let Ok(permit) = Arc::clone(&self.connections).try_acquire_owned() else {
                warn!(active = sessions.len(), "Connection limit reached");
                continue;
            };

            let mut client = Client::new(self.cache.clone(), self.client_init_timeout);
            let token = cancel.child_token();
            sessions.spawn(async move {
                let _permit = permit;
                let mut broker = Broker::new(StreamTransport::new(stream));
                client.run(&mut broker, token).await;
                debug!("Session ended");
            });
        }

        info!(active = sessions.len(), "Shutting down, waiting for sessions");
        while sessions.join_next().await.is_some() {}
        Ok(())
    }
}

/// Binds and serves until `cancel` fires.
pub async fn run(config: &HelperConfig, cancel: CancellationToken) -> Result<()> {
    Server::bind(config)?.serve(cancel).await
}
