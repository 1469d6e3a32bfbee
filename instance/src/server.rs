use std::fs::Permissions;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};

use wire::{FrameDecoder, FrameState, ACK};

use crate::error::is_peer_closed;

#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// Longest silence tolerated before a frame is complete.
    pub receive_timeout: Duration,
    /// How long the ack is left for the peer to read before we hang up.
    pub disconnect_grace: Duration,
    pub max_payload_bytes: usize,
    /// Restrict the socket to the owning user (local scope).
    pub private: bool,
}

/// The master's listening endpoint. Dropping it stops accepting and removes
/// the socket path.
#[derive(Debug)]
pub struct Listener {
    path: PathBuf,
    shutdown: watch::Sender<bool>,
}

impl Listener {
    /// Must be called from inside a tokio runtime.
    pub fn bind(
        path: &Path,
        opts: ServerOptions,
        deliver: mpsc::UnboundedSender<Vec<String>>,
    ) -> io::Result<Self> {
        let listener = match UnixListener::bind(path) {
            Ok(l) => l,
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                // The caller holds the lock, so whoever bound this path is gone.
                log::info!("listen: removing orphaned socket path={}", path.display());
                std::fs::remove_file(path)?;
                UnixListener::bind(path)?
            }
            Err(e) => return Err(e),
        };
        if opts.private {
            if let Err(e) = std::fs::set_permissions(path, Permissions::from_mode(0o600)) {
                log::warn!(
                    "listen: cannot restrict socket to owner path={} err={e}",
                    path.display()
                );
            }
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(accept_loop(listener, opts, deliver, shutdown_rx));
        log::info!("listen: ok path={}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            shutdown,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        let _ = std::fs::remove_file(&self.path);
        log::debug!("listen: closed path={}", self.path.display());
    }
}

async fn accept_loop(
    listener: UnixListener,
    opts: ServerOptions,
    deliver: mpsc::UnboundedSender<Vec<String>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            // Err means the Listener handle is gone, which is a shutdown too.
            _ = shutdown.changed() => break,
            accept = listener.accept() => match accept {
                Ok((stream, _addr)) => {
                    let deliver = deliver.clone();
                    tokio::spawn(async move {
                        ConnectionHandler::new(stream, opts).run(&deliver).await;
                    });
                }
                Err(e) => log::warn!("listen: accept failed: {e:?}"),
            },
        }
    }
}

/// One accepted secondary: read a frame, ack it, hand it on, hang up.
pub struct ConnectionHandler {
    stream: UnixStream,
    decoder: FrameDecoder,
    opts: ServerOptions,
}

impl ConnectionHandler {
    pub fn new(stream: UnixStream, opts: ServerOptions) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(opts.max_payload_bytes),
            opts,
        }
    }

    pub async fn run(mut self, deliver: &mpsc::UnboundedSender<Vec<String>>) {
        let Some(args) = self.receive().await else {
            return;
        };
        log::debug!("conn: received args={}", args.len());

        match self.stream.write_all(ACK).await {
            Ok(()) => {
                let _ = self.stream.flush().await;
            }
            Err(e) => log::warn!("conn: failed to acknowledge: {e}"),
        }

        // Queued: the host picks it up from its own loop, never from here.
        if deliver.send(args).is_err() {
            log::debug!("conn: coordinator gone, message dropped");
        }

        self.linger().await;
        // `self.stream` is dropped (closed) here, exactly once.
    }

    async fn receive(&mut self) -> Option<Vec<String>> {
        let mut buf = [0u8; 4096];
        loop {
            let read = match tokio::time::timeout(
                self.opts.receive_timeout,
                self.stream.read(&mut buf),
            )
            .await
            {
                Ok(r) => r,
                Err(_) => {
                    log::warn!(
                        "conn: client stalled for {:?}, dropping ({})",
                        self.opts.receive_timeout,
                        self.describe_missing()
                    );
                    return None;
                }
            };
            match read {
                Ok(0) => {
                    if self.decoder.state() == FrameState::AwaitingLength
                        && self.decoder.buffered() == 0
                    {
                        log::debug!("conn: client left without sending anything");
                    } else {
                        log::warn!(
                            "conn: client lost, invalid data ({})",
                            self.describe_missing()
                        );
                    }
                    return None;
                }
                Ok(n) => match self.decoder.push(&buf[..n]) {
                    Ok(Some(args)) => return Some(args),
                    Ok(None) => {}
                    Err(e) => {
                        log::warn!("conn: client sent invalid data: {e}");
                        return None;
                    }
                },
                Err(e) if is_peer_closed(&e) => {
                    log::debug!("conn: peer closed: {e}");
                    return None;
                }
                Err(e) => {
                    log::warn!("conn: failed to receive arguments: {e}");
                    return None;
                }
            }
        }
    }

    fn describe_missing(&self) -> String {
        self.decoder
            .incomplete()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "complete".to_string())
    }

    /// Wait for the peer to hang up after reading the ack, bounded by the
    /// grace period.
    async fn linger(&mut self) {
        let grace = self.opts.disconnect_grace;
        let stream = &mut self.stream;
        let wait = async move {
            let mut buf = [0u8; 64];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        if !is_peer_closed(&e) {
                            log::warn!("conn: socket error after ack: {e}");
                        }
                        break;
                    }
                }
            }
        };
        if tokio::time::timeout(grace, wait).await.is_err() {
            log::debug!("conn: grace period over, disconnecting");
        }
    }
}
