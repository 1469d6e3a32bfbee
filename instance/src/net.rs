use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use wire::ACK;

use crate::error::HandshakeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Connecting,
    Sending,
    AwaitingAck,
    Acknowledged,
    TimedOut,
    Errored,
}

/// Client side of one forwarding attempt.
///
/// Each phase gets its own deadline; while waiting for the ack, every partial
/// read re-arms it.
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    timeout: Duration,
}

impl Handshake {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: HandshakeState::Connecting,
            timeout,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub async fn forward<S: AsRef<str>>(
        &mut self,
        endpoint: &Path,
        args: &[S],
    ) -> Result<(), HandshakeError> {
        let res = self.run(endpoint, args).await;
        self.state = match &res {
            Ok(()) => HandshakeState::Acknowledged,
            Err(HandshakeError::Timeout(_)) => HandshakeState::TimedOut,
            Err(_) => HandshakeState::Errored,
        };
        log::debug!("handshake: done state={:?}", self.state);
        res
    }

    async fn run<S: AsRef<str>>(
        &mut self,
        endpoint: &Path,
        args: &[S],
    ) -> Result<(), HandshakeError> {
        let frame = wire::encode(args)?;

        self.enter(HandshakeState::Connecting);
        let mut stream = self
            .deadline(UnixStream::connect(endpoint))
            .await?
            .map_err(HandshakeError::from_connect)?;
        log::debug!("handshake: connected target={}", endpoint.display());

        self.enter(HandshakeState::Sending);
        self.deadline(async {
            stream.write_all(&frame).await?;
            stream.flush().await
        })
        .await?
        .map_err(HandshakeError::from_transfer)?;
        log::debug!("handshake: sent bytes={}", frame.len());

        self.enter(HandshakeState::AwaitingAck);
        let mut reply = [0u8; 3];
        let mut got = 0;
        while got < ACK.len() {
            let n = self
                .deadline(stream.read(&mut reply[got..]))
                .await?
                .map_err(HandshakeError::from_transfer)?;
            if n == 0 {
                return Err(HandshakeError::PeerClosed);
            }
            got += n;
        }
        if !wire::is_ack(&reply) {
            return Err(HandshakeError::AckMismatch(reply.to_vec()));
        }
        // Dropping the stream closes our end; the master is already done.
        Ok(())
    }

    fn enter(&mut self, state: HandshakeState) {
        log::debug!("handshake: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    async fn deadline<F: Future>(&self, fut: F) -> Result<F::Output, HandshakeError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| HandshakeError::Timeout(self.timeout))
    }
}
