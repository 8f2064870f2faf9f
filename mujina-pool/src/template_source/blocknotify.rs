//! TCP listener for daemon `-blocknotify` lines.
//!
//! zcashd runs its `-blocknotify` command with the new tip hash, e.g.
//! `blocknotify=echo %s | nc 127.0.0.1 7786`. Each line received becomes one
//! notification frame for [`super::PushSource`].

use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;

use crate::tracing::prelude::*;

const MAX_LINE_LENGTH: usize = 1024;
const FRAME_BUFFER: usize = 16;

/// Accepts notification connections and forwards their lines as frames.
pub struct BlockNotifyListener {
    listener: TcpListener,
    tx: mpsc::Sender<Bytes>,
    shutdown: CancellationToken,
}

impl BlockNotifyListener {
    /// Bind `addr`, returning the listener and its frame stream.
    pub async fn bind(
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> io::Result<(Self, BoxStream<'static, Bytes>)> {
        let listener = TcpListener::bind(addr).await?;
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);

        Ok((
            Self {
                listener,
                tx,
                shutdown,
            },
            ReceiverStream::new(rx).boxed(),
        ))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) {
        if let Ok(addr) = self.local_addr() {
            info!(%addr, "Listening for block notifications");
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tokio::spawn(forward_lines(stream, peer, self.tx.clone(), self.shutdown.clone()));
                        }
                        Err(e) => warn!(error = %e, "Failed to accept block notification"),
                    }
                }
                _ = self.shutdown.cancelled() => break,
            }
        }
    }
}

async fn forward_lines(
    stream: TcpStream,
    peer: SocketAddr,
    tx: mpsc::Sender<Bytes>,
    shutdown: CancellationToken,
) {
    let mut lines = FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    loop {
        tokio::select! {
            line = lines.next() => {
                match line {
                    Some(Ok(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        trace!(%peer, line, "Block notification line");
                        if tx.send(Bytes::copy_from_slice(line.as_bytes())).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(%peer, error = %e, "Bad block notification");
                        break;
                    }
                    None => break,
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}
