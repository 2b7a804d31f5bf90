//! Upstream MUD TCP connection
//!
//! Owns the read and write halves of a connected MUD socket as two spawned
//! tasks. The read task feeds bytes through the telnet assembler and hands
//! completed lines to the owning session; a packet-patch timeout releases
//! a trailing partial line when no further data arrives. The write task
//! drains a queue so a slow MUD write never blocks the session's
//! processing of other work.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ProxyError, Result};
use crate::session::Session;

/// A connected MUD socket's two running tasks and the channel used to
/// queue outgoing lines.
pub struct MudHandle {
    write_tx: mpsc::UnboundedSender<String>,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
}

impl MudHandle {
    /// Queue a line to be written to the MUD, terminated with CR+LF.
    pub fn send_line(&self, line: &str) {
        let _ = self.write_tx.send(line.to_string());
    }

    /// Tear down both tasks. The underlying socket closes when its owning
    /// task is dropped.
    pub fn shutdown(self) {
        self.read_task.abort();
        self.write_task.abort();
    }
}

/// Connect to `host:port` (already whitelist-checked by the caller) and
/// spawn the reader/writer tasks wired to `session`.
pub async fn connect(session: Arc<Session>, host: String, port: u16) -> Result<MudHandle> {
    let stream = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|e| ProxyError::MudConnect(format!("{host}:{port}: {e}")))?;
    let (mut read_half, mut write_half) = stream.into_split();

    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<String>();
    let write_task = tokio::spawn(async move {
        while let Some(line) = write_rx.recv().await {
            let mut bytes = line.into_bytes();
            bytes.extend_from_slice(b"\r\n");
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let packet_patch_ms = session.config.timing.packet_patch_ms;
    let read_session = session.clone();
    let read_task = tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            let has_partial = {
                let state = read_session.state.lock().await;
                state.line_assembler.has_partial()
            };

            let read_result = if has_partial {
                match tokio::time::timeout(Duration::from_millis(packet_patch_ms), read_half.read(&mut buf)).await
                {
                    Ok(result) => result,
                    Err(_elapsed) => {
                        let flushed = {
                            let mut state = read_session.state.lock().await;
                            state.line_assembler.flush()
                        };
                        if let Some(bytes) = flushed {
                            let line = String::from_utf8_lossy(&bytes).to_string();
                            read_session.process_mud_line(&line).await;
                        }
                        continue;
                    }
                }
            } else {
                read_half.read(&mut buf).await
            };

            match read_result {
                Ok(0) => {
                    read_session.handle_mud_remote_close().await;
                    break;
                }
                Ok(n) => {
                    let assembled = {
                        let mut state = read_session.state.lock().await;
                        state.line_assembler.feed(&buf[..n])
                    };
                    for raw_line in assembled.lines {
                        let line = String::from_utf8_lossy(&raw_line).to_string();
                        read_session.process_mud_line(&line).await;
                    }
                }
                Err(e) => {
                    let err = ProxyError::MudSocket(e.to_string());
                    tracing::warn!("{err}");
                    read_session.handle_mud_socket_error(err.to_string()).await;
                    break;
                }
            }
        }
    });

    Ok(MudHandle { write_tx, read_task, write_task })
}
