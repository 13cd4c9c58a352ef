// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

//! Tokio driver for the connection core: a unix-domain socket carrying
//! length-framed JSON documents (4-byte little-endian length prefix),
//! plus the coarse single-shot reconnect timer.

use crate::connection::{ConnectionCore, ConnectionOptions, ConnectionStatus, Effect};
use crate::request::Request;
use crate::watcher::Watcher;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A connection to a local engine socket. All user entry points funnel
/// into the shared core; the background task owns the socket.
pub struct Connection {
    core: Mutex<ConnectionCore>,
    outbound: mpsc::UnboundedSender<Value>,
    dial: tokio::sync::Notify,
}

impl Connection {
    /// Creates the connection and starts its driver task. The task
    /// stays dormant until `connect_to_server`.
    pub fn new(options: ConnectionOptions) -> Arc<Connection> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Connection {
            core: Mutex::new(ConnectionCore::new(options)),
            outbound,
            dial: tokio::sync::Notify::new(),
        });
        tokio::spawn(run(Arc::clone(&connection), outbound_rx));
        connection
    }

    pub fn status(&self) -> ConnectionStatus {
        self.core.lock().status()
    }

    /// Attempts to establish the connection.
    pub fn connect_to_server(self: &Arc<Self>) {
        let effects = self.core.lock().connect_requested();
        self.run_effects(effects);
    }

    pub fn disconnect_from_server(self: &Arc<Self>) {
        let effects = self.core.lock().disconnect_requested();
        self.run_effects(effects);
        // dropping the outbound stream is observed by the driver task,
        // which tears the socket down
        let _ = self.outbound.send(Value::Null);
    }

    /// Appends the request to the queue and sends it when the line is
    /// free. Returns false when the request was already processed.
    pub fn send(self: &Arc<Self>, request: &Request) -> bool {
        let (accepted, effects) = {
            let mut core = self.core.lock();
            let accepted = core.send(request);
            let effects =
                if accepted { core.handle_request_queue() } else { Vec::new() };
            (accepted, effects)
        };
        self.run_effects(effects);
        accepted
    }

    /// Cancels a queued request; sent requests cannot be cancelled.
    pub fn cancel(self: &Arc<Self>, request: &Request) -> bool {
        self.core.lock().cancel(request)
    }

    pub fn add_watcher(self: &Arc<Self>, watcher: &Watcher) {
        let effects = self.core.lock().add_watcher(watcher);
        self.run_effects(effects);
    }

    pub fn remove_watcher(self: &Arc<Self>, watcher: &Watcher) {
        let effects = self.core.lock().remove_watcher(watcher);
        self.run_effects(effects);
    }

    fn run_effects(self: &Arc<Self>, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send(frame) => {
                    let _ = self.outbound.send(frame);
                }
                Effect::Dial => self.dial.notify_one(),
                Effect::ScheduleReconnect(_) => {
                    // the reconnect sleep lives in the driver loop
                }
                Effect::StatusChanged(status) => debug!(?status, "connection status"),
                Effect::Disconnected => debug!("disconnected"),
            }
        }
    }
}

async fn run(connection: Arc<Connection>, mut outbound_rx: mpsc::UnboundedReceiver<Value>) {
    loop {
        // wait until a dial is wanted
        let (path, interval) = {
            let core = connection.core.lock();
            let options = core.options();
            (options.socket_path.clone(), options.reconnect_interval)
        };
        if connection.core.lock().status() != ConnectionStatus::Connecting {
            connection.dial.notified().await;
            continue;
        }

        match UnixStream::connect(&path).await {
            Ok(stream) => {
                // frames left over from the previous session belong to
                // requests that were re-queued; drop them so nothing is
                // sent twice
                while outbound_rx.try_recv().is_ok() {}
                let effects = connection.core.lock().on_connected();
                connection.run_effects(effects);
                let (reader, writer) = stream.into_split();
                session(&connection, reader, writer, &mut outbound_rx).await;
                let effects = connection.core.lock().on_disconnected();
                let reconnect = effects
                    .iter()
                    .any(|effect| matches!(effect, Effect::ScheduleReconnect(_)));
                connection.run_effects(effects);
                if !reconnect {
                    continue;
                }
                tokio::time::sleep(interval).await;
                let effects = connection.core.lock().on_reconnect_timer();
                connection.run_effects(effects);
            }
            Err(error) => {
                warn!(%error, "connect attempt failed");
                let effects = connection.core.lock().on_disconnected();
                let reconnect = effects
                    .iter()
                    .any(|effect| matches!(effect, Effect::ScheduleReconnect(_)));
                connection.run_effects(effects);
                if !reconnect {
                    continue;
                }
                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// Pumps frames both ways until the socket drops.
async fn session(
    connection: &Arc<Connection>,
    reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    outbound_rx: &mut mpsc::UnboundedReceiver<Value>,
) {
    let mut reader = BufReader::new(reader);
    loop {
        tokio::select! {
            incoming = read_frame(&mut reader) => {
                match incoming {
                    Ok(Some(document)) => {
                        let effects = connection.core.lock().on_received(&document);
                        connection.run_effects(effects);
                    }
                    Ok(None) | Err(_) => return,
                }
            }
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    None => return,
                    // a null frame is the teardown signal from an
                    // explicit disconnect; stale ones are ignored
                    Some(Value::Null) => {
                        if connection.core.lock().explicitly_disconnected() {
                            return;
                        }
                    }
                    Some(frame) => {
                        if write_frame(&mut writer, &frame).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> std::io::Result<Option<Value>> {
    let mut length = [0u8; 4];
    match reader.read_exact(&mut length).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let mut payload = vec![0u8; u32::from_le_bytes(length) as usize];
    reader.read_exact(&mut payload).await?;
    let document = serde_json::from_slice(&payload)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(Some(document))
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &Value) -> std::io::Result<()> {
    let payload = serde_json::to_vec(frame)?;
    writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await
}
