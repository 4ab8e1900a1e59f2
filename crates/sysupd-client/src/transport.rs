//! Client end of the Unix-socket transport.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use sysupd_core::wire::{write_frame, ClientFrame, FrameReader, WorkerFrame};
use sysupd_core::{link, Caller, Inbound, Responder, SignalEnvelope};
use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::proxy::Proxy;

type Pending = Arc<Mutex<HashMap<u64, Responder>>>;

/// Connects to a worker socket and returns a proxy named after the
/// `Welcome` frame.
pub async fn connect_unix(path: &Path) -> Result<Proxy> {
    let stream = UnixStream::connect(path)
        .await
        .with_context(|| format!("failed connecting to {}", path.display()))?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(BufReader::new(read_half), path.display().to_string());

    let name = match reader.next::<WorkerFrame>().await? {
        Some(WorkerFrame::Welcome { name }) => name,
        Some(other) => return Err(anyhow!("expected welcome frame, got {other:?}")),
        None => return Err(anyhow!("worker closed the connection before welcome")),
    };
    info!(%name, socket = %path.display(), "connected to worker");

    let (worker_end, client_end) = link(32);
    let pending: Pending = Arc::default();
    tokio::spawn(write_requests(write_half, worker_end.inbox, pending.clone()));
    tokio::spawn(read_frames(reader, worker_end.signals, pending));

    Ok(Proxy::new(Caller::new(name), client_end))
}

async fn write_requests(
    mut write_half: OwnedWriteHalf,
    mut requests: mpsc::Receiver<Inbound>,
    pending: Pending,
) {
    let mut serial = 0u64;
    while let Some(inbound) = requests.recv().await {
        serial += 1;
        let (frame, reply) = match inbound {
            Inbound::Call { call, reply, .. } => (ClientFrame::Call { serial, call }, reply),
            Inbound::Answer { code, reply, .. } => (ClientFrame::Answer { serial, code }, reply),
            Inbound::Disconnected { .. } => break,
        };
        lock(&pending).insert(serial, reply);
        if let Err(err) = write_frame(&mut write_half, &frame).await {
            warn!(error = %err, "failed writing request");
            lock(&pending).remove(&serial);
            break;
        }
    }
    debug!("request writer finished");
}

async fn read_frames(
    mut reader: FrameReader<BufReader<OwnedReadHalf>>,
    signals: mpsc::UnboundedSender<SignalEnvelope>,
    pending: Pending,
) {
    loop {
        match reader.next::<WorkerFrame>().await {
            Ok(Some(WorkerFrame::Reply { serial, result })) => {
                match lock(&pending).remove(&serial) {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => warn!(serial, "reply for an unknown request"),
                }
            }
            Ok(Some(WorkerFrame::Signal(envelope))) => {
                if signals.send(envelope).is_err() {
                    break;
                }
            }
            Ok(Some(WorkerFrame::Welcome { name })) => {
                warn!(%name, "unexpected second welcome frame");
            }
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "failed reading from worker");
                break;
            }
        }
    }
    // Outstanding acknowledgements resolve as disconnected.
    lock(&pending).clear();
    debug!("frame reader finished");
}

fn lock(pending: &Pending) -> std::sync::MutexGuard<'_, HashMap<u64, Responder>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
