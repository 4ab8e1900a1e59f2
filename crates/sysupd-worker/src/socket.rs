//! Unix-socket transport: exposes a worker link to local clients using the
//! newline-delimited frames of `sysupd_core::wire`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use sysupd_core::wire::{write_frame, ClientFrame, FrameReader, WorkerFrame};
use sysupd_core::{CallError, Caller, ClientLink, Inbound, SignalEnvelope};
use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

type Routes = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<WorkerFrame>>>>;

/// Accepts connections until the worker drops its signal sender.
///
/// Signals are routed to the connection whose assigned name equals the
/// envelope destination, so clients pass the name from `Welcome` as the
/// `Init` sender.
pub async fn serve(listener: UnixListener, link: ClientLink) -> Result<()> {
    let ClientLink { requests, signals } = link;
    let routes: Routes = Arc::default();
    let mut router = tokio::spawn(route_signals(signals, routes.clone()));
    let mut next_id = 1u64;

    loop {
        tokio::select! {
            _ = &mut router => {
                info!("worker finished, no longer accepting connections");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, _) = accepted.context("failed accepting connection")?;
                let name = format!("conn-{next_id}");
                next_id += 1;
                let caller = peer_caller(&stream, name);
                info!(%caller, "client connected");
                tokio::spawn(handle_connection(stream, caller, requests.clone(), routes.clone()));
            }
        }
    }
}

fn peer_caller(stream: &UnixStream, name: String) -> Caller {
    match stream.peer_cred() {
        Ok(cred) => Caller::with_uid(name, cred.uid()),
        Err(err) => {
            warn!(error = %err, "failed reading peer credentials");
            Caller::new(name)
        }
    }
}

async fn route_signals(mut signals: mpsc::UnboundedReceiver<SignalEnvelope>, routes: Routes) {
    while let Some(envelope) = signals.recv().await {
        let route = lock(&routes).get(&envelope.destination).cloned();
        match route {
            Some(frames) => {
                let _ = frames.send(WorkerFrame::Signal(envelope));
            }
            None => debug!(destination = %envelope.destination, "no route for signal"),
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    caller: Caller,
    requests: mpsc::Sender<Inbound>,
    routes: Routes,
) {
    let (read_half, write_half) = stream.into_split();
    let (frames, outgoing) = mpsc::unbounded_channel();
    let _ = frames.send(WorkerFrame::Welcome {
        name: caller.name.clone(),
    });
    lock(&routes).insert(caller.name.clone(), frames.clone());

    tokio::spawn(write_frames(write_half, outgoing, caller.name.clone()));
    if let Err(err) = read_frames(read_half, &caller, &requests, &frames).await {
        warn!(%caller, error = %err, "connection failed");
    }

    lock(&routes).remove(&caller.name);
    drop(frames);
    let _ = requests
        .send(Inbound::Disconnected {
            caller: caller.clone(),
        })
        .await;
    info!(%caller, "client disconnected");
}

async fn read_frames(
    read_half: OwnedReadHalf,
    caller: &Caller,
    requests: &mpsc::Sender<Inbound>,
    frames: &mpsc::UnboundedSender<WorkerFrame>,
) -> Result<()> {
    let mut reader = FrameReader::new(BufReader::new(read_half), caller.name.clone());
    while let Some(frame) = reader.next::<ClientFrame>().await? {
        let (reply, ack) = oneshot::channel();
        let (serial, inbound) = match frame {
            ClientFrame::Call { serial, call } => (
                serial,
                Inbound::Call {
                    caller: caller.clone(),
                    call,
                    reply,
                },
            ),
            ClientFrame::Answer { serial, code } => (
                serial,
                Inbound::Answer {
                    caller: caller.clone(),
                    code,
                    reply,
                },
            ),
        };

        if requests.send(inbound).await.is_err() {
            let _ = frames.send(WorkerFrame::Reply {
                serial,
                result: Err(CallError::Disconnected),
            });
            continue;
        }

        // The worker may hold the ack until a running method returns.
        let frames = frames.clone();
        tokio::spawn(async move {
            let result = ack.await.unwrap_or(Err(CallError::Disconnected));
            let _ = frames.send(WorkerFrame::Reply { serial, result });
        });
    }
    Ok(())
}

async fn write_frames(
    mut write_half: OwnedWriteHalf,
    mut outgoing: mpsc::UnboundedReceiver<WorkerFrame>,
    peer: String,
) {
    while let Some(frame) = outgoing.recv().await {
        if let Err(err) = write_frame(&mut write_half, &frame).await {
            debug!(%peer, error = %err, "failed writing frame");
            break;
        }
    }
}

fn lock(
    routes: &Routes,
) -> std::sync::MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<WorkerFrame>>> {
    routes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
