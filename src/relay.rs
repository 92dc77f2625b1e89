use std::{collections::HashMap, future::Future, net::SocketAddr};

use anyhow::Result;
use serde_json::{Map, Value};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::mpsc,
};
use tracing::{debug, info, warn};

use crate::{
    command::{ClientCommand, CommandError, Envelope, interpret},
    protocol::{FrameReader, write_frame},
};

type SessionId = u64;

/// Everything a session task tells the broadcaster. The queue gives a total
/// order across all sessions, and the broadcaster is the only task that ever
/// touches the registry or the shared document.
enum SessionEvent {
    Join {
        id: SessionId,
        addr: SocketAddr,
        writer: OwnedWriteHalf,
    },
    Command {
        id: SessionId,
        parsed: Result<ClientCommand, CommandError>,
    },
    Leave {
        id: SessionId,
    },
}

/// One registered client: display name plus the write half of its socket.
/// The name starts as the remote address until a connect or rename lands.
struct Session {
    name: String,
    writer: OwnedWriteHalf,
}

pub struct Relay {
    listener: TcpListener,
}

impl Relay {
    pub fn new(listener: TcpListener) -> Self {
        Self { listener }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the shutdown future resolves or an accept
    /// fails. An accept error is fatal to the whole service.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let (events, inbox) = mpsc::unbounded_channel();
        let broadcaster = tokio::spawn(broadcast_loop(inbox));
        tokio::pin!(shutdown);

        let mut next_id: SessionId = 0;
        let result = loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    break Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        next_id += 1;
                        spawn_session(next_id, stream, peer, events.clone());
                    }
                    Err(err) => {
                        warn!(error = ?err, "accept failed, stopping listener");
                        break Err(err.into());
                    }
                }
            }
        };

        // Dropping the broadcaster drops every registered write half, so
        // peers observe the shutdown as a closed connection.
        broadcaster.abort();
        let _ = broadcaster.await;
        result
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn spawn_session(
    id: SessionId,
    stream: TcpStream,
    peer: SocketAddr,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    tokio::spawn(async move {
        let (reader, writer) = stream.into_split();
        if events
            .send(SessionEvent::Join {
                id,
                addr: peer,
                writer,
            })
            .is_err()
        {
            return;
        }
        info!(%peer, id, "session opened");

        run_session(id, FrameReader::new(reader), &events).await;

        // Guaranteed on every exit path: exit command, EOF, decode or
        // transport error.
        let _ = events.send(SessionEvent::Leave { id });
        info!(%peer, id, "session closed");
    });
}

/// Per-connection read loop: decode one frame, validate it, queue it. The
/// loop ends on an exit command or the first decode/transport failure.
async fn run_session(
    id: SessionId,
    mut frames: FrameReader<OwnedReadHalf>,
    events: &mpsc::UnboundedSender<SessionEvent>,
) {
    loop {
        let frame: Map<String, Value> = match frames.read_frame().await {
            Ok(Some(frame)) => frame,
            // Peer closed without an exit command; nobody else is told.
            Ok(None) => return,
            Err(err) => {
                warn!(id, error = ?err, "dropping session on decode failure");
                return;
            }
        };

        let parsed = ClientCommand::from_frame(&frame);
        let terminate = matches!(parsed, Ok(ClientCommand::Exit { .. }));
        if events.send(SessionEvent::Command { id, parsed }).is_err() {
            return;
        }
        if terminate {
            return;
        }
    }
}

/// The serialized broadcaster: sole owner of the client registry and the
/// shared document. Draining one event at a time linearizes every broadcast
/// from any observer's point of view.
async fn broadcast_loop(mut inbox: mpsc::UnboundedReceiver<SessionEvent>) {
    let mut registry: HashMap<SessionId, Session> = HashMap::new();
    let mut document = String::new();

    while let Some(event) = inbox.recv().await {
        match event {
            SessionEvent::Join { id, addr, writer } => {
                registry.insert(
                    id,
                    Session {
                        name: addr.to_string(),
                        writer,
                    },
                );
            }
            SessionEvent::Command { id, parsed } => {
                // Already dropped after a transport error; the late Leave
                // from its session task is a no-op too.
                let Some(session) = registry.get_mut(&id) else {
                    continue;
                };
                let envelope = interpret(parsed, &mut session.name, &mut document);
                deliver(&mut registry, id, envelope).await;
            }
            SessionEvent::Leave { id } => {
                if registry.remove(&id).is_some() {
                    debug!(id, "session removed from registry");
                }
            }
        }
    }
}

/// Write one envelope out: the status response to the originator, then the
/// outgoing message to every other registered session. Sessions whose write
/// fails are dropped from the registry on the spot.
async fn deliver(registry: &mut HashMap<SessionId, Session>, origin: SessionId, envelope: Envelope) {
    if let Some(err) = &envelope.error {
        warn!(origin, error = %err, "rejected command");
    }

    let mut dead = Vec::new();
    if let Some(session) = registry.get_mut(&origin) {
        if let Err(err) = write_frame(&mut session.writer, &envelope.response).await {
            warn!(id = origin, error = ?err, "failed to write response");
            dead.push(origin);
        }
    }

    if let Some(outgoing) = &envelope.outgoing {
        let mut fanned_out = 0usize;
        for (&id, session) in registry.iter_mut() {
            if id == origin {
                continue;
            }
            match write_frame(&mut session.writer, outgoing).await {
                Ok(()) => fanned_out += 1,
                Err(err) => {
                    warn!(id, error = ?err, "failed to write broadcast");
                    dead.push(id);
                }
            }
        }
        debug!(origin, fanned_out, cmd = outgoing.cmd.as_str(), "fanned out");
    }

    for id in dead {
        if registry.remove(&id).is_some() {
            warn!(id, "dropped session after transport error");
        }
    }

    if envelope.terminate {
        // Closing the write half here ends the exchange immediately; the
        // session task's own Leave arrives later and finds nothing.
        registry.remove(&origin);
    }
}
