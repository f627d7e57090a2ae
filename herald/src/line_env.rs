//! Line-protocol environment
//!
//! A thin adapter that speaks one text line per message over any byte
//! stream (TCP in production). The remote side pushes world state; queries
//! are answered from the local mirror of it. Actions are sent with a request
//! id and complete when the remote side answers `done <id>` or
//! `fail <id> <reason>`.
//!
//! Inbound:
//!
//! ```text
//! login <name>                 authenticated as <name>
//! spawn                        joined the world
//! chat <actor> <text...>
//! pos <x> <y> <z>              own position
//! player <name> [<x> <y> <z>]  player listed (position if in range)
//! player_gone <name>
//! cursor <kind> <x> <y> <z>    block under the cursor
//! cursor_none
//! block <kind> <x> <y> <z>     known block; kind `air` forgets it
//! kinds <kind...>              block kinds the world knows
//! done <id>
//! fail <id> <reason...>
//! kicked <reason...>
//! error <message...>
//! ```
//!
//! Outbound: `hello <username>`, `chat <text>` and
//! `act <id> <verb> <args...>` with verbs `dig`, `activate`, `look`, `goto`,
//! `step`, `stop` and `swing`.

use async_trait::async_trait;
use herald_api::{
    BlockLookup, Environment, EnvironmentError, EnvironmentEvent, Goal, Hand, InteractionTarget,
    PlayerInfo, Position,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

/// Capacity of the inbound event channel
pub const EVENT_BUFFER: usize = 256;

/// Errors of the line protocol
#[derive(Debug, Error)]
pub enum LineError {
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed line '{line}': {reason}")]
    Malformed { line: String, reason: String },
}

/// One parsed inbound line
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Login(String),
    Spawn,
    Chat { actor: String, text: String },
    Position(Position),
    Player(PlayerInfo),
    PlayerGone(String),
    Cursor(InteractionTarget),
    CursorNone,
    Block(InteractionTarget),
    Kinds(Vec<String>),
    Done(u64),
    Fail { id: u64, reason: String },
    Kicked(String),
    Error(String),
}

fn position(words: &[&str]) -> Option<Position> {
    match words {
        [x, y, z] => Some(Position::new(
            x.parse().ok()?,
            y.parse().ok()?,
            z.parse().ok()?,
        )),
        _ => None,
    }
}

/// Parse one inbound line
pub fn parse_line(line: &str) -> Result<Inbound, LineError> {
    let line = line.trim();
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let words: Vec<&str> = rest.split_whitespace().collect();
    let malformed = |reason: &str| LineError::Malformed {
        line: line.to_string(),
        reason: reason.to_string(),
    };

    let target = |words: &[&str]| match words {
        [kind, coords @ ..] => {
            position(coords).map(|pos| InteractionTarget::new(kind.to_string(), pos))
        }
        _ => None,
    };

    match verb {
        "login" => match words.as_slice() {
            [name] => Ok(Inbound::Login(name.to_string())),
            _ => Err(malformed("expected a name")),
        },
        "spawn" => Ok(Inbound::Spawn),
        "chat" => {
            let (actor, text) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| malformed("expected an actor and text"))?;
            Ok(Inbound::Chat {
                actor: actor.to_string(),
                text: text.trim_start().to_string(),
            })
        }
        "pos" => position(&words)
            .map(Inbound::Position)
            .ok_or_else(|| malformed("expected x y z")),
        "player" => match words.as_slice() {
            [name] => Ok(Inbound::Player(PlayerInfo {
                name: name.to_string(),
                position: None,
            })),
            [name, coords @ ..] => position(coords)
                .map(|pos| {
                    Inbound::Player(PlayerInfo {
                        name: name.to_string(),
                        position: Some(pos),
                    })
                })
                .ok_or_else(|| malformed("expected name [x y z]")),
            [] => Err(malformed("expected a name")),
        },
        "player_gone" => match words.as_slice() {
            [name] => Ok(Inbound::PlayerGone(name.to_string())),
            _ => Err(malformed("expected a name")),
        },
        "cursor" => target(&words)
            .map(Inbound::Cursor)
            .ok_or_else(|| malformed("expected kind x y z")),
        "cursor_none" => Ok(Inbound::CursorNone),
        "block" => target(&words)
            .map(Inbound::Block)
            .ok_or_else(|| malformed("expected kind x y z")),
        "kinds" => Ok(Inbound::Kinds(
            words.iter().map(|w| w.to_string()).collect(),
        )),
        "done" => match words.as_slice() {
            [id] => id
                .parse()
                .map(Inbound::Done)
                .map_err(|_| malformed("expected a numeric id")),
            _ => Err(malformed("expected an id")),
        },
        "fail" => {
            let (id, reason) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let id = id.parse().map_err(|_| malformed("expected a numeric id"))?;
            Ok(Inbound::Fail {
                id,
                reason: reason.trim().to_string(),
            })
        }
        "kicked" => Ok(Inbound::Kicked(rest.to_string())),
        "error" => Ok(Inbound::Error(rest.to_string())),
        "" => Err(malformed("empty line")),
        other => Err(malformed(&format!("unknown verb '{}'", other))),
    }
}

type PendingReply = oneshot::Sender<Result<(), EnvironmentError>>;

#[derive(Debug, Default)]
struct Mirror {
    username: String,
    position: Option<Position>,
    players: HashMap<String, PlayerInfo>,
    cursor: Option<InteractionTarget>,
    blocks: Vec<InteractionTarget>,
    known_kinds: Option<HashSet<String>>,
}

/// State shared between the environment handle and the reader task
struct Shared {
    mirror: Mutex<Mirror>,
    pending: Mutex<HashMap<u64, (&'static str, PendingReply)>>,
    connected: AtomicBool,
}

impl Shared {
    /// Fold one line into the mirror; returns the event it raises, if any
    fn apply(&self, inbound: Inbound) -> Option<EnvironmentEvent> {
        let mut mirror = self.mirror.lock().unwrap();
        match inbound {
            Inbound::Login(name) => {
                mirror.username = name;
                return Some(EnvironmentEvent::Connected);
            }
            Inbound::Spawn => return Some(EnvironmentEvent::Joined),
            Inbound::Chat { actor, text } => return Some(EnvironmentEvent::Chat { actor, text }),
            Inbound::Position(pos) => mirror.position = Some(pos),
            Inbound::Player(info) => {
                mirror.players.insert(info.name.clone(), info);
            }
            Inbound::PlayerGone(name) => {
                mirror.players.remove(&name);
            }
            Inbound::Cursor(target) => mirror.cursor = Some(target),
            Inbound::CursorNone => mirror.cursor = None,
            Inbound::Block(block) => {
                mirror.blocks.retain(|b| b.position != block.position);
                if block.kind != "air" {
                    mirror.blocks.push(block);
                }
            }
            Inbound::Kinds(kinds) => mirror.known_kinds = Some(kinds.into_iter().collect()),
            Inbound::Done(id) => self.resolve(id, None),
            Inbound::Fail { id, reason } => self.resolve(id, Some(reason)),
            Inbound::Kicked(reason) => return Some(EnvironmentEvent::Kicked { reason }),
            Inbound::Error(message) => return Some(EnvironmentEvent::Fault { message }),
        }
        None
    }

    fn resolve(&self, id: u64, failure: Option<String>) {
        let Some((action, reply)) = self.pending.lock().unwrap().remove(&id) else {
            tracing::warn!(id, "Reply for unknown action");
            return;
        };
        let result = match failure {
            None => Ok(()),
            Some(reason) => Err(EnvironmentError::Rejected { action, reason }),
        };
        let _ = reply.send(result);
    }

    /// Mark the connection closed and fail every outstanding action
    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        for (_, (_, reply)) in self.pending.lock().unwrap().drain() {
            let _ = reply.send(Err(EnvironmentError::Disconnected));
        }
    }
}

/// [`Environment`] backed by a line-protocol stream
pub struct LineEnvironment {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<String>,
    next_id: AtomicU64,
}

impl LineEnvironment {
    /// Connect over TCP and greet the remote side as `username`
    pub async fn connect(
        address: &str,
        username: &str,
    ) -> Result<(Arc<Self>, mpsc::Receiver<EnvironmentEvent>), LineError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| LineError::Connect {
                address: address.to_string(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Could not set TCP_NODELAY");
        }
        tracing::info!(address = %address, "Connected");
        let (reader, writer) = stream.into_split();
        Ok(Self::spawn(reader, writer, username))
    }

    /// Drive the protocol over an already open stream
    ///
    /// Must be called inside a tokio runtime. Events arrive on the returned
    /// receiver in stream order; the last one is always `Disconnected`.
    pub fn spawn<R, W>(
        reader: R,
        writer: W,
        username: &str,
    ) -> (Arc<Self>, mpsc::Receiver<EnvironmentEvent>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared {
            mirror: Mutex::new(Mirror {
                username: username.to_string(),
                ..Mirror::default()
            }),
            pending: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::channel(EVENT_BUFFER);

        let _ = outbound.send(format!("hello {}", username));
        tokio::spawn(write_loop(writer, outbound_rx));
        tokio::spawn(read_loop(reader, shared.clone(), events));

        let env = Arc::new(Self {
            shared,
            outbound,
            next_id: AtomicU64::new(1),
        });
        (env, events_rx)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn act(&self, verb: &'static str, args: String) -> Result<(), EnvironmentError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply, response) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock().unwrap();
            if !self.is_connected() {
                return Err(EnvironmentError::Disconnected);
            }
            pending.insert(id, (verb, reply));
        }

        let line = if args.is_empty() {
            format!("act {} {}", id, verb)
        } else {
            format!("act {} {} {}", id, verb, args)
        };
        tracing::debug!(id, verb, "Sending action");
        if self.outbound.send(line).is_err() {
            self.shared.pending.lock().unwrap().remove(&id);
            return Err(EnvironmentError::Disconnected);
        }

        response.await.unwrap_or(Err(EnvironmentError::Disconnected))
    }
}

impl std::fmt::Debug for LineEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineEnvironment")
            .field("username", &self.username())
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn coords(p: Position) -> String {
    format!("{} {} {}", p.x, p.y, p.z)
}

#[async_trait]
impl Environment for LineEnvironment {
    fn username(&self) -> String {
        self.shared.mirror.lock().unwrap().username.clone()
    }

    fn send_message(&self, text: &str) {
        let text = text.replace(['\r', '\n'], " ");
        if self.outbound.send(format!("chat {}", text)).is_err() {
            tracing::debug!("Dropping chat line, connection closed");
        }
    }

    fn position(&self) -> Option<Position> {
        self.shared.mirror.lock().unwrap().position
    }

    fn player(&self, name: &str) -> Option<PlayerInfo> {
        self.shared.mirror.lock().unwrap().players.get(name).cloned()
    }

    fn find_interaction_target(&self, max_distance: f64) -> Option<InteractionTarget> {
        let mirror = self.shared.mirror.lock().unwrap();
        let cursor = mirror.cursor.clone()?;
        match mirror.position {
            Some(own) if own.distance_to(&cursor.position) > max_distance => None,
            _ => Some(cursor),
        }
    }

    fn find_block(&self, kind: &str, max_distance: f64) -> BlockLookup {
        let mirror = self.shared.mirror.lock().unwrap();
        if let Some(known) = &mirror.known_kinds {
            if !known.contains(kind) {
                return BlockLookup::UnknownKind;
            }
        }
        let own = mirror.position.unwrap_or_default();
        mirror
            .blocks
            .iter()
            .filter(|b| b.kind == kind && own.distance_to(&b.position) <= max_distance)
            .min_by(|a, b| {
                own.distance_to(&a.position)
                    .total_cmp(&own.distance_to(&b.position))
            })
            .cloned()
            .map(BlockLookup::Found)
            .unwrap_or(BlockLookup::NotFound)
    }

    async fn perform_primary_interaction(
        &self,
        target: &InteractionTarget,
    ) -> Result<(), EnvironmentError> {
        self.act("dig", coords(target.position)).await
    }

    async fn perform_secondary_interaction(
        &self,
        target: &InteractionTarget,
    ) -> Result<(), EnvironmentError> {
        self.act("activate", coords(target.position)).await
    }

    async fn orient_toward(&self, position: Position) -> Result<(), EnvironmentError> {
        self.act("look", coords(position)).await
    }

    async fn navigate(&self, goal: Goal) -> Result<(), EnvironmentError> {
        self.act("goto", format!("{} {}", coords(goal.position), goal.range))
            .await
    }

    async fn step_toward(&self, goal: Goal) -> Result<(), EnvironmentError> {
        self.act("step", format!("{} {}", coords(goal.position), goal.range))
            .await
    }

    async fn stop_navigation(&self) -> Result<(), EnvironmentError> {
        self.act("stop", String::new()).await
    }

    async fn swing_arm(&self, hand: Hand) -> Result<(), EnvironmentError> {
        self.act("swing", hand.to_string()).await
    }
}

async fn read_loop<R>(reader: R, shared: Arc<Shared>, events: mpsc::Sender<EnvironmentEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let event = match parse_line(&line) {
                    Ok(inbound) => shared.apply(inbound),
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring malformed line");
                        Some(EnvironmentEvent::Fault {
                            message: e.to_string(),
                        })
                    }
                };
                if let Some(event) = event {
                    if events.send(event).await.is_err() {
                        break "event receiver dropped".to_string();
                    }
                }
            }
            Ok(None) => break "end of stream".to_string(),
            Err(e) => {
                let _ = events
                    .send(EnvironmentEvent::Fault {
                        message: e.to_string(),
                    })
                    .await;
                break format!("read error: {}", e);
            }
        }
    };

    tracing::debug!(reason = %reason, "Reader finished");
    shared.disconnect();
    let _ = events.send(EnvironmentEvent::Disconnected { reason }).await;
}

async fn write_loop<W>(mut writer: W, mut outbound: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outbound.recv().await {
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::warn!(error = %e, "Write failed, closing writer");
            break;
        }
    }
}
