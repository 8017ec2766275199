use crate::directory::MemoryDirectory;
use crate::events::PartyEvent;
use crate::model::{RequestId, TrackRef, TrackRequest};
use crate::session::{Party, PartySnapshot};
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const HOST_POLL_INTERVAL: Duration = Duration::from_millis(12);
const PEER_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PartyAction {
    Enqueue { track: TrackRef, provider: String },
    NextSong,
    Top { request_id: RequestId },
    Delete { request_id: RequestId },
    SetLoopMode { enabled: bool },
    ToggleLoopMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Party(PartyEvent),
    Status(String),
}

pub fn apply_action(party: &Party, action: PartyAction, user_id: &str) {
    match action {
        PartyAction::Enqueue { track, provider } => {
            party.enqueue(TrackRequest::new(track, provider, user_id));
        }
        PartyAction::NextSong => {
            party.next_song(user_id);
        }
        PartyAction::Top { request_id } => {
            party.top_song(&request_id, user_id);
        }
        PartyAction::Delete { request_id } => {
            party.delete_song(&request_id, user_id);
        }
        PartyAction::SetLoopMode { enabled } => party.set_loop_mode(enabled),
        PartyAction::ToggleLoopMode => {
            party.toggle_loop_mode();
        }
    }
}

pub struct RelayServer {
    bind_addr: SocketAddr,
    cmd_tx: Sender<HostCommand>,
    thread: Option<JoinHandle<()>>,
}

impl RelayServer {
    pub fn start(
        bind_addr: &str,
        party: Arc<Party>,
        directory: Arc<MemoryDirectory>,
        events: Receiver<PartyEvent>,
        max_listeners: usize,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .with_context(|| format!("failed to bind party relay at {bind_addr}"))?;
        listener
            .set_nonblocking(true)
            .context("failed to set nonblocking listener")?;
        let local_addr = listener
            .local_addr()
            .context("failed to read relay bind address")?;

        let (cmd_tx, cmd_rx) = mpsc::channel();
        let host = Host {
            party,
            directory,
            max_listeners,
            peers: HashMap::new(),
        };
        let thread = thread::Builder::new()
            .name(String::from("party-relay"))
            .spawn(move || host_loop(listener, host, events, cmd_rx))
            .context("failed to spawn relay thread")?;

        tracing::info!(addr = %local_addr, max_listeners, "party relay listening");
        Ok(Self {
            bind_addr: local_addr,
            cmd_tx,
            thread: Some(thread),
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(HostCommand::Shutdown);
    }

    pub fn wait(mut self) {
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!("relay thread panicked");
        }
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

pub struct RelayClient {
    cmd_tx: Sender<ClientCommand>,
    event_rx: Receiver<RelayEvent>,
    welcome: PartySnapshot,
}

impl RelayClient {
    pub fn connect(server_addr: &str, user_id: &str, nickname: &str) -> anyhow::Result<Self> {
        let mut stream = TcpStream::connect(server_addr)
            .with_context(|| format!("failed to connect to {server_addr}"))?;
        stream
            .set_nodelay(true)
            .context("failed to enable TCP_NODELAY")?;

        send_json_line(
            &mut stream,
            &WireClientMessage::Hello {
                user_id: user_id.to_string(),
                nickname: nickname.to_string(),
            },
        )
        .context("failed to send hello")?;

        let mut reader = BufReader::new(
            stream
                .try_clone()
                .context("failed to clone client stream")?,
        );
        let mut line = String::new();
        let ack = read_wire::<WireServerMessage>(&mut reader, &mut line)
            .map_err(anyhow::Error::msg)
            .context("failed to read hello ack")?;
        let welcome = match ack {
            Some(WireServerMessage::HelloAck {
                accepted: true,
                welcome: Some(welcome),
                ..
            }) => welcome,
            Some(WireServerMessage::HelloAck {
                accepted: false,
                reason,
                ..
            }) => {
                anyhow::bail!(reason.unwrap_or_else(|| String::from("relay rejected connection")))
            }
            Some(_) => anyhow::bail!("invalid handshake response from relay"),
            None => anyhow::bail!("relay closed connection during handshake"),
        };

        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        thread::spawn(move || client_loop(stream, reader, cmd_rx, event_tx));

        Ok(Self {
            cmd_tx,
            event_rx,
            welcome,
        })
    }

    pub fn welcome(&self) -> &PartySnapshot {
        &self.welcome
    }

    pub fn send_action(&self, action: PartyAction) {
        let _ = self.cmd_tx.send(ClientCommand::Action(action));
    }

    pub fn try_recv_event(&self) -> Option<RelayEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<RelayEvent> {
        match self.event_rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Shutdown);
    }
}

fn client_loop(
    mut stream: TcpStream,
    mut reader: BufReader<TcpStream>,
    cmd_rx: Receiver<ClientCommand>,
    event_tx: Sender<RelayEvent>,
) {
    let read_event_tx = event_tx.clone();
    thread::spawn(move || {
        let mut line = String::new();
        loop {
            let event = match read_wire::<WireServerMessage>(&mut reader, &mut line) {
                Ok(Some(WireServerMessage::Event(event))) => RelayEvent::Party(event),
                Ok(Some(WireServerMessage::Status(message))) => RelayEvent::Status(message),
                Ok(Some(WireServerMessage::HelloAck { .. })) => continue,
                Ok(None) => {
                    let _ = read_event_tx.send(RelayEvent::Status(String::from(
                        "Disconnected from party relay",
                    )));
                    break;
                }
                Err(error) => {
                    let _ = read_event_tx.send(RelayEvent::Status(format!(
                        "Relay read failed: {error}"
                    )));
                    break;
                }
            };
            if read_event_tx.send(event).is_err() {
                break;
            }
        }
    });

    for command in cmd_rx {
        let ClientCommand::Action(action) = command else {
            break;
        };
        if let Err(err) = send_json_line(&mut stream, &WireClientMessage::Action(action)) {
            let _ = event_tx.send(RelayEvent::Status(format!("Relay send failed: {err}")));
            break;
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
}

struct Host {
    party: Arc<Party>,
    directory: Arc<MemoryDirectory>,
    max_listeners: usize,
    peers: HashMap<u32, PeerConnection>,
}

fn host_loop(
    listener: TcpListener,
    mut host: Host,
    events: Receiver<PartyEvent>,
    cmd_rx: Receiver<HostCommand>,
) {
    let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>();
    let mut next_peer_id: u32 = 1;

    loop {
        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    let peer_id = next_peer_id;
                    next_peer_id = next_peer_id.saturating_add(1);
                    tracing::debug!(peer_id, %addr, "listener connected");
                    let inbound_tx_clone = inbound_tx.clone();
                    thread::spawn(move || host_peer_reader(peer_id, stream, inbound_tx_clone));
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    tracing::warn!(error = %err, "relay accept failed");
                    break;
                }
            }
        }

        loop {
            match events.try_recv() {
                Ok(event) => broadcast(&mut host.peers, &WireServerMessage::Event(event)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::warn!("party event stream closed, stopping relay");
                    close_all(&mut host.peers);
                    return;
                }
            }
        }

        loop {
            match inbound_rx.try_recv() {
                Ok(inbound) => handle_inbound(inbound, &mut host),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        match cmd_rx.try_recv() {
            Ok(HostCommand::Shutdown) | Err(TryRecvError::Disconnected) => {
                broadcast(
                    &mut host.peers,
                    &WireServerMessage::Status(String::from("Party ended")),
                );
                close_all(&mut host.peers);
                tracing::info!("party relay stopped");
                return;
            }
            Err(TryRecvError::Empty) => {}
        }

        thread::sleep(HOST_POLL_INTERVAL);
    }
}

fn handle_inbound(inbound: Inbound, host: &mut Host) {
    match inbound {
        Inbound::Hello {
            peer_id,
            user_id,
            nickname,
            stream,
        } => {
            let mut writer = stream;
            if let Err(err) = writer.set_write_timeout(Some(PEER_WRITE_TIMEOUT)) {
                tracing::warn!(peer_id, error = %err, "failed to set listener write timeout");
                let _ = writer.shutdown(Shutdown::Both);
                return;
            }
            if host.peers.len().saturating_add(1) > host.max_listeners {
                let _ = send_json_line(
                    &mut writer,
                    &WireServerMessage::HelloAck {
                        accepted: false,
                        reason: Some(String::from("room is full")),
                        welcome: None,
                    },
                );
                let _ = writer.shutdown(Shutdown::Both);
                return;
            }

            host.directory.register(&user_id, &nickname);
            let welcome = host.party.snapshot();
            if send_json_line(
                &mut writer,
                &WireServerMessage::HelloAck {
                    accepted: true,
                    reason: None,
                    welcome: Some(welcome),
                },
            )
            .is_err()
            {
                return;
            }

            tracing::info!(peer_id, user_id = %user_id, nickname = %nickname, "listener joined");
            host.peers.insert(peer_id, PeerConnection { user_id, writer });
        }
        Inbound::Action { peer_id, action } => {
            let Some(user_id) = host.peers.get(&peer_id).map(|peer| peer.user_id.clone()) else {
                return;
            };
            tracing::debug!(peer_id, ?action, "listener action");
            apply_action(&host.party, action, &user_id);
        }
        Inbound::Disconnected { peer_id } => {
            if let Some(peer) = host.peers.remove(&peer_id) {
                tracing::info!(peer_id, user_id = %peer.user_id, "listener left");
            }
        }
        Inbound::ReadError { peer_id, error } => {
            host.peers.remove(&peer_id);
            tracing::warn!(peer_id, error = %error, "listener read error");
        }
    }
}

fn broadcast(peers: &mut HashMap<u32, PeerConnection>, message: &WireServerMessage) {
    let line = match encode_line(message) {
        Ok(line) => line,
        Err(err) => {
            tracing::warn!(error = %err, "failed to encode relay message");
            return;
        }
    };
    peers.retain(|peer_id, peer| match peer.writer.write_all(&line) {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(
                peer_id = *peer_id,
                user_id = %peer.user_id,
                error = %err,
                "dropping unresponsive listener"
            );
            let _ = peer.writer.shutdown(Shutdown::Both);
            false
        }
    });
}

fn close_all(peers: &mut HashMap<u32, PeerConnection>) {
    for (_, peer) in peers.drain() {
        let _ = peer.writer.shutdown(Shutdown::Both);
    }
}

fn host_peer_reader(peer_id: u32, stream: TcpStream, inbound_tx: Sender<Inbound>) {
    let last = match read_peer(peer_id, stream, &inbound_tx) {
        Ok(()) => Inbound::Disconnected { peer_id },
        Err(error) => Inbound::ReadError { peer_id, error },
    };
    let _ = inbound_tx.send(last);
}

// A peer must greet with Hello before any action is accepted.
fn read_peer(peer_id: u32, stream: TcpStream, inbound_tx: &Sender<Inbound>) -> Result<(), String> {
    let mut reader = BufReader::new(stream.try_clone().map_err(|err| err.to_string())?);
    let mut line = String::new();
    let (user_id, nickname) = match read_wire(&mut reader, &mut line)? {
        Some(WireClientMessage::Hello { user_id, nickname }) => (user_id, nickname),
        Some(WireClientMessage::Action(_)) => {
            return Err(String::from("action sent before hello"));
        }
        None => return Ok(()),
    };
    let hello = Inbound::Hello {
        peer_id,
        user_id,
        nickname,
        stream,
    };
    if inbound_tx.send(hello).is_err() {
        return Ok(());
    }

    while let Some(message) = read_wire(&mut reader, &mut line)? {
        if let WireClientMessage::Action(action) = message
            && inbound_tx.send(Inbound::Action { peer_id, action }).is_err()
        {
            break;
        }
    }
    Ok(())
}

fn read_wire<T: DeserializeOwned>(
    reader: &mut BufReader<TcpStream>,
    line: &mut String,
) -> Result<Option<T>, String> {
    line.clear();
    match reader.read_line(line) {
        Ok(0) => Ok(None),
        Ok(_) => serde_json::from_str(line.trim_end())
            .map(Some)
            .map_err(|err| format!("malformed line: {err}")),
        Err(err) => Err(err.to_string()),
    }
}

fn encode_line<T: Serialize>(value: &T) -> anyhow::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(value).context("serialize failed")?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn send_json_line<T: Serialize>(stream: &mut TcpStream, value: &T) -> anyhow::Result<()> {
    let line = encode_line(value)?;
    stream.write_all(&line).context("write failed")?;
    Ok(())
}

#[derive(Debug)]
enum HostCommand {
    Shutdown,
}

#[derive(Debug)]
enum ClientCommand {
    Action(PartyAction),
    Shutdown,
}

#[derive(Debug)]
struct PeerConnection {
    user_id: String,
    writer: TcpStream,
}

#[derive(Debug)]
enum Inbound {
    Hello {
        peer_id: u32,
        user_id: String,
        nickname: String,
        stream: TcpStream,
    },
    Action {
        peer_id: u32,
        action: PartyAction,
    },
    Disconnected {
        peer_id: u32,
    },
    ReadError {
        peer_id: u32,
        error: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum WireClientMessage {
    Hello { user_id: String, nickname: String },
    Action(PartyAction),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum WireServerMessage {
    HelloAck {
        accepted: bool,
        reason: Option<String>,
        welcome: Option<PartySnapshot>,
    },
    Event(PartyEvent),
    Status(String),
}
