use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::NetConfig;
use crate::error::NetError;
use crate::net::{
    ChannelFault, ChannelSettings, ControlMessage, Datagram, DatagramSocket, MAX_DATAGRAM_SIZE,
    MessageChannel, NetworkStats, PROTOCOL_VERSION, RejectReason, Reliability, classify,
    is_transient, sequence_greater_than,
};
use crate::snapshot::{InterpolatedEntity, PlayoutBuffer, SnapshotHistory, apply_delta};

use super::messages::ServerMessage;

/// Why a client session ended up disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientDisconnectReason {
    UserDisconnect,
    HandshakeTimeout,
    ServerTimeout,
    Rejected(RejectReason),
    Kicked,
    RetriesExhausted,
}

impl ClientDisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientDisconnectReason::UserDisconnect => "disconnected",
            ClientDisconnectReason::HandshakeTimeout => "handshake timed out",
            ClientDisconnectReason::ServerTimeout => "server timed out",
            ClientDisconnectReason::Rejected(reason) => reason.as_str(),
            ClientDisconnectReason::Kicked => "kicked by server",
            ClientDisconnectReason::RetriesExhausted => "reliable retries exhausted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected { slot: u16 },
    Snapshot { tick: u32 },
    Event(Vec<u8>),
    Disconnected(ClientDisconnectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStateKind {
    Disconnected,
    Challenging,
    Connecting,
    Spawned,
}

impl ClientStateKind {
    pub fn can_transition_to(self, to: ClientStateKind) -> bool {
        use ClientStateKind::*;
        matches!(
            (self, to),
            (Disconnected, Challenging)
                | (Disconnected, Disconnected)
                | (Challenging, Connecting)
                | (Challenging, Disconnected)
                | (Connecting, Spawned)
                | (Connecting, Disconnected)
                | (Spawned, Disconnected)
        )
    }
}

/// Retry bookkeeping for the connect request.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub nonce: u64,
    pub client_sequence: u32,
    /// Last time the handshake made progress.
    pub started: Instant,
    pub next_send: Instant,
    pub attempts: u32,
}

impl Handshake {
    fn restart(&mut self, now: Instant) {
        self.started = now;
        self.next_send = now;
        self.attempts = 0;
    }
}

#[derive(Debug)]
pub struct Spawned {
    pub server: SocketAddr,
    pub slot: u16,
    pub tick_rate: u32,
    channel: MessageChannel,
    received: SnapshotHistory,
    latest_tick: Option<u32>,
}

#[derive(Debug)]
pub enum ClientState {
    Disconnected {
        reason: Option<ClientDisconnectReason>,
    },
    Challenging {
        server: SocketAddr,
        handshake: Handshake,
    },
    Connecting {
        server: SocketAddr,
        token: u64,
        handshake: Handshake,
    },
    Spawned(Box<Spawned>),
}

impl ClientState {
    pub fn kind(&self) -> ClientStateKind {
        match self {
            ClientState::Disconnected { .. } => ClientStateKind::Disconnected,
            ClientState::Challenging { .. } => ClientStateKind::Challenging,
            ClientState::Connecting { .. } => ClientStateKind::Connecting,
            ClientState::Spawned(_) => ClientStateKind::Spawned,
        }
    }

    /// Replaces the state if the edge is allowed.
    pub fn transition(&mut self, next: ClientState) -> Result<(), NetError> {
        let (from, to) = (self.kind(), next.kind());
        if !from.can_transition_to(to) {
            return Err(NetError::InvalidTransition { from, to });
        }
        log::debug!("Client state {:?} -> {:?}", from, to);
        *self = next;
        Ok(())
    }

    pub fn server(&self) -> Option<SocketAddr> {
        match self {
            ClientState::Disconnected { .. } => None,
            ClientState::Challenging { server, .. } | ClientState::Connecting { server, .. } => {
                Some(*server)
            }
            ClientState::Spawned(spawned) => Some(spawned.server),
        }
    }
}

enum HandshakeStep {
    Idle,
    Send(SocketAddr, ControlMessage),
    GiveUp,
}

/// The local end of one connection to a server.
pub struct ClientSession<S: DatagramSocket> {
    socket: S,
    config: NetConfig,
    settings: ChannelSettings,
    state: ClientState,
    playout: PlayoutBuffer,
    rng: StdRng,
    events: VecDeque<ClientEvent>,
    stats: NetworkStats,
    /// Snapshots dropped because their baseline was never applied here.
    baseline_misses: u64,
    recv_buf: Vec<u8>,
}

impl<S: DatagramSocket> ClientSession<S> {
    pub fn new(socket: S, config: NetConfig) -> Self {
        Self::with_rng(socket, config, StdRng::from_os_rng())
    }

    pub fn with_seed(socket: S, config: NetConfig, seed: u64) -> Self {
        Self::with_rng(socket, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(socket: S, config: NetConfig, rng: StdRng) -> Self {
        let playout = PlayoutBuffer::new(
            config.playout_capacity,
            config.tick_duration(),
            config.playout_delay(),
        );
        Self {
            socket,
            settings: ChannelSettings::from(&config),
            state: ClientState::Disconnected { reason: None },
            playout,
            rng,
            events: VecDeque::new(),
            stats: NetworkStats::default(),
            baseline_misses: 0,
            recv_buf: vec![0; MAX_DATAGRAM_SIZE],
            config,
        }
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn state_kind(&self) -> ClientStateKind {
        self.state.kind()
    }

    pub fn is_spawned(&self) -> bool {
        matches!(self.state, ClientState::Spawned(_))
    }

    pub fn slot(&self) -> Option<u16> {
        match &self.state {
            ClientState::Spawned(spawned) => Some(spawned.slot),
            _ => None,
        }
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.state.server()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn playout(&self) -> &PlayoutBuffer {
        &self.playout
    }

    /// Interpolated entities for presentation at `now`.
    pub fn sample(&mut self, now: Instant) -> Vec<InterpolatedEntity> {
        self.playout.sample(now)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.events.drain(..)
    }

    pub fn stats(&self, now: Instant) -> NetworkStats {
        let mut stats = self.stats.clone();
        if let ClientState::Spawned(spawned) = &self.state {
            stats.accumulate(&spawned.channel.stats(now));
        }
        stats
    }

    pub fn baseline_misses(&self) -> u64 {
        self.baseline_misses
    }

    /// Starts the handshake with `server`. The first request goes out now.
    ///
    /// If that request cannot be sent the session stays disconnected, so
    /// the call may simply be retried.
    pub fn connect(&mut self, server: SocketAddr, now: Instant) -> Result<(), NetError> {
        let previous = match &self.state {
            ClientState::Disconnected { reason } => *reason,
            _ => None,
        };
        let handshake = Handshake {
            nonce: self.rng.random(),
            client_sequence: self.rng.random(),
            started: now,
            next_send: now,
            attempts: 0,
        };
        self.state
            .transition(ClientState::Challenging { server, handshake })?;
        self.playout.clear();
        log::info!("Connecting to {}", server);

        if let Err(e) = self.handshake_step(now) {
            log::warn!("Connect request to {} failed: {}", server, e);
            self.state = ClientState::Disconnected { reason: previous };
            return Err(e);
        }
        Ok(())
    }

    /// Drops the connection immediately, telling the server if it knows us.
    /// The local state is discarded even when the notice cannot be sent.
    pub fn disconnect(&mut self, _now: Instant) -> Result<(), NetError> {
        let notice = match self.state.server() {
            Some(server) => self.send_control(server, &ControlMessage::Disconnect),
            None => Ok(()),
        };
        self.finish(ClientDisconnectReason::UserDisconnect);
        notice
    }

    pub fn send(&mut self, payload: Vec<u8>, reliability: Reliability) -> Result<(), NetError> {
        match &mut self.state {
            ClientState::Spawned(spawned) => spawned.channel.send(payload, reliability),
            _ => Err(NetError::NotConnected),
        }
    }

    /// One network step: drain the socket, then run handshake and channel
    /// timers against `now`.
    pub fn update(&mut self, now: Instant) -> Result<(), NetError> {
        self.receive_all(now)?;

        let fault = match &mut self.state {
            ClientState::Disconnected { .. } => return Ok(()),
            ClientState::Challenging { .. } | ClientState::Connecting { .. } => {
                return self.handshake_step(now);
            }
            ClientState::Spawned(spawned) => spawned.channel.poll_fault(now),
        };

        match fault {
            Some(ChannelFault::TimedOut) => self.finish(ClientDisconnectReason::ServerTimeout),
            Some(ChannelFault::RetriesExhausted) => {
                self.finish(ClientDisconnectReason::RetriesExhausted)
            }
            None => {
                if let ClientState::Spawned(spawned) = &mut self.state {
                    spawned.channel.flush(&mut self.socket, now)?;
                }
            }
        }
        Ok(())
    }

    fn retry_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.config.handshake_backoff.max(1.0).powi(exponent);
        self.config.handshake_retry().mul_f32(factor)
    }

    fn handshake_step(&mut self, now: Instant) -> Result<(), NetError> {
        let timeout = self.config.handshake_timeout();
        let max_retries = self.config.handshake_max_retries;
        let max_rate = self.config.client_max_rate;

        let step = {
            let (server, challenge, handshake) = match &mut self.state {
                ClientState::Challenging { server, handshake } => (*server, None, handshake),
                ClientState::Connecting {
                    server,
                    token,
                    handshake,
                } => (*server, Some(*token), handshake),
                _ => return Ok(()),
            };

            if now.saturating_duration_since(handshake.started) >= timeout {
                HandshakeStep::GiveUp
            } else if now < handshake.next_send {
                HandshakeStep::Idle
            } else if handshake.attempts >= max_retries {
                HandshakeStep::GiveUp
            } else {
                handshake.attempts += 1;
                let request = ControlMessage::ConnectRequest {
                    protocol_version: PROTOCOL_VERSION,
                    client_nonce: handshake.nonce,
                    client_sequence: handshake.client_sequence,
                    max_rate,
                    challenge,
                };
                HandshakeStep::Send(server, request)
            }
        };

        match step {
            HandshakeStep::Idle => Ok(()),
            HandshakeStep::GiveUp => {
                log::warn!("Handshake gave up");
                self.finish(ClientDisconnectReason::HandshakeTimeout);
                Ok(())
            }
            HandshakeStep::Send(server, request) => {
                let attempts = self.handshake_attempts();
                let delay = self.retry_delay(attempts);
                if let ClientState::Challenging { handshake, .. }
                | ClientState::Connecting { handshake, .. } = &mut self.state
                {
                    handshake.next_send = now + delay;
                }
                log::debug!("Connect request #{} to {}", attempts, server);
                self.send_control(server, &request)
            }
        }
    }

    fn handshake_attempts(&self) -> u32 {
        match &self.state {
            ClientState::Challenging { handshake, .. }
            | ClientState::Connecting { handshake, .. } => handshake.attempts,
            _ => 0,
        }
    }

    fn send_control(&mut self, to: SocketAddr, message: &ControlMessage) -> Result<(), NetError> {
        let data = message.encode()?;
        match self.socket.send_to(&data, to) {
            Ok(_) => Ok(()),
            Err(e) if is_transient(&e) => Ok(()),
            Err(e) => Err(NetError::NetworkDown(e)),
        }
    }

    fn finish(&mut self, reason: ClientDisconnectReason) {
        let next = ClientState::Disconnected {
            reason: Some(reason),
        };
        // Every state may fall back to Disconnected.
        if self.state.transition(next).is_ok() {
            log::info!("Disconnected: {}", reason.as_str());
            self.playout.clear();
            self.events.push_back(ClientEvent::Disconnected(reason));
        }
    }

    fn receive_all(&mut self, now: Instant) -> Result<(), NetError> {
        let mut buf = std::mem::take(&mut self.recv_buf);
        let result = loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok(Some((len, from))) => {
                    if let Err(e) = self.handle_datagram(from, &buf[..len], now) {
                        break Err(e);
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) if is_transient(&e) => break Ok(()),
                Err(e) => {
                    log::warn!("Client socket failed: {}", e);
                    break Err(NetError::NetworkDown(e));
                }
            }
        };
        self.recv_buf = buf;
        result
    }

    fn handle_datagram(
        &mut self,
        from: SocketAddr,
        data: &[u8],
        now: Instant,
    ) -> Result<(), NetError> {
        if self.state.server() != Some(from) {
            return Ok(());
        }

        let datagram = match classify(data) {
            Ok(datagram) => datagram,
            Err(e) => {
                log::debug!("Dropping datagram from {}: {}", from, e);
                self.stats.malformed_dropped += 1;
                return Ok(());
            }
        };

        match datagram {
            Datagram::Control(message) => self.handle_control(from, message, now),
            Datagram::Channel { header, payload } => {
                let ClientState::Spawned(spawned) = &mut self.state else {
                    return Ok(());
                };
                spawned.channel.process(&header, payload, now);
                let messages: Vec<Vec<u8>> = std::iter::from_fn(|| spawned.channel.receive())
                    .map(|message| message.payload)
                    .collect();
                for payload in messages {
                    self.handle_server_message(&payload, now);
                }
                Ok(())
            }
            Datagram::InfoRequest(_) | Datagram::InfoResponse(_) => Ok(()),
        }
    }

    fn handle_control(
        &mut self,
        server: SocketAddr,
        message: ControlMessage,
        now: Instant,
    ) -> Result<(), NetError> {
        match (message, self.state.kind()) {
            (ControlMessage::Challenge { token }, ClientStateKind::Challenging) => {
                let handshake = match &self.state {
                    ClientState::Challenging { handshake, .. } => {
                        let mut handshake = handshake.clone();
                        handshake.restart(now);
                        handshake
                    }
                    _ => return Ok(()),
                };
                self.state.transition(ClientState::Connecting {
                    server,
                    token,
                    handshake,
                })?;
                self.handshake_step(now)
            }
            (ControlMessage::Challenge { token }, ClientStateKind::Connecting) => {
                // A retried request earned a fresh token; the old one is void.
                if let ClientState::Connecting {
                    token: current,
                    handshake,
                    ..
                } = &mut self.state
                    && *current != token
                {
                    *current = token;
                    handshake.next_send = now;
                }
                self.handshake_step(now)
            }
            (
                ControlMessage::ConnectResponse {
                    slot,
                    server_sequence,
                    tick_rate,
                },
                ClientStateKind::Connecting,
            ) => {
                let client_sequence = match &self.state {
                    ClientState::Connecting { handshake, .. } => handshake.client_sequence,
                    _ => return Ok(()),
                };
                let channel = MessageChannel::connect(
                    server,
                    self.settings.clone(),
                    client_sequence,
                    server_sequence,
                    now,
                );
                let spawned = Spawned {
                    server,
                    slot,
                    tick_rate,
                    channel,
                    received: SnapshotHistory::new(self.config.snapshot_history),
                    latest_tick: None,
                };
                self.state.transition(ClientState::Spawned(Box::new(spawned)))?;
                if tick_rate > 0 {
                    self.playout
                        .set_tick_duration(Duration::from_secs_f64(1.0 / tick_rate as f64));
                }
                log::info!("Spawned in slot {} on {}", slot, server);
                self.events.push_back(ClientEvent::Connected { slot });
                Ok(())
            }
            (
                ControlMessage::Reject { reason },
                ClientStateKind::Challenging | ClientStateKind::Connecting,
            ) => {
                log::warn!("Connection rejected: {}", reason.as_str());
                self.finish(ClientDisconnectReason::Rejected(reason));
                Ok(())
            }
            (
                ControlMessage::Disconnect,
                ClientStateKind::Connecting | ClientStateKind::Spawned,
            ) => {
                self.finish(ClientDisconnectReason::Kicked);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn handle_server_message(&mut self, payload: &[u8], now: Instant) {
        let message = match ServerMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("Bad server message: {}", e);
                self.stats.malformed_dropped += 1;
                return;
            }
        };

        match message {
            ServerMessage::Event(data) => self.events.push_back(ClientEvent::Event(data)),
            ServerMessage::Snapshot {
                tick,
                baseline,
                delta,
            } => self.apply_snapshot(tick, baseline, &delta, now),
        }
    }

    fn apply_snapshot(&mut self, tick: u32, baseline: Option<u32>, delta: &[u8], now: Instant) {
        let ClientState::Spawned(spawned) = &mut self.state else {
            return;
        };
        if spawned
            .latest_tick
            .is_some_and(|latest| !sequence_greater_than(tick, latest))
        {
            log::debug!("Dropping stale snapshot {}", tick);
            return;
        }

        let base = match baseline {
            None => None,
            Some(base_tick) => match spawned.received.get(base_tick) {
                Some(state) => Some(state),
                None => {
                    log::debug!("Snapshot {} has unknown baseline {}", tick, base_tick);
                    self.baseline_misses += 1;
                    return;
                }
            },
        };

        match apply_delta(base, tick, delta) {
            Ok(state) => {
                spawned.latest_tick = Some(tick);
                spawned.received.push(state.clone());
                self.playout.push(state, now);
                self.events.push_back(ClientEvent::Snapshot { tick });
            }
            Err(e) => {
                log::debug!("Snapshot {} failed to apply: {}", tick, e);
                self.stats.malformed_dropped += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{NetworkSimulator, SimulatedSocket};

    fn client() -> (ClientSession<SimulatedSocket>, SimulatedSocket, Instant) {
        let start = Instant::now();
        let network = NetworkSimulator::shared(3, start);
        let socket = NetworkSimulator::bind(&network, "10.0.0.2:5000".parse().unwrap());
        let server = NetworkSimulator::bind(&network, "10.0.0.1:27015".parse().unwrap());
        (ClientSession::with_seed(socket, NetConfig::default(), 4), server, start)
    }

    fn server_addr() -> SocketAddr {
        "10.0.0.1:27015".parse().unwrap()
    }

    fn client_addr() -> SocketAddr {
        "10.0.0.2:5000".parse().unwrap()
    }

    fn count_requests(server: &mut SimulatedSocket) -> usize {
        let mut buf = [0u8; 256];
        let mut count = 0;
        while let Ok(Some(_)) = server.try_recv_from(&mut buf) {
            count += 1;
        }
        count
    }

    #[test]
    fn test_transition_edges() {
        use ClientStateKind::*;
        assert!(Disconnected.can_transition_to(Challenging));
        assert!(Disconnected.can_transition_to(Disconnected));
        assert!(Spawned.can_transition_to(Disconnected));
        assert!(!Disconnected.can_transition_to(Spawned));
        assert!(!Challenging.can_transition_to(Spawned));
        assert!(!Spawned.can_transition_to(Connecting));
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut state = ClientState::Disconnected { reason: None };
        let next = ClientState::Connecting {
            server: server_addr(),
            token: 1,
            handshake: Handshake {
                nonce: 1,
                client_sequence: 1,
                started: Instant::now(),
                next_send: Instant::now(),
                attempts: 0,
            },
        };
        assert!(matches!(
            state.transition(next),
            Err(NetError::InvalidTransition {
                from: ClientStateKind::Disconnected,
                to: ClientStateKind::Connecting
            })
        ));
        assert_eq!(state.kind(), ClientStateKind::Disconnected);
    }

    #[test]
    fn test_connect_twice_fails() {
        let (mut client, _server, now) = client();
        client.connect(server_addr(), now).unwrap();
        assert!(client.connect(server_addr(), now).is_err());
    }

    #[test]
    fn test_retry_backoff() {
        let (mut client, mut server, start) = client();
        client.connect(server_addr(), start).unwrap();
        assert_eq!(count_requests(&mut server), 1);

        // Default retry is 500ms with 1.5x backoff: next sends at 500ms and 1250ms.
        client.update(start + Duration::from_millis(499)).unwrap();
        assert_eq!(count_requests(&mut server), 0);
        client.update(start + Duration::from_millis(500)).unwrap();
        assert_eq!(count_requests(&mut server), 1);
        client.update(start + Duration::from_millis(1200)).unwrap();
        assert_eq!(count_requests(&mut server), 0);
        client.update(start + Duration::from_millis(1250)).unwrap();
        assert_eq!(count_requests(&mut server), 1);
    }

    #[test]
    fn test_handshake_timeout() {
        let (mut client, _server, start) = client();
        client.connect(server_addr(), start).unwrap();
        client.update(start + Duration::from_secs(11)).unwrap();

        assert_eq!(client.state_kind(), ClientStateKind::Disconnected);
        let events: Vec<_> = client.drain_events().collect();
        assert_eq!(
            events,
            vec![ClientEvent::Disconnected(
                ClientDisconnectReason::HandshakeTimeout
            )]
        );
    }

    #[test]
    fn test_reject_moves_to_disconnected() {
        let (mut client, mut server, now) = client();
        client.connect(server_addr(), now).unwrap();

        let reject = ControlMessage::Reject {
            reason: RejectReason::ServerFull,
        };
        server.send_to(&reject.encode().unwrap(), client_addr()).unwrap();
        client.update(now).unwrap();

        match client.state() {
            ClientState::Disconnected { reason } => assert_eq!(
                *reason,
                Some(ClientDisconnectReason::Rejected(RejectReason::ServerFull))
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ignores_other_senders() {
        let start = Instant::now();
        let network = NetworkSimulator::shared(3, start);
        let socket = NetworkSimulator::bind(&network, client_addr());
        let mut stranger = NetworkSimulator::bind(&network, "10.0.0.9:1".parse().unwrap());
        let mut client = ClientSession::with_seed(socket, NetConfig::default(), 4);
        client.connect(server_addr(), start).unwrap();

        let challenge = ControlMessage::Challenge { token: 5 };
        stranger
            .send_to(&challenge.encode().unwrap(), client_addr())
            .unwrap();
        client.update(start).unwrap();

        assert_eq!(client.state_kind(), ClientStateKind::Challenging);
    }

    #[test]
    fn test_send_requires_spawn() {
        let (mut client, _server, _) = client();
        assert!(matches!(
            client.send(vec![1], Reliability::Reliable),
            Err(NetError::NotConnected)
        ));
    }

    #[test]
    fn test_socket_failure_leaves_session_disconnected() {
        let start = Instant::now();
        let network = NetworkSimulator::shared(3, start);
        let socket = NetworkSimulator::bind(&network, client_addr());
        let mut client = ClientSession::with_seed(socket, NetConfig::default(), 4);

        network.borrow_mut().set_interface_down(client_addr(), true);
        assert!(matches!(
            client.connect(server_addr(), start),
            Err(NetError::NetworkDown(_))
        ));
        assert_eq!(client.state_kind(), ClientStateKind::Disconnected);
        assert_eq!(client.drain_events().count(), 0);

        network.borrow_mut().set_interface_down(client_addr(), false);
        client.connect(server_addr(), start).unwrap();
        assert_eq!(client.state_kind(), ClientStateKind::Challenging);

        network.borrow_mut().set_interface_down(client_addr(), true);
        assert!(client.disconnect(start).is_err());
        assert_eq!(client.state_kind(), ClientStateKind::Disconnected);
        assert_eq!(
            client.drain_events().collect::<Vec<_>>(),
            vec![ClientEvent::Disconnected(ClientDisconnectReason::UserDisconnect)]
        );
    }

    #[test]
    fn test_user_disconnect() {
        let (mut client, _server, now) = client();
        client.connect(server_addr(), now).unwrap();
        client.disconnect(now).unwrap();

        assert_eq!(client.state_kind(), ClientStateKind::Disconnected);
        assert_eq!(
            client.drain_events().collect::<Vec<_>>(),
            vec![ClientEvent::Disconnected(ClientDisconnectReason::UserDisconnect)]
        );
    }
}
