use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::NetConfig;
use crate::discovery::{InfoResponse, decode_request};
use crate::error::NetError;
use crate::net::{
    ChannelFault, ChannelSettings, ControlMessage, DatagramSocket, Datagram, MAX_DATAGRAM_SIZE,
    MessageChannel, NetworkStats, PROTOCOL_VERSION, PacketHeader, RejectReason, Reliability,
    classify, is_transient, sequence_greater_than,
};
use crate::snapshot::{SnapshotHistory, WorldState, encode_delta};

use super::challenge::{ChallengeCheck, ChallengeTable};
use super::events::{DisconnectReason, ServerEvent};
use super::messages::ServerMessage;

/// Ticks run per update at most; the rest of a long stall is dropped.
const MAX_TICKS_PER_UPDATE: u32 = 8;

/// Game logic driven by the session server.
pub trait Simulation {
    fn advance(&mut self, tick: u32, dt: Duration);

    fn capture(&self, tick: u32) -> WorldState;

    fn client_connected(&mut self, _handle: ClientHandle) {}

    fn client_disconnected(&mut self, _handle: ClientHandle) {}

    fn client_message(&mut self, _handle: ClientHandle, _payload: &[u8]) {}
}

/// Stable reference to a client slot. A handle from a previous occupant of
/// the slot no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle {
    pub index: u16,
    pub generation: u32,
}

#[derive(Debug)]
struct ClientConnection {
    addr: SocketAddr,
    nonce: u64,
    server_sequence: u32,
    channel: MessageChannel,
    connected_at: Instant,
    acked_tick: Option<u32>,
    max_rate: u32,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    client: Option<ClientConnection>,
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub handle: ClientHandle,
    pub addr: SocketAddr,
    pub connected_for: Duration,
    pub rtt: Duration,
    pub acked_tick: Option<u32>,
    pub pending_reliable: usize,
    pub max_rate: u32,
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub tick: u32,
    pub client_count: usize,
    pub max_clients: usize,
    pub network: NetworkStats,
}

fn effective_rate(server: u32, client: u32) -> u32 {
    match (server, client) {
        (0, c) => c,
        (s, 0) => s,
        (s, c) => s.min(c),
    }
}

pub struct SessionServer<S: DatagramSocket, G: Simulation> {
    socket: S,
    simulation: G,
    config: NetConfig,
    settings: ChannelSettings,
    slots: Vec<Slot>,
    by_addr: HashMap<SocketAddr, u16>,
    challenges: ChallengeTable,
    banned: HashSet<IpAddr>,
    history: SnapshotHistory,
    tick: u32,
    tick_duration: Duration,
    accumulator: Duration,
    last_update: Option<Instant>,
    rng: StdRng,
    events: VecDeque<ServerEvent>,
    stats: NetworkStats,
    recv_buf: Vec<u8>,
}

impl<S: DatagramSocket, G: Simulation> SessionServer<S, G> {
    pub fn new(socket: S, simulation: G, config: NetConfig) -> Self {
        Self::with_rng(socket, simulation, config, StdRng::from_os_rng())
    }

    /// Deterministic challenge tokens and initial sequences.
    pub fn with_seed(socket: S, simulation: G, config: NetConfig, seed: u64) -> Self {
        Self::with_rng(socket, simulation, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(socket: S, simulation: G, config: NetConfig, rng: StdRng) -> Self {
        let slots = (0..config.max_clients).map(|_| Slot::default()).collect();
        let challenges = ChallengeTable::new(config.challenge_lifetime(), config.max_challenges);
        Self {
            socket,
            simulation,
            settings: ChannelSettings::from(&config),
            slots,
            by_addr: HashMap::new(),
            challenges,
            banned: config.banned.iter().copied().collect(),
            history: SnapshotHistory::new(config.snapshot_history),
            tick: 0,
            tick_duration: config.tick_duration(),
            accumulator: Duration::ZERO,
            last_update: None,
            rng,
            events: VecDeque::new(),
            stats: NetworkStats::default(),
            recv_buf: vec![0; MAX_DATAGRAM_SIZE],
            config,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn simulation(&self) -> &G {
        &self.simulation
    }

    pub fn simulation_mut(&mut self) -> &mut G {
        &mut self.simulation
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.events.drain(..)
    }

    /// One network step: drain the socket, run due ticks, drop faulted
    /// clients and flush every channel.
    pub fn update(&mut self, now: Instant) -> Result<(), NetError> {
        self.receive_all(now)?;

        let elapsed = self
            .last_update
            .map_or(Duration::ZERO, |last| now.saturating_duration_since(last));
        self.last_update = Some(now);
        self.accumulator += elapsed;

        let mut ran = 0;
        while self.accumulator >= self.tick_duration {
            if ran == MAX_TICKS_PER_UPDATE {
                log::debug!("Dropping {:?} of simulation backlog", self.accumulator);
                self.accumulator = Duration::ZERO;
                break;
            }
            self.accumulator -= self.tick_duration;
            self.run_tick(now);
            ran += 1;
        }

        self.evict_faulted(now);

        for slot in &mut self.slots {
            if let Some(client) = slot.client.as_mut() {
                client.channel.flush(&mut self.socket, now)?;
            }
        }
        Ok(())
    }

    fn receive_all(&mut self, now: Instant) -> Result<(), NetError> {
        let mut buf = std::mem::take(&mut self.recv_buf);
        let result = loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok(Some((len, from))) => self.handle_datagram(from, &buf[..len], now),
                Ok(None) => break Ok(()),
                Err(e) if is_transient(&e) => break Ok(()),
                Err(e) => {
                    log::warn!("Server socket failed: {}", e);
                    self.events.push_back(ServerEvent::Error {
                        message: format!("Network error: {}", e),
                    });
                    break Err(NetError::NetworkDown(e));
                }
            }
        };
        self.recv_buf = buf;
        result
    }

    fn handle_datagram(&mut self, from: SocketAddr, data: &[u8], now: Instant) {
        let datagram = match classify(data) {
            Ok(datagram) => datagram,
            Err(e) => {
                log::debug!("Dropping datagram from {}: {}", from, e);
                self.stats.malformed_dropped += 1;
                return;
            }
        };

        match datagram {
            Datagram::Channel { header, payload } => {
                self.handle_channel_packet(from, &header, payload, now)
            }
            Datagram::Control(message) => self.handle_control(from, message, now),
            Datagram::InfoRequest(body) => self.answer_info(from, body),
            Datagram::InfoResponse(_) => {}
        }
    }

    fn handle_channel_packet(
        &mut self,
        from: SocketAddr,
        header: &PacketHeader,
        payload: &[u8],
        now: Instant,
    ) {
        let Some(&index) = self.by_addr.get(&from) else {
            return;
        };
        let slot = &mut self.slots[index as usize];
        let handle = ClientHandle {
            index,
            generation: slot.generation,
        };
        let Some(client) = slot.client.as_mut() else {
            return;
        };

        client.channel.process(header, payload, now);

        for tick in client.channel.drain_acked_tags() {
            if client
                .acked_tick
                .is_none_or(|acked| sequence_greater_than(tick, acked))
            {
                client.acked_tick = Some(tick);
            }
        }

        let messages: Vec<Vec<u8>> = std::iter::from_fn(|| client.channel.receive())
            .map(|message| message.payload)
            .collect();
        for payload in messages {
            self.simulation.client_message(handle, &payload);
        }
    }

    fn handle_control(&mut self, from: SocketAddr, message: ControlMessage, now: Instant) {
        match message {
            ControlMessage::ConnectRequest {
                protocol_version,
                client_nonce,
                client_sequence,
                max_rate,
                challenge,
            } => self.handle_connect_request(
                from,
                protocol_version,
                client_nonce,
                client_sequence,
                max_rate,
                challenge,
                now,
            ),
            ControlMessage::Disconnect => {
                if let Some(&index) = self.by_addr.get(&from) {
                    self.remove_client(index, DisconnectReason::Graceful);
                }
            }
            _ => log::debug!("Ignoring unexpected control message from {}", from),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_connect_request(
        &mut self,
        from: SocketAddr,
        protocol_version: u32,
        client_nonce: u64,
        client_sequence: u32,
        max_rate: u32,
        challenge: Option<u64>,
        now: Instant,
    ) {
        if self.banned.contains(&from.ip()) {
            self.reject(from, RejectReason::Banned);
            return;
        }
        if protocol_version != PROTOCOL_VERSION {
            self.reject(from, RejectReason::VersionMismatch);
            return;
        }

        let existing = self.by_addr.get(&from).copied();
        if let Some(index) = existing
            && let Some(client) = self.slots[index as usize].client.as_mut()
            && client.nonce == client_nonce
        {
            // Our response was lost; say it again.
            client.channel.touch(now);
            let response = ControlMessage::ConnectResponse {
                slot: index,
                server_sequence: client.server_sequence,
                tick_rate: self.config.tick_rate,
            };
            self.send_control(from, &response);
            return;
        }

        let Some(token) = challenge else {
            let token = self.challenges.issue(from, self.rng.random(), now);
            self.events.push_back(ServerEvent::ClientConnecting { addr: from });
            self.send_control(from, &ControlMessage::Challenge { token });
            return;
        };

        match self.challenges.check(from, token, now) {
            ChallengeCheck::Valid => {}
            check => {
                log::debug!("Challenge from {} failed: {:?}", from, check);
                self.reject(from, RejectReason::InvalidChallenge);
                return;
            }
        }

        if let Some(index) = existing {
            self.remove_client(index, DisconnectReason::Replaced);
        }

        let Some(index) = self.slots.iter().position(|slot| slot.client.is_none()) else {
            self.reject(from, RejectReason::ServerFull);
            return;
        };
        self.challenges.consume(from);

        let server_sequence: u32 = self.rng.random();
        let mut channel =
            MessageChannel::accept(from, self.settings.clone(), server_sequence, client_sequence, now);
        let rate = effective_rate(self.config.max_outgoing_rate, max_rate);
        channel.set_max_rate(rate);

        let slot = &mut self.slots[index];
        slot.generation = slot.generation.wrapping_add(1);
        slot.client = Some(ClientConnection {
            addr: from,
            nonce: client_nonce,
            server_sequence,
            channel,
            connected_at: now,
            acked_tick: None,
            max_rate: rate,
        });
        let index = index as u16;
        let handle = ClientHandle {
            index,
            generation: slot.generation,
        };
        self.by_addr.insert(from, index);

        self.send_control(
            from,
            &ControlMessage::ConnectResponse {
                slot: index,
                server_sequence,
                tick_rate: self.config.tick_rate,
            },
        );

        log::info!("Client {} connected in slot {}", from, index);
        self.events
            .push_back(ServerEvent::ClientConnected { handle, addr: from });
        self.simulation.client_connected(handle);
    }

    fn reject(&mut self, addr: SocketAddr, reason: RejectReason) {
        log::warn!("Rejecting {}: {}", addr, reason.as_str());
        self.send_control(addr, &ControlMessage::Reject { reason });
        self.events
            .push_back(ServerEvent::ConnectionDenied { addr, reason });
    }

    fn send_control(&mut self, addr: SocketAddr, message: &ControlMessage) {
        let data = match message.encode() {
            Ok(data) => data,
            Err(e) => {
                self.events.push_back(ServerEvent::Error {
                    message: format!("Failed to encode control message: {}", e),
                });
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&data, addr) {
            log::debug!("Failed to send control message to {}: {}", addr, e);
        }
    }

    fn answer_info(&mut self, from: SocketAddr, body: &[u8]) {
        let Ok(request_id) = decode_request(body) else {
            self.stats.malformed_dropped += 1;
            return;
        };
        let response = InfoResponse {
            request_id,
            name: self.config.server_name.clone(),
            map: self.config.map_name.clone(),
            players: self.connected_count() as u32,
            max_players: self.config.max_clients as u32,
            protocol_version: PROTOCOL_VERSION,
        };
        if let Err(e) = self.socket.send_to(&response.encode(), from) {
            log::debug!("Failed to answer info request from {}: {}", from, e);
        }
    }

    fn run_tick(&mut self, now: Instant) {
        self.tick = self.tick.wrapping_add(1);
        self.simulation.advance(self.tick, self.tick_duration);
        let state = self.simulation.capture(self.tick);
        self.history.push(state);

        if self.tick % self.config.snapshot_interval_ticks() == 0 {
            self.send_snapshots(now);
        }
    }

    fn send_snapshots(&mut self, now: Instant) {
        let Some(current) = self.history.get(self.tick) else {
            return;
        };

        for slot in &mut self.slots {
            let Some(client) = slot.client.as_mut() else {
                continue;
            };
            if client.channel.is_over_budget(now) {
                continue;
            }

            let baseline = client.acked_tick.and_then(|tick| self.history.get(tick));
            let message = ServerMessage::Snapshot {
                tick: current.tick,
                baseline: baseline.map(|b| b.tick),
                delta: encode_delta(baseline, current),
            };
            if let Err(e) = client.channel.send_snapshot(message.encode(), current.tick) {
                log::warn!("Snapshot for {} not sent: {}", client.addr, e);
            }
        }
    }

    fn evict_faulted(&mut self, now: Instant) {
        let mut faulted = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(client) = slot.client.as_mut()
                && let Some(fault) = client.channel.poll_fault(now)
            {
                faulted.push((index as u16, fault));
            }
        }

        for (index, fault) in faulted {
            let reason = match fault {
                ChannelFault::TimedOut => DisconnectReason::Timeout,
                ChannelFault::RetriesExhausted => DisconnectReason::RetriesExhausted,
            };
            self.remove_client(index, reason);
        }
    }

    fn remove_client(&mut self, index: u16, reason: DisconnectReason) {
        let slot = &mut self.slots[index as usize];
        let Some(client) = slot.client.take() else {
            return;
        };
        let handle = ClientHandle {
            index,
            generation: slot.generation,
        };
        self.by_addr.remove(&client.addr);

        log::info!("Client {} {}", client.addr, reason.as_str());
        self.events.push_back(ServerEvent::ClientDisconnected {
            handle,
            addr: client.addr,
            reason,
        });
        self.simulation.client_disconnected(handle);
    }

    fn client_mut(&mut self, handle: ClientHandle) -> Option<&mut ClientConnection> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.client.as_mut())
    }

    pub fn is_connected(&self, handle: ClientHandle) -> bool {
        self.slots
            .get(handle.index as usize)
            .is_some_and(|slot| slot.generation == handle.generation && slot.client.is_some())
    }

    /// Queues a reliable event for one client.
    pub fn send_event(&mut self, handle: ClientHandle, payload: &[u8]) -> Result<(), NetError> {
        let client = self.client_mut(handle).ok_or(NetError::NotConnected)?;
        let message = ServerMessage::Event(payload.to_vec()).encode();
        client.channel.send(message, Reliability::Reliable)
    }

    pub fn broadcast_event(&mut self, payload: &[u8]) {
        let message = ServerMessage::Event(payload.to_vec()).encode();
        for slot in &mut self.slots {
            if let Some(client) = slot.client.as_mut()
                && let Err(e) = client.channel.send(message.clone(), Reliability::Reliable)
            {
                log::warn!("Event for {} not queued: {}", client.addr, e);
            }
        }
    }

    pub fn kick(&mut self, handle: ClientHandle) -> Result<(), NetError> {
        self.disconnect_with(handle, DisconnectReason::Kicked)
    }

    fn disconnect_with(
        &mut self,
        handle: ClientHandle,
        reason: DisconnectReason,
    ) -> Result<(), NetError> {
        let addr = self.client_mut(handle).ok_or(NetError::NotConnected)?.addr;
        self.send_control(addr, &ControlMessage::Disconnect);
        self.remove_client(handle.index, reason);
        Ok(())
    }

    /// Refuses future connections from `ip` and drops its current clients.
    pub fn ban(&mut self, ip: IpAddr) {
        self.banned.insert(ip);
        let handles: Vec<ClientHandle> = self
            .connected()
            .filter(|(_, addr)| addr.ip() == ip)
            .map(|(handle, _)| handle)
            .collect();
        for handle in handles {
            let _ = self.disconnect_with(handle, DisconnectReason::Banned);
        }
    }

    pub fn unban(&mut self, ip: IpAddr) -> bool {
        self.banned.remove(&ip)
    }

    /// Tells every client goodbye and frees all slots.
    pub fn shutdown(&mut self) {
        let handles: Vec<ClientHandle> = self.connected().map(|(handle, _)| handle).collect();
        for handle in handles {
            let _ = self.disconnect_with(handle, DisconnectReason::Kicked);
        }
    }

    pub fn connected_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.client.is_some()).count()
    }

    fn connected(&self) -> impl Iterator<Item = (ClientHandle, SocketAddr)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let client = slot.client.as_ref()?;
            let handle = ClientHandle {
                index: index as u16,
                generation: slot.generation,
            };
            Some((handle, client.addr))
        })
    }

    pub fn client_infos(&self, now: Instant) -> Vec<ClientInfo> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let client = slot.client.as_ref()?;
                Some(ClientInfo {
                    handle: ClientHandle {
                        index: index as u16,
                        generation: slot.generation,
                    },
                    addr: client.addr,
                    connected_for: now.saturating_duration_since(client.connected_at),
                    rtt: client.channel.rtt(),
                    acked_tick: client.acked_tick,
                    pending_reliable: client.channel.pending_reliable(),
                    max_rate: client.max_rate,
                })
            })
            .collect()
    }

    pub fn client_stats(&self, handle: ClientHandle, now: Instant) -> Option<NetworkStats> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.client.as_ref())
            .map(|client| client.channel.stats(now))
    }

    pub fn stats(&self, now: Instant) -> ServerStats {
        let mut network = self.stats.clone();
        for client in self.slots.iter().filter_map(|slot| slot.client.as_ref()) {
            network.accumulate(&client.channel.stats(now));
        }
        ServerStats {
            tick: self.tick,
            client_count: self.connected_count(),
            max_clients: self.config.max_clients,
            network,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{NetworkSimulator, SimulatedSocket};

    struct Empty;

    impl Simulation for Empty {
        fn advance(&mut self, _tick: u32, _dt: Duration) {}

        fn capture(&self, tick: u32) -> WorldState {
            WorldState::new(tick)
        }
    }

    fn server(config: NetConfig) -> (SessionServer<SimulatedSocket, Empty>, SimulatedSocket, Instant) {
        let start = Instant::now();
        let network = NetworkSimulator::shared(1, start);
        let socket = NetworkSimulator::bind(&network, "10.0.0.1:27015".parse().unwrap());
        let peer = NetworkSimulator::bind(&network, "10.0.0.2:5000".parse().unwrap());
        (SessionServer::with_seed(socket, Empty, config, 9), peer, start)
    }

    fn request(challenge: Option<u64>, nonce: u64) -> Vec<u8> {
        ControlMessage::ConnectRequest {
            protocol_version: PROTOCOL_VERSION,
            client_nonce: nonce,
            client_sequence: 1,
            max_rate: 10_000,
            challenge,
        }
        .encode()
        .unwrap()
    }

    /// Next control message, skipping channel traffic.
    fn reply(peer: &mut SimulatedSocket) -> ControlMessage {
        let mut buf = [0u8; 256];
        loop {
            let (len, _) = peer.try_recv_from(&mut buf).unwrap().expect("no reply");
            if let Datagram::Control(message) = classify(&buf[..len]).unwrap() {
                return message;
            }
        }
    }

    fn server_addr() -> SocketAddr {
        "10.0.0.1:27015".parse().unwrap()
    }

    #[test]
    fn test_effective_rate() {
        assert_eq!(effective_rate(0, 500), 500);
        assert_eq!(effective_rate(800, 0), 800);
        assert_eq!(effective_rate(800, 500), 500);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let (mut server, mut peer, now) = server(NetConfig::default());
        let data = ControlMessage::ConnectRequest {
            protocol_version: PROTOCOL_VERSION + 1,
            client_nonce: 1,
            client_sequence: 1,
            max_rate: 0,
            challenge: None,
        }
        .encode()
        .unwrap();
        peer.send_to(&data, server_addr()).unwrap();
        server.update(now).unwrap();

        assert_eq!(
            reply(&mut peer),
            ControlMessage::Reject {
                reason: RejectReason::VersionMismatch
            }
        );
        assert_eq!(server.connected_count(), 0);
    }

    #[test]
    fn test_lost_response_is_resent() {
        let (mut server, mut peer, now) = server(NetConfig::default());

        peer.send_to(&request(None, 7), server_addr()).unwrap();
        server.update(now).unwrap();
        let ControlMessage::Challenge { token } = reply(&mut peer) else {
            panic!("expected challenge");
        };

        peer.send_to(&request(Some(token), 7), server_addr()).unwrap();
        server.update(now).unwrap();
        let first = reply(&mut peer);

        // Same nonce again, as if the response never arrived.
        peer.send_to(&request(Some(token), 7), server_addr()).unwrap();
        server.update(now).unwrap();
        assert_eq!(reply(&mut peer), first);
        assert_eq!(server.connected_count(), 1);
    }

    #[test]
    fn test_client_info_measured_against_caller_clock() {
        let (mut server, mut peer, now) = server(NetConfig::default());

        peer.send_to(&request(None, 3), server_addr()).unwrap();
        server.update(now).unwrap();
        let ControlMessage::Challenge { token } = reply(&mut peer) else {
            panic!("expected challenge");
        };
        peer.send_to(&request(Some(token), 3), server_addr()).unwrap();
        server.update(now).unwrap();

        let infos = server.client_infos(now + Duration::from_secs(3));
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].connected_for, Duration::from_secs(3));
        assert_eq!(infos[0].addr, "10.0.0.2:5000".parse::<std::net::SocketAddr>().unwrap());

        server.ban("10.0.0.2".parse().unwrap());
        assert_eq!(server.connected_count(), 0);
        assert!(server.client_infos(now).is_empty());
    }

    #[test]
    fn test_banned_address_rejected() {
        let config = NetConfig {
            banned: vec!["10.0.0.2".parse().unwrap()],
            ..Default::default()
        };
        let (mut server, mut peer, now) = server(config);

        peer.send_to(&request(None, 1), server_addr()).unwrap();
        server.update(now).unwrap();

        assert_eq!(
            reply(&mut peer),
            ControlMessage::Reject {
                reason: RejectReason::Banned
            }
        );
    }

    #[test]
    fn test_stale_handle_does_not_resolve() {
        let (mut server, _peer, _) = server(NetConfig::default());
        let stale = ClientHandle {
            index: 0,
            generation: 42,
        };
        assert!(!server.is_connected(stale));
        assert!(matches!(
            server.send_event(stale, b"x"),
            Err(NetError::NotConnected)
        ));
    }
}
