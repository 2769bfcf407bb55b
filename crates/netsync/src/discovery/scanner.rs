use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::NetConfig;
use crate::error::NetError;
use crate::net::{Datagram, DatagramSocket, MAX_DATAGRAM_SIZE, classify, is_transient};

use super::frame::{InfoResponse, encode_request};

/// One server that answered a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub address: SocketAddr,
    pub name: String,
    pub map: String,
    pub players: u32,
    pub max_players: u32,
    pub protocol_version: u32,
    pub round_trip: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Query {
    /// `None` for a broadcast, which any host may answer.
    target: Option<SocketAddr>,
    sent: Instant,
}

/// Finds servers by broadcasting and querying known addresses.
pub struct DiscoveryScanner<S: DatagramSocket> {
    socket: S,
    timeout: Duration,
    port: u16,
    broadcast: bool,
    rendezvous: Vec<SocketAddr>,
    queries: HashMap<u32, Query>,
    next_request_id: u32,
    results: Vec<ServerInfo>,
    recv_buf: Vec<u8>,
}

impl<S: DatagramSocket> DiscoveryScanner<S> {
    pub fn new(socket: S, config: &NetConfig) -> Self {
        Self {
            socket,
            timeout: config.discovery_timeout(),
            port: config.discovery_port,
            broadcast: config.discovery_broadcast,
            rendezvous: config.rendezvous.clone(),
            queries: HashMap::new(),
            next_request_id: rand::rng().random(),
            results: Vec::new(),
            recv_buf: vec![0; MAX_DATAGRAM_SIZE],
        }
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// Forgets earlier results and queries the local subnet and every
    /// rendezvous address.
    pub fn start_scan(&mut self, now: Instant) -> Result<(), NetError> {
        self.queries.clear();
        self.results.clear();

        if self.broadcast {
            let addr = SocketAddr::from((Ipv4Addr::BROADCAST, self.port));
            self.send_query(addr, None, now)?;
        }
        for addr in self.rendezvous.clone() {
            self.send_query(addr, Some(addr), now)?;
        }
        Ok(())
    }

    /// Queries a single address without clearing earlier results.
    pub fn query(&mut self, addr: SocketAddr, now: Instant) -> Result<(), NetError> {
        self.send_query(addr, Some(addr), now)
    }

    fn send_query(
        &mut self,
        addr: SocketAddr,
        target: Option<SocketAddr>,
        now: Instant,
    ) -> Result<(), NetError> {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);

        match self.socket.send_to(&encode_request(request_id), addr) {
            Ok(_) => {}
            Err(e) if is_transient(&e) => {}
            // Broadcast may be refused on hosts without a route; rendezvous still works.
            Err(e) if target.is_none() && e.kind() == std::io::ErrorKind::PermissionDenied => {
                log::debug!("Broadcast query refused: {}", e);
                return Ok(());
            }
            Err(e) => return Err(NetError::NetworkDown(e)),
        }
        log::debug!("Info request {} to {}", request_id, addr);
        self.queries.insert(request_id, Query { target, sent: now });
        Ok(())
    }

    /// Collects responses and expires queries older than the timeout.
    pub fn poll(&mut self, now: Instant) -> Result<(), NetError> {
        let mut buf = std::mem::take(&mut self.recv_buf);
        let result = loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok(Some((len, from))) => self.handle_datagram(from, &buf[..len], now),
                Ok(None) => break Ok(()),
                Err(e) if is_transient(&e) => break Ok(()),
                Err(e) => break Err(NetError::NetworkDown(e)),
            }
        };
        self.recv_buf = buf;

        let timeout = self.timeout;
        self.queries
            .retain(|_, query| now.saturating_duration_since(query.sent) < timeout);
        result
    }

    fn handle_datagram(&mut self, from: SocketAddr, data: &[u8], now: Instant) {
        let Ok(Datagram::InfoResponse(body)) = classify(data) else {
            return;
        };
        let Ok(response) = InfoResponse::decode(body) else {
            log::debug!("Malformed info response from {}", from);
            return;
        };

        let Some(query) = self.queries.get(&response.request_id).copied() else {
            return;
        };
        if query.target.is_some_and(|target| target != from) {
            return;
        }
        if query.target.is_some() {
            self.queries.remove(&response.request_id);
        }
        if self.results.iter().any(|info| info.address == from) {
            return;
        }

        self.results.push(ServerInfo {
            address: from,
            name: response.name,
            map: response.map,
            players: response.players,
            max_players: response.max_players,
            protocol_version: response.protocol_version,
            round_trip: now.saturating_duration_since(query.sent),
        });
    }

    pub fn is_scanning(&self) -> bool {
        !self.queries.is_empty()
    }

    pub fn results(&self) -> &[ServerInfo] {
        &self.results
    }

    pub fn sorted_by_round_trip(&self) -> Vec<ServerInfo> {
        let mut sorted = self.results.clone();
        sorted.sort_by_key(|info| info.round_trip);
        sorted
    }
}
