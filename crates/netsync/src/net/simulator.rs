//! In-memory datagram network for deterministic tests and loss injection.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::socket::DatagramSocket;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinkConditions {
    pub loss_percent: f32,
    pub latency: Duration,
    /// Extra delay drawn uniformly from `0..=jitter`, which also reorders.
    pub jitter: Duration,
    pub duplicate_percent: f32,
}

impl LinkConditions {
    pub fn latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    pub fn lossy(loss_percent: f32) -> Self {
        Self {
            loss_percent,
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct DelayedDatagram {
    release_time: Instant,
    order: u64,
    from: SocketAddr,
    to: SocketAddr,
    data: Vec<u8>,
}

impl PartialEq for DelayedDatagram {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time && self.order == other.order
    }
}

impl Eq for DelayedDatagram {}

impl PartialOrd for DelayedDatagram {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedDatagram {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap.
        other
            .release_time
            .cmp(&self.release_time)
            .then_with(|| other.order.cmp(&self.order))
    }
}

pub type SharedNetwork = Rc<RefCell<NetworkSimulator>>;

/// A virtual network with its own clock. Datagrams become readable once
/// [`advance_to`](Self::advance_to) moves the clock past their release time.
#[derive(Debug)]
pub struct NetworkSimulator {
    now: Instant,
    rng: StdRng,
    default_conditions: LinkConditions,
    conditions: HashMap<SocketAddr, LinkConditions>,
    in_flight: BinaryHeap<DelayedDatagram>,
    inboxes: HashMap<SocketAddr, VecDeque<(SocketAddr, Vec<u8>)>>,
    down: HashSet<SocketAddr>,
    next_order: u64,
    dropped: u64,
}

impl NetworkSimulator {
    pub fn new(seed: u64, now: Instant) -> Self {
        Self {
            now,
            rng: StdRng::seed_from_u64(seed),
            default_conditions: LinkConditions::default(),
            conditions: HashMap::new(),
            in_flight: BinaryHeap::new(),
            inboxes: HashMap::new(),
            down: HashSet::new(),
            next_order: 0,
            dropped: 0,
        }
    }

    pub fn shared(seed: u64, now: Instant) -> SharedNetwork {
        Rc::new(RefCell::new(Self::new(seed, now)))
    }

    pub fn bind(network: &SharedNetwork, addr: SocketAddr) -> SimulatedSocket {
        network.borrow_mut().inboxes.entry(addr).or_default();
        SimulatedSocket {
            addr,
            network: Rc::clone(network),
        }
    }

    pub fn set_default_conditions(&mut self, conditions: LinkConditions) {
        self.default_conditions = conditions;
    }

    /// Conditions for everything sent to `addr`.
    pub fn set_conditions(&mut self, addr: SocketAddr, conditions: LinkConditions) {
        self.conditions.insert(addr, conditions);
    }

    /// Makes every socket bound to `addr` fail with `NetworkDown`.
    pub fn set_interface_down(&mut self, addr: SocketAddr, down: bool) {
        if down {
            self.down.insert(addr);
        } else {
            self.down.remove(&addr);
        }
    }

    fn check_up(&self, addr: SocketAddr) -> io::Result<()> {
        if self.down.contains(&addr) {
            return Err(io::Error::from(io::ErrorKind::NetworkDown));
        }
        Ok(())
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn advance_to(&mut self, now: Instant) {
        if now > self.now {
            self.now = now;
        }
        while let Some(next) = self.in_flight.peek() {
            if next.release_time > self.now {
                break;
            }
            let Some(datagram) = self.in_flight.pop() else {
                break;
            };
            if let Some(inbox) = self.inboxes.get_mut(&datagram.to) {
                inbox.push_back((datagram.from, datagram.data));
            }
        }
    }

    fn roll(&mut self, percent: f32) -> bool {
        percent > 0.0 && self.rng.random::<f32>() * 100.0 < percent
    }

    fn send(&mut self, from: SocketAddr, to: SocketAddr, data: &[u8]) {
        let targets: Vec<SocketAddr> = if to.ip() == IpAddr::V4(Ipv4Addr::BROADCAST) {
            self.inboxes
                .keys()
                .filter(|addr| addr.port() == to.port() && **addr != from)
                .copied()
                .collect()
        } else {
            vec![to]
        };

        for target in targets {
            let conditions = self
                .conditions
                .get(&target)
                .copied()
                .unwrap_or(self.default_conditions);

            if self.roll(conditions.loss_percent) {
                self.dropped += 1;
                continue;
            }

            let copies = if self.roll(conditions.duplicate_percent) { 2 } else { 1 };
            for _ in 0..copies {
                let jitter = if conditions.jitter.is_zero() {
                    Duration::ZERO
                } else {
                    conditions.jitter.mul_f32(self.rng.random::<f32>())
                };
                let order = self.next_order;
                self.next_order += 1;
                self.in_flight.push(DelayedDatagram {
                    release_time: self.now + conditions.latency + jitter,
                    order,
                    from,
                    to: target,
                    data: data.to_vec(),
                });
            }
        }

        let now = self.now;
        self.advance_to(now);
    }
}

#[derive(Debug)]
pub struct SimulatedSocket {
    addr: SocketAddr,
    network: SharedNetwork,
}

impl DatagramSocket for SimulatedSocket {
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let mut network = self.network.borrow_mut();
        network.check_up(self.addr)?;
        network.send(self.addr, addr, data);
        Ok(data.len())
    }

    fn try_recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let mut network = self.network.borrow_mut();
        network.check_up(self.addr)?;
        let Some(inbox) = network.inboxes.get_mut(&self.addr) else {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        };
        let Some((from, data)) = inbox.pop_front() else {
            return Ok(None);
        };
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(Some((len, from)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

impl Drop for SimulatedSocket {
    fn drop(&mut self) {
        if let Ok(mut network) = self.network.try_borrow_mut() {
            network.inboxes.remove(&self.addr);
        }
    }
}

/// Drops a share of outgoing datagrams before they reach the real socket.
#[derive(Debug)]
pub struct LossySocket<S> {
    inner: S,
    loss_percent: f32,
    rng: StdRng,
    dropped: u64,
}

impl<S: DatagramSocket> LossySocket<S> {
    pub fn new(inner: S, loss_percent: f32, seed: u64) -> Self {
        Self {
            inner,
            loss_percent: loss_percent.clamp(0.0, 100.0),
            rng: StdRng::seed_from_u64(seed),
            dropped: 0,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: DatagramSocket> DatagramSocket for LossySocket<S> {
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if self.loss_percent > 0.0 && self.rng.random::<f32>() * 100.0 < self.loss_percent {
            self.dropped += 1;
            return Ok(data.len());
        }
        self.inner.send_to(data, addr)
    }

    fn try_recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        self.inner.try_recv_from(buf)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
