use std::collections::{BTreeMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::config::NetConfig;
use crate::error::NetError;

use super::compress::{compress_zero_runs, compression_ratio, decompress_zero_runs};
use super::cursor::{BitReader, BitWriter};
use super::fragment::{FragmentAssembler, FragmentOutcome, fragment_count, split_even};
use super::protocol::{
    HEADER_SIZE, MAX_MESSAGE_SIZE, PacketError, PacketFlags, PacketHeader, sequence_greater_than,
};
use super::rate::{PacketLossMeter, RateLimiter, RateMeter};
use super::socket::{DatagramSocket, is_transient};
use super::stats::NetworkStats;
use super::tracking::{ACK_WINDOW, AckTracker, ReceiveTracker};

const MAX_RESEND_DELAY: Duration = Duration::from_secs(2);
const MAX_TRACKED_PACKETS: usize = 256;
const MAX_FRAGMENT_RUNS: usize = 8;
/// Reliable ids further ahead of the next expected one than this are bogus.
const MAX_RELIABLE_WINDOW: u32 = 1 << 16;
const MAX_MESSAGES_PER_BODY: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reliability {
    Reliable,
    Unreliable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub reliability: Reliability,
    /// Reliable id for reliable messages, packet sequence for unreliable ones.
    pub sequence: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFault {
    TimedOut,
    RetriesExhausted,
}

/// What happened to one incoming datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    Accepted,
    /// A fragment was stored, the message is not complete yet.
    Buffered,
    Duplicate,
    Malformed,
}

/// The subset of [`NetConfig`] a channel needs.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub mtu: usize,
    pub max_reliable_per_packet: usize,
    pub reliable_queue_limit: usize,
    pub reliable_resend: Duration,
    pub reliable_backoff: f32,
    pub reliable_max_retries: u32,
    pub fragment_timeout: Duration,
    pub keepalive: Duration,
    pub silence_timeout: Duration,
    pub compress: bool,
    pub max_outgoing_rate: u32,
    pub max_outgoing_packets: u32,
}

impl From<&NetConfig> for ChannelSettings {
    fn from(config: &NetConfig) -> Self {
        Self {
            mtu: config.mtu,
            max_reliable_per_packet: config.max_reliable_per_packet.max(1),
            reliable_queue_limit: config.reliable_queue_limit,
            reliable_resend: config.reliable_resend(),
            reliable_backoff: config.reliable_backoff.max(1.0),
            reliable_max_retries: config.reliable_max_retries,
            fragment_timeout: config.fragment_timeout(),
            keepalive: config.keepalive(),
            silence_timeout: config.silence_timeout(),
            compress: config.compress_bodies,
            max_outgoing_rate: config.max_outgoing_rate,
            max_outgoing_packets: config.max_outgoing_packets,
        }
    }
}

#[derive(Debug)]
struct PendingReliable {
    id: u32,
    payload: Vec<u8>,
    attempts: u32,
    last_sent: Option<Instant>,
}

#[derive(Debug)]
struct PendingUnreliable {
    payload: Vec<u8>,
    tag: Option<u32>,
}

struct Body {
    reliable: Vec<(u32, Vec<u8>)>,
    unreliable: Option<Vec<u8>>,
}

/// Reliable and unreliable delivery between this host and one peer.
#[derive(Debug)]
pub struct MessageChannel {
    remote: SocketAddr,
    settings: ChannelSettings,
    local_sequence: u32,
    receive_tracker: ReceiveTracker,
    ack_tracker: AckTracker,
    fragments: FragmentAssembler,
    max_body: usize,
    reliable_out: VecDeque<PendingReliable>,
    next_reliable_id: u32,
    unreliable_out: Option<PendingUnreliable>,
    reliable_in: BTreeMap<u32, Vec<u8>>,
    next_expected_reliable: u32,
    delivered: VecDeque<Message>,
    acked_tags: Vec<u32>,
    limiter: RateLimiter,
    incoming_meter: RateMeter,
    outgoing_meter: RateMeter,
    loss_meter: PacketLossMeter,
    stats: NetworkStats,
    last_received: Instant,
    last_sent: Option<Instant>,
    ack_owed: bool,
    fault: Option<ChannelFault>,
    fault_reported: bool,
}

impl MessageChannel {
    /// Client end: `local_sequence` is what we announced in the connect
    /// request, `remote_sequence` what the server answered with.
    pub fn connect(
        remote: SocketAddr,
        settings: ChannelSettings,
        local_sequence: u32,
        remote_sequence: u32,
        now: Instant,
    ) -> Self {
        log::debug!(
            "Channel to {} (out {}, in {})",
            remote,
            local_sequence,
            remote_sequence
        );
        Self::new(remote, settings, local_sequence, remote_sequence, now)
    }

    /// Server end, created once the handshake admitted `remote`.
    pub fn accept(
        remote: SocketAddr,
        settings: ChannelSettings,
        local_sequence: u32,
        remote_sequence: u32,
        now: Instant,
    ) -> Self {
        log::debug!(
            "Channel from {} (out {}, in {})",
            remote,
            local_sequence,
            remote_sequence
        );
        Self::new(remote, settings, local_sequence, remote_sequence, now)
    }

    fn new(
        remote: SocketAddr,
        settings: ChannelSettings,
        local_sequence: u32,
        remote_sequence: u32,
        now: Instant,
    ) -> Self {
        let limiter = RateLimiter::new(settings.max_outgoing_rate, settings.max_outgoing_packets);
        let max_body = max_body_size(settings.max_reliable_per_packet);
        let fragments =
            FragmentAssembler::new(settings.fragment_timeout, MAX_FRAGMENT_RUNS, max_body, settings.mtu);
        Self {
            remote,
            settings,
            local_sequence,
            receive_tracker: ReceiveTracker::new(remote_sequence),
            ack_tracker: AckTracker::new(MAX_TRACKED_PACKETS),
            fragments,
            max_body,
            reliable_out: VecDeque::new(),
            next_reliable_id: 1,
            unreliable_out: None,
            reliable_in: BTreeMap::new(),
            next_expected_reliable: 1,
            delivered: VecDeque::new(),
            acked_tags: Vec::new(),
            limiter,
            incoming_meter: RateMeter::default(),
            outgoing_meter: RateMeter::default(),
            loss_meter: PacketLossMeter::default(),
            stats: NetworkStats::default(),
            last_received: now,
            last_sent: None,
            ack_owed: false,
            fault: None,
            fault_reported: false,
        }
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn send(&mut self, payload: Vec<u8>, reliability: Reliability) -> Result<(), NetError> {
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(NetError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        match reliability {
            Reliability::Reliable => {
                if self.reliable_out.len() >= self.settings.reliable_queue_limit {
                    return Err(NetError::ReliableQueueFull {
                        limit: self.settings.reliable_queue_limit,
                    });
                }
                let id = self.next_reliable_id;
                self.next_reliable_id = self.next_reliable_id.wrapping_add(1);
                self.reliable_out.push_back(PendingReliable {
                    id,
                    payload,
                    attempts: 0,
                    last_sent: None,
                });
            }
            Reliability::Unreliable => {
                self.unreliable_out = Some(PendingUnreliable { payload, tag: None });
            }
        }
        Ok(())
    }

    /// Queues an unreliable payload whose acknowledgment is reported back
    /// through [`drain_acked_tags`](Self::drain_acked_tags).
    pub fn send_snapshot(&mut self, payload: Vec<u8>, tick: u32) -> Result<(), NetError> {
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(NetError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        self.unreliable_out = Some(PendingUnreliable {
            payload,
            tag: Some(tick),
        });
        Ok(())
    }

    fn resend_delay(&self, attempts: u32) -> Duration {
        let srtt = Duration::from_secs_f32(self.ack_tracker.srtt().max(0.0) / 1000.0);
        let base = self.settings.reliable_resend.max(srtt.mul_f32(1.5));
        let factor = self
            .settings
            .reliable_backoff
            .powi(attempts.saturating_sub(1).min(32) as i32);
        base.mul_f32(factor).min(MAX_RESEND_DELAY)
    }

    fn is_due(&self, pending: &PendingReliable, now: Instant) -> bool {
        match pending.last_sent {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.resend_delay(pending.attempts),
        }
    }

    /// Indices into `reliable_out` that go into the next packet.
    fn select_reliable(&self, now: Instant) -> Vec<usize> {
        let mut selected = Vec::new();
        let mut bytes = 0;

        for (index, pending) in self.reliable_out.iter().enumerate() {
            if !self.is_due(pending, now) {
                continue;
            }
            if selected.len() >= self.settings.max_reliable_per_packet {
                break;
            }
            if !selected.is_empty() && bytes + pending.payload.len() > self.settings.mtu {
                break;
            }
            selected.push(index);
            bytes += pending.payload.len();
            if bytes > self.settings.mtu {
                // Oversized message goes out alone as a fragment series.
                break;
            }
        }
        selected
    }

    /// Sends at most one packet (or one fragment series). Returns whether
    /// anything went out.
    pub fn flush<S: DatagramSocket + ?Sized>(
        &mut self,
        socket: &mut S,
        now: Instant,
    ) -> Result<bool, NetError> {
        if self.fault.is_some() {
            return Ok(false);
        }

        let selected = self.select_reliable(now);
        if let Some(&index) = selected
            .iter()
            .find(|&&i| self.reliable_out[i].attempts >= self.settings.reliable_max_retries)
        {
            log::warn!(
                "Reliable message {} to {} unacknowledged after {} attempts",
                self.reliable_out[index].id,
                self.remote,
                self.reliable_out[index].attempts
            );
            self.fault = Some(ChannelFault::RetriesExhausted);
            return Ok(false);
        }

        let reliable_bytes: usize = selected
            .iter()
            .map(|&i| self.reliable_out[i].payload.len())
            .sum();
        let include_unreliable = match &self.unreliable_out {
            Some(pending) => {
                selected.is_empty() || reliable_bytes + pending.payload.len() <= self.settings.mtu
            }
            None => false,
        };

        let keepalive_due = self
            .last_sent
            .is_none_or(|at| now.saturating_duration_since(at) >= self.settings.keepalive);
        if selected.is_empty() && !include_unreliable && !self.ack_owed && !keepalive_due {
            return Ok(false);
        }

        if self.limiter.is_over_budget(now) {
            self.stats.sends_deferred += 1;
            return Ok(false);
        }

        let unreliable = if include_unreliable {
            self.unreliable_out.take()
        } else {
            None
        };

        let mut writer = BitWriter::with_capacity(reliable_bytes + 64);
        writer.write_varint(selected.len() as u64);
        for &index in &selected {
            let pending = &self.reliable_out[index];
            writer.write_u32(pending.id);
            writer.write_blob(&pending.payload);
        }
        writer.write_u8(unreliable.is_some() as u8);
        if let Some(pending) = &unreliable {
            writer.write_blob(&pending.payload);
        }
        let (body, compressed) = self.pack_body(writer.finish());

        let mut flags = PacketFlags::empty();
        if compressed {
            flags |= PacketFlags::COMPRESSED;
        }
        if !selected.is_empty() {
            flags |= PacketFlags::RELIABLE;
        }
        if unreliable.is_some() {
            flags |= PacketFlags::UNRELIABLE;
        }

        let sequence = self.local_sequence;
        self.local_sequence = self.local_sequence.wrapping_add(1);
        let (ack, ack_bitfield) = self.receive_tracker.ack_data();
        let header = PacketHeader::new(sequence, ack, ack_bitfield, flags);

        let message_bytes = reliable_bytes + unreliable.as_ref().map_or(0, |u| u.payload.len());
        let count = fragment_count(message_bytes, self.settings.mtu);
        let total = u16::try_from(count).map_err(|_| NetError::MessageTooLarge {
            size: message_bytes,
            max: MAX_MESSAGE_SIZE,
        })?;

        if total == 1 {
            self.transmit(socket, &header, &body, now)?;
        } else {
            for (index, chunk) in split_even(&body, count).into_iter().enumerate() {
                let fragment = header.fragment(index as u16, total);
                self.transmit(socket, &fragment, chunk, now)?;
                self.stats.fragments_sent += 1;
            }
        }

        let mut reliable_ids = Vec::with_capacity(selected.len());
        for &index in &selected {
            let pending = &mut self.reliable_out[index];
            if pending.attempts > 0 {
                self.stats.reliable_resends += 1;
                log::debug!(
                    "Resending reliable {} to {} (attempt {})",
                    pending.id,
                    self.remote,
                    pending.attempts + 1
                );
            }
            pending.attempts += 1;
            pending.last_sent = Some(now);
            reliable_ids.push(pending.id);
        }

        let tag = unreliable.and_then(|u| u.tag);
        let evicted = self.ack_tracker.track_packet(sequence, reliable_ids, tag, now);
        self.stats.packets_lost += evicted as u64;

        self.ack_owed = false;
        self.last_sent = Some(now);
        Ok(true)
    }

    fn pack_body(&mut self, body: Vec<u8>) -> (Vec<u8>, bool) {
        if self.settings.compress {
            let packed = compress_zero_runs(&body);
            if packed.len() < body.len() {
                self.stats.outgoing_compression = compression_ratio(body.len(), packed.len());
                return (packed, true);
            }
        }
        self.stats.outgoing_compression = 1.0;
        (body, false)
    }

    fn transmit<S: DatagramSocket + ?Sized>(
        &mut self,
        socket: &mut S,
        header: &PacketHeader,
        chunk: &[u8],
        now: Instant,
    ) -> Result<(), NetError> {
        let mut writer = BitWriter::with_capacity(HEADER_SIZE + chunk.len());
        header.write(&mut writer);
        writer.write_bytes(chunk);
        let datagram = writer.finish();

        match socket.send_to(&datagram, self.remote) {
            Ok(_) => {}
            Err(e) if is_transient(&e) => {
                log::debug!("Transient send error to {}: {}", self.remote, e);
            }
            Err(e) => return Err(NetError::NetworkDown(e)),
        }

        self.limiter.record(datagram.len(), now);
        self.outgoing_meter.record(datagram.len(), now);
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += datagram.len() as u64;
        Ok(())
    }

    /// Feeds one datagram from the peer. Completed messages become
    /// available through [`receive`](Self::receive).
    pub fn process(&mut self, header: &PacketHeader, payload: &[u8], now: Instant) -> Receipt {
        self.last_received = now;
        let wire_len = HEADER_SIZE + payload.len();
        self.stats.packets_received += 1;
        self.stats.bytes_received += wire_len as u64;
        self.incoming_meter.record(wire_len, now);

        self.stats.fragment_runs_expired += self.fragments.evict_expired(now) as u64;

        if !self.receive_tracker.is_acceptable(header.sequence) {
            self.stats.duplicates_dropped += 1;
            return Receipt::Duplicate;
        }

        let assembled;
        let body = if header.is_fragment() {
            self.stats.fragments_received += 1;
            match self.fragments.insert(header, payload, now) {
                FragmentOutcome::Complete(body) => {
                    assembled = body;
                    assembled.as_slice()
                }
                FragmentOutcome::Incomplete => return Receipt::Buffered,
                FragmentOutcome::Duplicate => {
                    self.stats.duplicates_dropped += 1;
                    return Receipt::Duplicate;
                }
                FragmentOutcome::Inconsistent => {
                    self.stats.malformed_dropped += 1;
                    return Receipt::Malformed;
                }
            }
        } else {
            payload
        };

        let unpacked;
        let (body, ratio) = if header.flags.contains(PacketFlags::COMPRESSED) {
            match decompress_zero_runs(body, self.max_body) {
                Ok(data) => {
                    unpacked = data;
                    let ratio = compression_ratio(unpacked.len(), body.len());
                    (unpacked.as_slice(), ratio)
                }
                Err(e) => {
                    log::debug!("Bad compressed packet {} from {}: {}", header.sequence, self.remote, e);
                    self.stats.malformed_dropped += 1;
                    return Receipt::Malformed;
                }
            }
        } else {
            (body, 1.0)
        };

        let body = match decode_body(body) {
            Ok(body) => body,
            Err(e) => {
                log::debug!("Malformed packet {} from {}: {}", header.sequence, self.remote, e);
                self.stats.malformed_dropped += 1;
                return Receipt::Malformed;
            }
        };

        self.stats.incoming_compression = ratio;
        let previous = self.receive_tracker.highest();
        self.receive_tracker.record_received(header.sequence);
        let gap = header.sequence.wrapping_sub(previous).saturating_sub(1).min(ACK_WINDOW);
        self.loss_meter.record(1, gap, now);
        self.fragments.evict_superseded(header.sequence);

        let outcome = self
            .ack_tracker
            .process_ack(header.ack, header.ack_bitfield, now);
        self.stats.packets_lost += outcome.lost as u64;
        if !outcome.reliable_ids.is_empty() {
            let acked: HashSet<u32> = outcome.reliable_ids.into_iter().collect();
            self.reliable_out.retain(|pending| !acked.contains(&pending.id));
        }
        self.acked_tags.extend(outcome.tags);

        if header
            .flags
            .intersects(PacketFlags::RELIABLE | PacketFlags::UNRELIABLE)
        {
            self.ack_owed = true;
        }

        for (id, payload) in body.reliable {
            self.accept_reliable(id, payload);
        }
        if let Some(payload) = body.unreliable {
            self.delivered.push_back(Message {
                reliability: Reliability::Unreliable,
                sequence: header.sequence,
                payload,
            });
        }

        Receipt::Accepted
    }

    fn accept_reliable(&mut self, id: u32, payload: Vec<u8>) {
        let last_delivered = self.next_expected_reliable.wrapping_sub(1);
        if !sequence_greater_than(id, last_delivered)
            || id.wrapping_sub(self.next_expected_reliable) >= MAX_RELIABLE_WINDOW
        {
            return;
        }
        self.reliable_in.entry(id).or_insert(payload);

        while let Some(payload) = self.reliable_in.remove(&self.next_expected_reliable) {
            self.delivered.push_back(Message {
                reliability: Reliability::Reliable,
                sequence: self.next_expected_reliable,
                payload,
            });
            self.next_expected_reliable = self.next_expected_reliable.wrapping_add(1);
        }
    }

    pub fn receive(&mut self) -> Option<Message> {
        self.delivered.pop_front()
    }

    /// Snapshot ticks whose carrying packet the peer acknowledged.
    pub fn drain_acked_tags(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.acked_tags)
    }

    /// Reports a timeout or retry exhaustion, once per channel.
    pub fn poll_fault(&mut self, now: Instant) -> Option<ChannelFault> {
        if self.fault_reported {
            return None;
        }
        self.stats.fragment_runs_expired += self.fragments.evict_expired(now) as u64;

        if self.fault.is_none()
            && now.saturating_duration_since(self.last_received) > self.settings.silence_timeout
        {
            self.fault = Some(ChannelFault::TimedOut);
        }

        if self.fault.is_some() {
            self.fault_reported = true;
        }
        self.fault
    }

    pub fn fault(&self) -> Option<ChannelFault> {
        self.fault
    }

    pub fn set_max_rate(&mut self, bytes_per_sec: u32) {
        self.limiter.set_max_rate(bytes_per_sec);
    }

    pub fn max_rate(&self) -> u32 {
        self.limiter.max_rate()
    }

    pub fn is_over_budget(&mut self, now: Instant) -> bool {
        self.limiter.is_over_budget(now)
    }

    pub fn pending_reliable(&self) -> usize {
        self.reliable_out.len()
    }

    pub fn has_pending_unreliable(&self) -> bool {
        self.unreliable_out.is_some()
    }

    pub fn rtt(&self) -> Duration {
        Duration::from_secs_f32(self.ack_tracker.srtt().max(0.0) / 1000.0)
    }

    pub fn last_received(&self) -> Instant {
        self.last_received
    }

    /// Marks the peer as alive for out-of-band traffic that bypasses the
    /// channel.
    pub fn touch(&mut self, now: Instant) {
        self.last_received = now;
    }

    pub fn stats(&self, now: Instant) -> NetworkStats {
        NetworkStats {
            rtt_ms: self.ack_tracker.srtt(),
            rtt_variance: self.ack_tracker.rtt_var(),
            incoming_rate: self.incoming_meter.rate(now),
            outgoing_rate: self.outgoing_meter.rate(now),
            packet_loss_percent: self.loss_meter.loss_percent(now),
            ..self.stats.clone()
        }
    }
}

/// Largest encoded body a peer with the same settings can produce: one
/// message's worth of payload plus per-message framing.
fn max_body_size(max_reliable_per_packet: usize) -> usize {
    const FRAMING: usize = 4 + 3;
    MAX_MESSAGE_SIZE + 8 + FRAMING * (max_reliable_per_packet + 1)
}

fn decode_body(data: &[u8]) -> Result<Body, PacketError> {
    let mut reader = BitReader::new(data);

    let count = reader.read_varint()?;
    if count > MAX_MESSAGES_PER_BODY {
        return Err(PacketError::Malformed("too many messages"));
    }

    let mut reliable = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = reader.read_u32()?;
        let payload = read_message(&mut reader)?;
        reliable.push((id, payload));
    }

    let unreliable = match reader.read_u8()? {
        0 => None,
        1 => Some(read_message(&mut reader)?),
        _ => return Err(PacketError::Malformed("bad unreliable marker")),
    };

    if !reader.is_empty() {
        return Err(PacketError::Malformed("trailing bytes"));
    }

    Ok(Body {
        reliable,
        unreliable,
    })
}

fn read_message(reader: &mut BitReader<'_>) -> Result<Vec<u8>, PacketError> {
    let len = reader.read_varint()? as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(PacketError::Malformed("message too large"));
    }
    Ok(reader.read_bytes(len)?)
}
