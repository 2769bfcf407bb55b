use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Seconds worth of traffic the bucket may hold before sends are deferred.
const BURST_SECS: f64 = 0.25;
const RATE_WINDOW: Duration = Duration::from_secs(1);
const LOSS_WINDOW: Duration = Duration::from_secs(5);

/// Leaky bucket over bytes and packets per second. A limit of zero disables
/// that dimension.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_bytes_per_sec: u32,
    max_packets_per_sec: u32,
    byte_level: f64,
    packet_level: f64,
    last_drain: Option<Instant>,
}

impl RateLimiter {
    pub fn new(max_bytes_per_sec: u32, max_packets_per_sec: u32) -> Self {
        Self {
            max_bytes_per_sec,
            max_packets_per_sec,
            byte_level: 0.0,
            packet_level: 0.0,
            last_drain: None,
        }
    }

    pub fn set_max_rate(&mut self, max_bytes_per_sec: u32) {
        self.max_bytes_per_sec = max_bytes_per_sec;
    }

    pub fn max_rate(&self) -> u32 {
        self.max_bytes_per_sec
    }

    fn drain(&mut self, now: Instant) {
        if let Some(last) = self.last_drain {
            let dt = now.saturating_duration_since(last).as_secs_f64();
            self.byte_level = (self.byte_level - dt * self.max_bytes_per_sec as f64).max(0.0);
            self.packet_level = (self.packet_level - dt * self.max_packets_per_sec as f64).max(0.0);
        }
        self.last_drain = Some(now);
    }

    pub fn is_over_budget(&mut self, now: Instant) -> bool {
        self.drain(now);
        let bytes_over = self.max_bytes_per_sec > 0
            && self.byte_level > self.max_bytes_per_sec as f64 * BURST_SECS;
        let packets_over = self.max_packets_per_sec > 0
            && self.packet_level > (self.max_packets_per_sec as f64 * BURST_SECS).max(1.0);
        bytes_over || packets_over
    }

    pub fn record(&mut self, bytes: usize, now: Instant) {
        self.drain(now);
        if self.max_bytes_per_sec > 0 {
            self.byte_level += bytes as f64;
        }
        if self.max_packets_per_sec > 0 {
            self.packet_level += 1.0;
        }
    }
}

/// Average byte rate over the trailing second.
#[derive(Debug, Clone, Default)]
pub struct RateMeter {
    samples: VecDeque<(Instant, usize)>,
}

impl RateMeter {
    pub fn record(&mut self, bytes: usize, now: Instant) {
        self.samples.push_back((now, bytes));
        self.expire(now);
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&(at, _)) = self.samples.front() {
            if now.saturating_duration_since(at) <= RATE_WINDOW {
                break;
            }
            self.samples.pop_front();
        }
    }

    /// Bytes per second.
    pub fn rate(&self, now: Instant) -> u32 {
        self.samples
            .iter()
            .filter(|(at, _)| now.saturating_duration_since(*at) <= RATE_WINDOW)
            .map(|&(_, bytes)| bytes)
            .sum::<usize>() as u32
    }
}

/// Incoming packet loss over the trailing five seconds, judged from gaps in
/// the accepted sequence numbers.
#[derive(Debug, Clone, Default)]
pub struct PacketLossMeter {
    samples: VecDeque<(Instant, u32, u32)>,
}

impl PacketLossMeter {
    pub fn record(&mut self, received: u32, dropped: u32, now: Instant) {
        self.samples.push_back((now, received, dropped));
        self.expire(now);
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&(at, _, _)) = self.samples.front() {
            if now.saturating_duration_since(at) <= LOSS_WINDOW {
                break;
            }
            self.samples.pop_front();
        }
    }

    pub fn loss_percent(&self, now: Instant) -> f32 {
        let (received, dropped) = self
            .samples
            .iter()
            .filter(|(at, _, _)| now.saturating_duration_since(*at) <= LOSS_WINDOW)
            .fold((0u64, 0u64), |(r, d), &(_, rx, dx)| (r + rx as u64, d + dx as u64));
        let total = received + dropped;
        if total == 0 {
            return 0.0;
        }
        dropped as f32 * 100.0 / total as f32
    }
}
