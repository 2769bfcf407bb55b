use std::collections::VecDeque;
use std::time::Instant;

use super::protocol::sequence_greater_than;

/// How far back the ack bitfield reaches.
pub const ACK_WINDOW: u32 = 32;

#[derive(Debug, Clone)]
pub struct SentPacket {
    pub sequence: u32,
    pub send_time: Instant,
    pub reliable_ids: Vec<u32>,
    /// Snapshot tick carried by the packet, if any.
    pub tag: Option<u32>,
    pub acked: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AckOutcome {
    pub acked_sequences: Vec<u32>,
    pub reliable_ids: Vec<u32>,
    pub tags: Vec<u32>,
    pub lost: u32,
}

#[derive(Debug)]
pub struct AckTracker {
    pending: VecDeque<SentPacket>,
    max_pending: usize,
    srtt: f32,
    rtt_var: f32,
    sampled: bool,
}

impl AckTracker {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(max_pending),
            max_pending,
            srtt: 100.0,
            rtt_var: 50.0,
            sampled: false,
        }
    }

    /// Returns how many unacked packets were pushed out to make room.
    pub fn track_packet(
        &mut self,
        sequence: u32,
        reliable_ids: Vec<u32>,
        tag: Option<u32>,
        now: Instant,
    ) -> u32 {
        let mut evicted = 0;
        while self.pending.len() >= self.max_pending {
            if let Some(old) = self.pending.pop_front()
                && !old.acked
            {
                evicted += 1;
            }
        }

        self.pending.push_back(SentPacket {
            sequence,
            send_time: now,
            reliable_ids,
            tag,
            acked: false,
        });
        evicted
    }

    pub fn process_ack(&mut self, ack: u32, ack_bitfield: u32, now: Instant) -> AckOutcome {
        let mut outcome = AckOutcome::default();
        let mut rtt_samples = Vec::new();

        for pending in &mut self.pending {
            if pending.acked {
                continue;
            }

            let is_acked = if pending.sequence == ack {
                true
            } else if sequence_greater_than(ack, pending.sequence) {
                let diff = ack.wrapping_sub(pending.sequence);
                diff <= ACK_WINDOW && (ack_bitfield & (1 << (diff - 1))) != 0
            } else {
                false
            };

            if is_acked {
                pending.acked = true;
                outcome.acked_sequences.push(pending.sequence);
                outcome.reliable_ids.extend_from_slice(&pending.reliable_ids);
                outcome.tags.extend(pending.tag);

                let rtt = now.duration_since(pending.send_time).as_secs_f32() * 1000.0;
                rtt_samples.push(rtt);
            }
        }

        for rtt in rtt_samples {
            self.update_rtt(rtt);
        }

        // Anything this far behind the newest ack can no longer be acknowledged.
        while let Some(front) = self.pending.front() {
            let behind = sequence_greater_than(ack, front.sequence)
                && ack.wrapping_sub(front.sequence) > ACK_WINDOW;
            if !(front.acked || behind) {
                break;
            }
            if !front.acked {
                outcome.lost += 1;
            }
            self.pending.pop_front();
        }

        outcome
    }

    fn update_rtt(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        if !self.sampled {
            self.srtt = rtt;
            self.rtt_var = rtt / 2.0;
            self.sampled = true;
            return;
        }

        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    /// Smoothed round trip in milliseconds.
    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    pub fn unacked_count(&self) -> usize {
        self.pending.iter().filter(|p| !p.acked).count()
    }
}

/// Incoming side of the ack exchange.
///
/// Only sequences newer than the highest accepted one get through, so a
/// redelivered or reordered-behind datagram never disturbs the bitfield.
#[derive(Debug)]
pub struct ReceiveTracker {
    highest: u32,
    received_bitfield: u32,
    received_any: bool,
}

impl ReceiveTracker {
    /// `first_expected` is the peer's initial sequence from the handshake.
    pub fn new(first_expected: u32) -> Self {
        Self {
            highest: first_expected.wrapping_sub(1),
            received_bitfield: 0,
            received_any: false,
        }
    }

    pub fn was_received(&self, sequence: u32) -> bool {
        if !self.received_any {
            return false;
        }
        if sequence == self.highest {
            return true;
        }
        if sequence_greater_than(sequence, self.highest) {
            return false;
        }
        let diff = self.highest.wrapping_sub(sequence);
        diff <= ACK_WINDOW && self.received_bitfield & (1 << (diff - 1)) != 0
    }

    pub fn is_acceptable(&self, sequence: u32) -> bool {
        sequence_greater_than(sequence, self.highest) && !self.was_received(sequence)
    }

    /// Marks `sequence` received. Returns false if it was stale or a duplicate.
    pub fn record_received(&mut self, sequence: u32) -> bool {
        if !self.is_acceptable(sequence) {
            return false;
        }

        let diff = sequence.wrapping_sub(self.highest);
        let previous = if self.received_any {
            if diff < ACK_WINDOW {
                1u32 << (diff - 1)
            } else if diff == ACK_WINDOW {
                1u32 << 31
            } else {
                0
            }
        } else {
            0
        };

        self.received_bitfield = if diff < ACK_WINDOW {
            (self.received_bitfield << diff) | previous
        } else {
            previous
        };
        self.highest = sequence;
        self.received_any = true;
        true
    }

    pub fn highest(&self) -> u32 {
        self.highest
    }

    pub fn ack_data(&self) -> (u32, u32) {
        (self.highest, self.received_bitfield)
    }
}
