use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::protocol::{PacketHeader, sequence_greater_than};

/// Number of datagrams needed to carry `message_bytes` at the given MTU.
pub fn fragment_count(message_bytes: usize, mtu: usize) -> usize {
    message_bytes.div_ceil(mtu.max(1)).max(1)
}

/// Splits `body` into `count` chunks whose sizes differ by at most one byte.
pub fn split_even(body: &[u8], count: usize) -> Vec<&[u8]> {
    let count = count.clamp(1, body.len().max(1));
    let base = body.len() / count;
    let extra = body.len() % count;

    let mut chunks = Vec::with_capacity(count);
    let mut offset = 0;
    for i in 0..count {
        let len = base + usize::from(i < extra);
        chunks.push(&body[offset..offset + len]);
        offset += len;
    }
    chunks
}

#[derive(Debug, PartialEq, Eq)]
pub enum FragmentOutcome {
    Incomplete,
    Complete(Vec<u8>),
    Duplicate,
    /// Fragment disagrees with what the run already holds.
    Inconsistent,
}

#[derive(Debug)]
struct PartialRun {
    parts: Vec<Option<Vec<u8>>>,
    received: usize,
    bytes: usize,
    started: Instant,
}

#[derive(Debug)]
pub struct FragmentAssembler {
    runs: HashMap<u32, PartialRun>,
    max_runs: usize,
    max_fragments: usize,
    max_body: usize,
    timeout: Duration,
}

impl FragmentAssembler {
    /// `max_body` bounds the bytes one run may hold; it also caps the
    /// fragment count a run may announce at `fragment_count(max_body, mtu)`.
    pub fn new(timeout: Duration, max_runs: usize, max_body: usize, mtu: usize) -> Self {
        Self {
            runs: HashMap::new(),
            max_runs: max_runs.max(1),
            max_fragments: fragment_count(max_body, mtu),
            max_body,
            timeout,
        }
    }

    pub fn insert(&mut self, header: &PacketHeader, payload: &[u8], now: Instant) -> FragmentOutcome {
        let total = header.fragment_total as usize;
        let index = header.fragment_index as usize;

        if total > self.max_fragments || index >= total {
            return FragmentOutcome::Inconsistent;
        }

        if !self.runs.contains_key(&header.sequence) && self.runs.len() >= self.max_runs {
            self.evict_oldest();
        }

        let run = self.runs.entry(header.sequence).or_insert_with(|| PartialRun {
            parts: vec![None; total],
            received: 0,
            bytes: 0,
            started: now,
        });

        if run.parts.len() != total {
            return FragmentOutcome::Inconsistent;
        }
        if run.parts[index].is_some() {
            return FragmentOutcome::Duplicate;
        }
        if run.bytes + payload.len() > self.max_body {
            self.runs.remove(&header.sequence);
            return FragmentOutcome::Inconsistent;
        }

        run.parts[index] = Some(payload.to_vec());
        run.received += 1;
        run.bytes += payload.len();

        if run.received < total {
            return FragmentOutcome::Incomplete;
        }

        let Some(run) = self.runs.remove(&header.sequence) else {
            return FragmentOutcome::Incomplete;
        };
        let body = run.parts.into_iter().flatten().flatten().collect();
        FragmentOutcome::Complete(body)
    }

    /// Drops runs older than the reassembly timeout. Returns how many went.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let before = self.runs.len();
        let timeout = self.timeout;
        self.runs
            .retain(|_, run| now.saturating_duration_since(run.started) < timeout);
        before - self.runs.len()
    }

    /// Drops runs that can no longer be accepted once `highest` was.
    pub fn evict_superseded(&mut self, highest: u32) -> usize {
        let before = self.runs.len();
        self.runs
            .retain(|&sequence, _| sequence_greater_than(sequence, highest));
        before - self.runs.len()
    }

    pub fn pending_runs(&self) -> usize {
        self.runs.len()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .runs
            .iter()
            .min_by_key(|(_, run)| run.started)
            .map(|(&sequence, _)| sequence);
        if let Some(sequence) = oldest {
            self.runs.remove(&sequence);
        }
    }
}
