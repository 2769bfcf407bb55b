use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Challenge {
    token: u64,
    issued: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeCheck {
    Valid,
    /// No outstanding challenge for the address.
    Unknown,
    Expired,
    Mismatch,
}

/// Outstanding anti-spoof tokens, one per address.
#[derive(Debug)]
pub struct ChallengeTable {
    entries: HashMap<SocketAddr, Challenge>,
    lifetime: Duration,
    capacity: usize,
}

impl ChallengeTable {
    pub fn new(lifetime: Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lifetime,
            capacity: capacity.max(1),
        }
    }

    /// Records a fresh token for `addr`, replacing any earlier one.
    pub fn issue(&mut self, addr: SocketAddr, token: u64, now: Instant) -> u64 {
        if !self.entries.contains_key(&addr) && self.entries.len() >= self.capacity {
            self.evict(now);
        }
        self.entries.insert(addr, Challenge { token, issued: now });
        token
    }

    pub fn check(&self, addr: SocketAddr, token: u64, now: Instant) -> ChallengeCheck {
        let Some(entry) = self.entries.get(&addr) else {
            return ChallengeCheck::Unknown;
        };
        if now.saturating_duration_since(entry.issued) > self.lifetime {
            return ChallengeCheck::Expired;
        }
        if entry.token != token {
            return ChallengeCheck::Mismatch;
        }
        ChallengeCheck::Valid
    }

    /// Removes the token after a successful admission so it cannot be replayed.
    pub fn consume(&mut self, addr: SocketAddr) {
        self.entries.remove(&addr);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&mut self, now: Instant) {
        let lifetime = self.lifetime;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.issued) <= lifetime);
        if self.entries.len() < self.capacity {
            return;
        }

        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.issued)
            .map(|(&addr, _)| addr);
        if let Some(addr) = oldest {
            self.entries.remove(&addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    #[test]
    fn test_issue_and_validate() {
        let now = Instant::now();
        let mut table = ChallengeTable::new(Duration::from_secs(10), 16);
        table.issue(addr(1), 77, now);

        assert_eq!(table.check(addr(1), 77, now), ChallengeCheck::Valid);
        assert_eq!(table.check(addr(1), 78, now), ChallengeCheck::Mismatch);
        assert_eq!(table.check(addr(2), 77, now), ChallengeCheck::Unknown);
    }

    #[test]
    fn test_mismatch_keeps_valid_token() {
        let now = Instant::now();
        let mut table = ChallengeTable::new(Duration::from_secs(10), 16);
        table.issue(addr(1), 5, now);

        assert_eq!(table.check(addr(1), 4, now), ChallengeCheck::Mismatch);
        assert_eq!(table.check(addr(1), 5, now), ChallengeCheck::Valid);
    }

    #[test]
    fn test_reissue_replaces_token() {
        let now = Instant::now();
        let mut table = ChallengeTable::new(Duration::from_secs(10), 16);
        table.issue(addr(1), 5, now);
        table.issue(addr(1), 6, now);

        assert_eq!(table.check(addr(1), 5, now), ChallengeCheck::Mismatch);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_expiry_and_consume() {
        let now = Instant::now();
        let mut table = ChallengeTable::new(Duration::from_secs(10), 16);
        table.issue(addr(1), 5, now);

        assert_eq!(
            table.check(addr(1), 5, now + Duration::from_secs(11)),
            ChallengeCheck::Expired
        );

        table.consume(addr(1));
        assert_eq!(table.check(addr(1), 5, now), ChallengeCheck::Unknown);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let start = Instant::now();
        let mut table = ChallengeTable::new(Duration::from_secs(10), 2);
        table.issue(addr(1), 1, start);
        table.issue(addr(2), 2, start + Duration::from_millis(1));
        table.issue(addr(3), 3, start + Duration::from_millis(2));

        assert_eq!(table.len(), 2);
        assert_eq!(table.check(addr(1), 1, start), ChallengeCheck::Unknown);
        assert_eq!(table.check(addr(3), 3, start), ChallengeCheck::Valid);
    }
}
