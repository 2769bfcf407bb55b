#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub fragments_sent: u64,
    pub fragments_received: u64,
    /// Stale or duplicate datagrams dropped on receive.
    pub duplicates_dropped: u64,
    pub malformed_dropped: u64,
    pub fragment_runs_expired: u64,
    pub reliable_resends: u64,
    /// Flushes held back by the rate limiter.
    pub sends_deferred: u64,
    pub rtt_ms: f32,
    pub rtt_variance: f32,
    pub incoming_rate: u32,
    pub outgoing_rate: u32,
    pub packet_loss_percent: f32,
    /// Packed over original size of the last body sent.
    pub outgoing_compression: f32,
    pub incoming_compression: f32,
}

impl NetworkStats {
    /// Adds the counters of `other`; rates and timings take the worse value.
    pub fn accumulate(&mut self, other: &NetworkStats) {
        self.packets_sent += other.packets_sent;
        self.packets_received += other.packets_received;
        self.packets_lost += other.packets_lost;
        self.bytes_sent += other.bytes_sent;
        self.bytes_received += other.bytes_received;
        self.fragments_sent += other.fragments_sent;
        self.fragments_received += other.fragments_received;
        self.duplicates_dropped += other.duplicates_dropped;
        self.malformed_dropped += other.malformed_dropped;
        self.fragment_runs_expired += other.fragment_runs_expired;
        self.reliable_resends += other.reliable_resends;
        self.sends_deferred += other.sends_deferred;
        self.incoming_rate += other.incoming_rate;
        self.outgoing_rate += other.outgoing_rate;
        self.rtt_ms = self.rtt_ms.max(other.rtt_ms);
        self.rtt_variance = self.rtt_variance.max(other.rtt_variance);
        self.packet_loss_percent = self.packet_loss_percent.max(other.packet_loss_percent);
        self.outgoing_compression = self.outgoing_compression.max(other.outgoing_compression);
        self.incoming_compression = self.incoming_compression.max(other.incoming_compression);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate() {
        let mut total = NetworkStats::default();
        let a = NetworkStats {
            packets_sent: 3,
            rtt_ms: 40.0,
            outgoing_rate: 100,
            outgoing_compression: 0.5,
            ..Default::default()
        };
        let b = NetworkStats {
            packets_sent: 2,
            rtt_ms: 25.0,
            outgoing_rate: 50,
            outgoing_compression: 0.8,
            ..Default::default()
        };

        total.accumulate(&a);
        total.accumulate(&b);

        assert_eq!(total.packets_sent, 5);
        assert_eq!(total.outgoing_rate, 150);
        assert_eq!(total.rtt_ms, 40.0);
        assert_eq!(total.outgoing_compression, 0.8);
    }
}
