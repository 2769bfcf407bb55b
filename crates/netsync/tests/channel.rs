use std::net::SocketAddr;
use std::time::{Duration, Instant};

use netsync::net::{ChannelSettings, Datagram, MAX_DATAGRAM_SIZE, classify};
use netsync::{
    DatagramSocket, LinkConditions, MessageChannel, NetConfig, NetworkSimulator, Reliability,
    SharedNetwork, SimulatedSocket,
};

const STEP: Duration = Duration::from_millis(5);

struct Peer {
    socket: SimulatedSocket,
    channel: MessageChannel,
}

impl Peer {
    /// Feeds every waiting datagram to the channel and returns the payloads
    /// it delivered.
    fn pump(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        while let Some((len, _)) = self.socket.try_recv_from(&mut buf).unwrap() {
            if let Ok(Datagram::Channel { header, payload }) = classify(&buf[..len]) {
                self.channel.process(&header, payload, now);
            }
        }
        std::iter::from_fn(|| self.channel.receive())
            .map(|message| message.payload)
            .collect()
    }
}

fn peers(network: &SharedNetwork, config: &NetConfig, now: Instant) -> (Peer, Peer) {
    let a_addr: SocketAddr = "10.0.0.1:1000".parse().unwrap();
    let b_addr: SocketAddr = "10.0.0.2:2000".parse().unwrap();
    let settings = ChannelSettings::from(config);

    let a = Peer {
        socket: NetworkSimulator::bind(network, a_addr),
        channel: MessageChannel::connect(b_addr, settings.clone(), 7, 9000, now),
    };
    let b = Peer {
        socket: NetworkSimulator::bind(network, b_addr),
        channel: MessageChannel::accept(a_addr, settings, 9000, 7, now),
    };
    (a, b)
}

#[test]
fn test_reliable_order_under_loss_and_jitter() {
    let start = Instant::now();
    let network = NetworkSimulator::shared(0xD1CE, start);
    network.borrow_mut().set_default_conditions(LinkConditions {
        loss_percent: 20.0,
        latency: Duration::from_millis(30),
        jitter: Duration::from_millis(20),
        duplicate_percent: 5.0,
    });

    let config = NetConfig::default();
    let (mut a, mut b) = peers(&network, &config, start);

    for i in 0..1000u32 {
        a.channel
            .send(i.to_le_bytes().to_vec(), Reliability::Reliable)
            .unwrap();
    }

    let mut received = Vec::new();
    let mut now = start;
    while received.len() < 1000 && now < start + Duration::from_secs(300) {
        now += STEP;
        network.borrow_mut().advance_to(now);

        a.pump(now);
        received.extend(b.pump(now));
        a.channel.flush(&mut a.socket, now).unwrap();
        b.channel.flush(&mut b.socket, now).unwrap();

        assert!(a.channel.fault().is_none());
    }

    let values: Vec<u32> = received
        .iter()
        .map(|p| u32::from_le_bytes(p.as_slice().try_into().unwrap()))
        .collect();
    assert_eq!(values, (0..1000).collect::<Vec<_>>());
    assert!(network.borrow().dropped() > 0);
    assert!(a.channel.stats(now).reliable_resends > 0);
}

#[test]
fn test_fragmented_message_survives_reordering() {
    let start = Instant::now();
    let network = NetworkSimulator::shared(11, start);
    network.borrow_mut().set_default_conditions(LinkConditions {
        jitter: Duration::from_millis(40),
        ..LinkConditions::latency(Duration::from_millis(10))
    });

    let config = NetConfig::default();
    let (mut a, mut b) = peers(&network, &config, start);

    let big: Vec<u8> = (0..4200u32).map(|i| (i % 251) as u8).collect();
    a.channel.send(big.clone(), Reliability::Reliable).unwrap();
    a.channel.flush(&mut a.socket, start).unwrap();
    assert_eq!(a.channel.stats(start).fragments_sent, 3);

    let mut received = Vec::new();
    let mut now = start;
    while received.is_empty() && now < start + Duration::from_secs(5) {
        now += STEP;
        network.borrow_mut().advance_to(now);
        received.extend(b.pump(now));
    }

    assert_eq!(received, vec![big]);
}

#[test]
fn test_unreliable_latest_wins() {
    let start = Instant::now();
    let network = NetworkSimulator::shared(5, start);
    let config = NetConfig::default();
    let (mut a, mut b) = peers(&network, &config, start);

    a.channel.send(b"tick 1".to_vec(), Reliability::Unreliable).unwrap();
    a.channel.send(b"tick 2".to_vec(), Reliability::Unreliable).unwrap();
    a.channel.flush(&mut a.socket, start).unwrap();

    assert_eq!(b.pump(start), vec![b"tick 2".to_vec()]);
    assert!(!a.channel.has_pending_unreliable());

    // Nothing to resend once the unreliable payload is gone.
    let later = start + Duration::from_millis(1);
    assert!(!a.channel.flush(&mut a.socket, later).unwrap());
}
