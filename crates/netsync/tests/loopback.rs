use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use netsync::{
    ClientEvent, ClientSession, DiscoveryScanner, NetConfig, ServerEvent, SessionServer,
    Simulation, UdpEndpoint, WorldState,
};

struct Idle;

impl Simulation for Idle {
    fn advance(&mut self, _tick: u32, _dt: Duration) {}

    fn capture(&self, tick: u32) -> WorldState {
        WorldState::new(tick)
    }
}

fn localhost() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

#[test]
fn test_loopback_handshake_and_event() {
    let config = NetConfig {
        server_name: "loopback".into(),
        ..Default::default()
    };
    let socket = UdpEndpoint::bind(localhost()).unwrap();
    let mut server = SessionServer::new(socket, Idle, config);
    let server_addr = server.local_addr().unwrap();

    let mut client = ClientSession::new(UdpEndpoint::bind(localhost()).unwrap(), NetConfig::default());
    client.connect(server_addr, Instant::now()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut welcomed = false;
    let mut events = Vec::new();
    while Instant::now() < deadline && !welcomed {
        let now = Instant::now();
        server.update(now).unwrap();
        let connected: Vec<ServerEvent> = server.drain_events().collect();
        for event in connected {
            if let ServerEvent::ClientConnected { handle, .. } = event {
                server.send_event(handle, b"hi").unwrap();
            }
        }
        client.update(now).unwrap();
        events.extend(client.drain_events());
        welcomed = events.contains(&ClientEvent::Event(b"hi".to_vec()));
        thread::sleep(Duration::from_millis(1));
    }

    assert!(client.is_spawned());
    assert!(welcomed);
    assert_eq!(server.connected_count(), 1);
}

#[test]
fn test_loopback_info_query() {
    let config = NetConfig {
        server_name: "lan party".into(),
        map_name: "q2dm1".into(),
        ..Default::default()
    };
    let mut server = SessionServer::new(UdpEndpoint::bind(localhost()).unwrap(), Idle, config);
    let server_addr = server.local_addr().unwrap();

    let scan_config = NetConfig {
        discovery_broadcast: false,
        ..Default::default()
    };
    let mut scanner = DiscoveryScanner::new(UdpEndpoint::bind(localhost()).unwrap(), &scan_config);
    scanner.query(server_addr, Instant::now()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && scanner.results().is_empty() {
        let now = Instant::now();
        server.update(now).unwrap();
        scanner.poll(now).unwrap();
        thread::sleep(Duration::from_millis(1));
    }

    let results = scanner.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].address, server_addr);
    assert_eq!(results[0].name, "lan party");
    assert_eq!(results[0].map, "q2dm1");
    assert_eq!(results[0].players, 0);
}
