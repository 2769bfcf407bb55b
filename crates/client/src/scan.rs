use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::Result;

use netsync::{DiscoveryScanner, NetConfig, ServerInfo, UdpEndpoint};

pub fn run(config: &NetConfig, extra: &[SocketAddr]) -> Result<()> {
    let socket = UdpEndpoint::bind_broadcast("0.0.0.0:0".parse()?)?;
    let mut scanner = DiscoveryScanner::new(socket, config);

    let now = Instant::now();
    scanner.start_scan(now)?;
    for &addr in extra {
        scanner.query(addr, now)?;
    }

    while scanner.is_scanning() {
        scanner.poll(Instant::now())?;
        std::thread::sleep(Duration::from_millis(2));
    }

    let servers = scanner.sorted_by_round_trip();
    if servers.is_empty() {
        println!("No servers found");
        return Ok(());
    }
    for info in &servers {
        println!("{}", format_row(info));
    }
    Ok(())
}

fn format_row(info: &ServerInfo) -> String {
    format!(
        "{:<22} {:>5.0}ms  {:>3}/{:<3} {:<16} {}",
        info.address,
        info.round_trip.as_secs_f64() * 1000.0,
        info.players,
        info.max_players,
        info.map,
        info.name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_row() {
        let info = ServerInfo {
            address: "10.0.0.1:27015".parse().unwrap(),
            name: "friday".into(),
            map: "dm2".into(),
            players: 3,
            max_players: 16,
            protocol_version: 1,
            round_trip: Duration::from_millis(12),
        };
        let row = format_row(&info);
        assert!(row.starts_with("10.0.0.1:27015"));
        assert!(row.contains("12ms"));
        assert!(row.contains("3/16"));
        assert!(row.ends_with("friday"));
    }
}
