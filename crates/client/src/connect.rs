use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};

use netsync::{
    ClientDisconnectReason, ClientEvent, ClientSession, DatagramSocket, LossySocket, NetConfig,
    Reliability, UdpEndpoint,
};

const REPORT_INTERVAL: Duration = Duration::from_secs(2);
const FIRE_COMMAND: u8 = b'F';

pub struct Options {
    pub duration: Option<Duration>,
    pub fire_every: Option<Duration>,
    pub loss: f32,
}

pub fn run(config: NetConfig, server: SocketAddr, options: Options) -> Result<()> {
    let endpoint = UdpEndpoint::bind("0.0.0.0:0".parse()?)?;
    let socket: Box<dyn DatagramSocket> = if options.loss > 0.0 {
        Box::new(LossySocket::new(endpoint, options.loss, 0x5EED))
    } else {
        Box::new(endpoint)
    };

    let mut session = ClientSession::new(socket, config);
    let started = Instant::now();
    session.connect(server, started)?;

    let mut last_report = started;
    let mut last_fire = started;
    let mut snapshots = 0u32;
    let mut joined = false;

    loop {
        let now = Instant::now();
        session.update(now)?;

        for event in session.drain_events() {
            match event {
                ClientEvent::Connected { slot } => {
                    joined = true;
                    log::info!("Joined {} in slot {}", server, slot);
                }
                ClientEvent::Snapshot { .. } => snapshots += 1,
                ClientEvent::Event(payload) => {
                    log::info!("Server event: {}", String::from_utf8_lossy(&payload))
                }
                ClientEvent::Disconnected(reason) => return session_ended(server, joined, reason),
            }
        }

        if session.is_spawned() {
            if let Some(every) = options.fire_every
                && now.duration_since(last_fire) >= every
            {
                session.send(vec![FIRE_COMMAND], Reliability::Reliable)?;
                last_fire = now;
            }

            if now.duration_since(last_report) >= REPORT_INTERVAL {
                report(&mut session, now, snapshots);
                snapshots = 0;
                last_report = now;
            }
        }

        if options
            .duration
            .is_some_and(|limit| now.duration_since(started) >= limit)
        {
            session.disconnect(now)?;
            log::info!("Done after {:?}", now.duration_since(started));
            return Ok(());
        }

        std::thread::sleep(Duration::from_millis(1));
    }
}

/// A session that never joined is a failure; one that did ended normally.
fn session_ended(server: SocketAddr, joined: bool, reason: ClientDisconnectReason) -> Result<()> {
    if !joined {
        bail!("connection to {} failed: {}", server, reason.as_str());
    }
    log::info!("Disconnected: {}", reason.as_str());
    Ok(())
}

fn report<S: DatagramSocket>(session: &mut ClientSession<S>, now: Instant, snapshots: u32) {
    let stats = session.stats(now);
    let entities = session.sample(now);
    log::info!(
        "{} snapshots | {} entities | rtt {:.1}ms | in {}B/s ({:.0}%) out {}B/s | loss {:.1}%",
        snapshots,
        entities.len(),
        stats.rtt_ms,
        stats.incoming_rate,
        stats.incoming_compression * 100.0,
        stats.outgoing_rate,
        stats.packet_loss_percent
    );
    for entity in entities.iter().take(4) {
        log::debug!(
            "  entity {} type {} at ({:.2}, {:.2}, {:.2})",
            entity.id,
            entity.entity_type,
            entity.position.x,
            entity.position.y,
            entity.position.z
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsync::RejectReason;

    #[test]
    fn test_session_ended() {
        let server: SocketAddr = "10.0.0.1:27015".parse().unwrap();

        assert!(session_ended(server, true, ClientDisconnectReason::Kicked).is_ok());
        assert!(session_ended(server, true, ClientDisconnectReason::ServerTimeout).is_ok());

        let err = session_ended(
            server,
            false,
            ClientDisconnectReason::Rejected(RejectReason::ServerFull),
        )
        .unwrap_err();
        assert!(err.to_string().contains("10.0.0.1:27015"));
    }
}
