mod simulation;
mod tui;

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use netsync::{DatagramSocket, LossySocket, NetConfig, ServerEvent, SessionServer, UdpEndpoint};
use simulation::Arena;
use tui::TuiState;

type Server = SessionServer<Box<dyn DatagramSocket>, Arena>;

#[derive(Parser)]
#[command(name = "netsync-server")]
#[command(about = "Authoritative netsync session server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = netsync::DEFAULT_PORT)]
    port: u16,

    /// RON configuration file; command line flags override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective configuration to this file and exit.
    #[arg(long)]
    write_config: Option<PathBuf>,

    #[arg(short, long)]
    tick_rate: Option<u32>,

    #[arg(short, long)]
    max_clients: Option<usize>,

    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    map: Option<String>,

    #[arg(long)]
    headless: bool,

    #[arg(long, default_value_t = 0.0, help = "Outgoing packet loss percentage (0-100)")]
    loss: f32,
}

impl Args {
    fn net_config(&self) -> Result<NetConfig> {
        let mut config = match &self.config {
            Some(path) => NetConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => NetConfig::default(),
        };
        if let Some(tick_rate) = self.tick_rate {
            config.tick_rate = tick_rate;
        }
        if let Some(max_clients) = self.max_clients {
            config.max_clients = max_clients;
        }
        if let Some(name) = &self.name {
            config.server_name = name.clone();
        }
        if let Some(map) = &self.map {
            config.map_name = map.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.net_config()?;

    if let Some(path) = &args.write_config {
        config.save(path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let bind_addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .context("invalid bind address")?;
    let endpoint = UdpEndpoint::bind(bind_addr)
        .with_context(|| format!("binding {}", bind_addr))?;
    let socket: Box<dyn DatagramSocket> = if args.loss > 0.0 {
        Box::new(LossySocket::new(endpoint, args.loss, rand::random()))
    } else {
        Box::new(endpoint)
    };

    let mut server = SessionServer::new(socket, Arena::new(), config);

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        log::info!("Server started on {}", server.local_addr()?);
        run_headless(&mut server)?;
    } else {
        run_with_tui(&mut server)?;
    }

    Ok(())
}

fn run_headless(server: &mut Server) -> Result<()> {
    let mut last_report = Instant::now();
    loop {
        let now = Instant::now();
        server.update(now)?;

        for event in server.drain_events() {
            if let ServerEvent::Error { message } = event {
                log::error!("{}", message);
            }
        }

        if now.duration_since(last_report) >= Duration::from_secs(10) {
            let stats = server.stats(now);
            log::info!(
                "tick {} | {} clients | {} entities | {:.1}% loss",
                stats.tick,
                stats.client_count,
                server.simulation().entity_count(),
                stats.network.packet_loss_percent
            );
            last_report = now;
        }

        std::thread::sleep(Duration::from_millis(1));
    }
}

fn log_event(tui_state: &mut TuiState, event: ServerEvent) {
    match event {
        ServerEvent::ClientConnecting { addr } => {
            tui_state.log_info(format!("Connection request from {}", addr));
        }
        ServerEvent::ClientConnected { handle, addr } => {
            tui_state.log_info(format!(
                "Client {}#{} connected from {}",
                handle.index, handle.generation, addr
            ));
        }
        ServerEvent::ClientDisconnected {
            handle,
            addr,
            reason,
        } => {
            tui_state.log_info(format!(
                "Client {}#{} ({}) {}",
                handle.index,
                handle.generation,
                addr,
                reason.as_str()
            ));
        }
        ServerEvent::ConnectionDenied { addr, reason } => {
            tui_state.log_warn(format!("Connection denied to {}: {}", addr, reason.as_str()));
        }
        ServerEvent::Error { message } => tui_state.log_error(message),
    }
}

fn run_with_tui(server: &mut Server) -> Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut tui_state = TuiState::new();
    tui_state.log_info(format!("Server started on {}", server.local_addr()?));

    let result = tui_loop(server, &mut terminal, &mut tui_state);

    server.shutdown();
    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;
    result
}

fn tui_loop(
    server: &mut Server,
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    tui_state: &mut TuiState,
) -> Result<()> {
    loop {
        let now = Instant::now();
        server.update(now)?;

        let events: Vec<ServerEvent> = server.drain_events().collect();
        for event in events {
            log_event(tui_state, event);
        }

        if let Some(handle) = tui_state.take_pending_kick()
            && server.kick(handle).is_err()
        {
            tui_state.log_warn("Client already gone");
        }

        if event::poll(Duration::from_millis(1))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            let clients = server.client_infos(now);
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Up => tui_state.select_prev(clients.len()),
                KeyCode::Down => tui_state.select_next(clients.len()),
                KeyCode::Char('k') | KeyCode::Char('K') => tui_state.request_kick(&clients),
                _ => {}
            }
        }

        let stats = server.stats(now);
        let clients = server.client_infos(now);
        terminal.draw(|frame| {
            tui::render(frame, tui_state, &stats, &clients);
        })?;
    }
}
