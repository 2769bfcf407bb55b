use std::collections::VecDeque;
use std::time::Instant;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph, Row, Table};

use netsync::{ClientHandle, ClientInfo, ServerStats};

const MAX_LOG_LINES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

pub struct TuiState {
    started: Instant,
    log: VecDeque<(LogLevel, String)>,
    selected: usize,
    pending_kick: Option<ClientHandle>,
}

impl TuiState {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            log: VecDeque::new(),
            selected: 0,
            pending_kick: None,
        }
    }

    fn push(&mut self, level: LogLevel, message: String) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back((level, message));
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn log_warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    pub fn select_next(&mut self, count: usize) {
        if count > 0 {
            self.selected = (self.selected + 1) % count;
        }
    }

    pub fn select_prev(&mut self, count: usize) {
        if count > 0 {
            self.selected = (self.selected + count - 1) % count;
        }
    }

    pub fn request_kick(&mut self, clients: &[ClientInfo]) {
        self.pending_kick = clients.get(self.selected).map(|info| info.handle);
    }

    pub fn take_pending_kick(&mut self) -> Option<ClientHandle> {
        self.pending_kick.take()
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, stats: &ServerStats, clients: &[ClientInfo]) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(7),
            Constraint::Length(clients.len().clamp(1, 8) as u16 + 3),
            Constraint::Min(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], state, stats);
    render_capacity(frame, chunks[1], stats);
    render_network(frame, chunks[2], stats);
    render_clients(frame, chunks[3], state, clients);
    render_log(frame, chunks[4], state);
}

fn render_header(frame: &mut Frame, area: Rect, state: &TuiState, stats: &ServerStats) {
    let uptime = format_duration(state.started.elapsed().as_secs());
    let block = Block::default()
        .title(format!(" netsync server - Uptime: {} ", uptime))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!(
        "Tick: {}  |  Clients: {}/{}  |  q quit, up/down select, k kick",
        stats.tick, stats.client_count, stats.max_clients
    );
    frame.render_widget(Paragraph::new(text).block(block), area);
}

fn render_capacity(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let ratio = stats.client_count as f64 / stats.max_clients.max(1) as f64;
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL))
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio.min(1.0))
        .label(format!("{}/{} slots", stats.client_count, stats.max_clients));
    frame.render_widget(gauge, area);
}

fn render_network(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let net = &stats.network;
    let label = Style::default().fg(Color::Gray);
    let lines = vec![
        Line::from(vec![
            Span::styled("Packets: ", label),
            Span::raw(format!(
                "{} sent / {} recv / {} lost",
                net.packets_sent, net.packets_received, net.packets_lost
            )),
        ]),
        Line::from(vec![
            Span::styled("Bytes: ", label),
            Span::raw(format!(
                "{} sent / {} recv ({}/s out)",
                format_bytes(net.bytes_sent),
                format_bytes(net.bytes_received),
                format_bytes(net.outgoing_rate as u64)
            )),
        ]),
        Line::from(vec![
            Span::styled("Dropped: ", label),
            Span::raw(format!(
                "{} duplicate / {} malformed / {} resent",
                net.duplicates_dropped, net.malformed_dropped, net.reliable_resends
            )),
        ]),
        Line::from(vec![
            Span::styled("Compression: ", label),
            Span::raw(format!(
                "{:.0}% out / {:.0}% in",
                net.outgoing_compression * 100.0,
                net.incoming_compression * 100.0
            )),
        ]),
        Line::from(vec![
            Span::styled("Packet loss: ", label),
            Span::styled(
                format!("{:.1}%", net.packet_loss_percent),
                Style::default().fg(if net.packet_loss_percent > 5.0 {
                    Color::Red
                } else {
                    Color::White
                }),
            ),
        ]),
    ];
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_clients(frame: &mut Frame, area: Rect, state: &TuiState, clients: &[ClientInfo]) {
    let header = Row::new(["Slot", "Address", "RTT", "Acked", "Queued", "Rate"])
        .style(Style::default().add_modifier(Modifier::BOLD));

    let rows = clients.iter().enumerate().map(|(i, info)| {
        let style = if i == state.selected {
            Style::default().fg(Color::Black).bg(Color::Cyan)
        } else {
            Style::default()
        };
        Row::new(vec![
            format!("{}#{}", info.handle.index, info.handle.generation),
            info.addr.to_string(),
            format!("{:.0}ms", info.rtt.as_secs_f64() * 1000.0),
            info.acked_tick.map_or("-".into(), |t| t.to_string()),
            info.pending_reliable.to_string(),
            format_bytes(info.max_rate as u64) + "/s",
        ])
        .style(style)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(8),
            Constraint::Length(22),
            Constraint::Length(8),
            Constraint::Length(10),
            Constraint::Length(8),
            Constraint::Min(8),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .title(" Clients ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)),
    );
    frame.render_widget(table, area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let visible = area.height.saturating_sub(2) as usize;
    let skip = state.log.len().saturating_sub(visible);
    let lines: Vec<Line> = state
        .log
        .iter()
        .skip(skip)
        .map(|(level, message)| {
            let color = match level {
                LogLevel::Info => Color::White,
                LogLevel::Warn => Color::Yellow,
                LogLevel::Error => Color::Red,
            };
            Line::styled(message.as_str(), Style::default().fg(color))
        })
        .collect();

    let block = Block::default()
        .title(" Log ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
