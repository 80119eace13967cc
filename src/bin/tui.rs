//! Junction console TUI
//!
//! Interactive terminal client: city overview map with junction list, and an
//! intersection detail view with live map, simulation controls, vehicle
//! injector and metrics. Logs go to the configured file while the terminal
//! is in raw mode.
//!
//! Usage:
//!   cargo run --bin junction-tui -- --config config/dev.toml
//!   cargo run --bin junction-tui -- --api-url http://10.0.0.5:8000

use anyhow::Context as _;
use clap::Parser;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton,
        MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use junction_console::domain::projection::{Canvas as MapCanvas, ScreenPoint};
use junction_console::domain::types::{IntersectionId, SignalState};
use junction_console::infra::{logging, Config, FetchKind, Metrics};
use junction_console::io::{HttpGateway, SimulationGateway};
use junction_console::render::panel::{MetricsPanel, NO_METRICS, NO_VEHICLES};
use junction_console::render::scene::{detail_scene, overview_scene, Scene, Shape};
use junction_console::render::Rgb;
use junction_console::services::session::{AlertLevel, DetailState, Load, OverviewState, View};
use junction_console::services::{Action, Control, Controller};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{
        canvas::{Canvas, Circle, Context, Line as CanvasLine},
        Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Row, Table, Wrap,
    },
    Frame, Terminal,
};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

const TICK_RATE: Duration = Duration::from_millis(50);
const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(30);
/// Dash and gap length of lane markings (virtual pixels)
const DASH: f64 = 10.0;

#[derive(Parser, Debug)]
#[command(name = "junction-tui", version, about = "Interactive intersection simulator console")]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Gateway origin, overrides JUNCTION_API_URL and the config file
    #[arg(long)]
    api_url: Option<String>,
}

struct App {
    controller: Controller,
    canvas: MapCanvas,
    api_url: String,
    /// Inner area of the map widget on the last frame, for mouse hit tests
    map_area: Rect,
}

fn rgb(c: Rgb) -> Color {
    Color::Rgb(c.0, c.1, c.2)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref());
    logging::init_file(config.log_level(), config.log_file())?;

    let api_url = config.resolve_api_base_url(args.api_url.as_deref());
    info!(
        config_file = %config.config_file(),
        api_base_url = %api_url,
        poll_interval_ms = %config.poll_interval_ms(),
        git_hash = %env!("GIT_HASH"),
        "tui_starting"
    );

    let gateway: Arc<dyn SimulationGateway> = Arc::new(
        HttpGateway::new(&api_url, Duration::from_millis(config.api_timeout_ms()))
            .context("Failed to build gateway client")?,
    );
    let mut controller = Controller::from_config(gateway, Arc::new(Metrics::new()), &config);
    controller.dispatch(Action::LoadCities);

    let mut app = App { controller, canvas: config.map_canvas(), api_url, map_area: Rect::default() };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_ui(&mut terminal, &mut app).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    app.controller.metrics().report().log();
    info!("tui_stopped");
    result
}

async fn run_ui(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> anyhow::Result<()> {
    let mut last_tick = Instant::now();
    let mut last_report = Instant::now();

    loop {
        app.controller.drain();

        let mut map_area = app.map_area;
        terminal.draw(|f| map_area = draw_ui(f, app))?;
        app.map_area = map_area;

        let timeout = TICK_RATE.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if on_key(app, key.code) {
                        return Ok(());
                    }
                }
                Event::Mouse(mouse) => on_mouse(app, mouse),
                _ => {}
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            last_tick = Instant::now();
            // Let spawned fetches make progress between frames
            tokio::task::yield_now().await;
        }
        if last_report.elapsed() >= METRICS_LOG_INTERVAL {
            last_report = Instant::now();
            app.controller.metrics().report().log();
        }
    }
}

// ============================================================================
// Input
// ============================================================================

/// Handle one key press; true means quit
fn on_key(app: &mut App, code: KeyCode) -> bool {
    if code == KeyCode::Char('q') {
        return true;
    }
    if code == KeyCode::Char('x') {
        app.controller.dispatch(Action::DismissAlert);
        return false;
    }

    let session = app.controller.session();
    let action = match session.view() {
        View::Overview => {
            if code == KeyCode::Esc {
                return true;
            }
            overview_key(session.overview(), code)
        }
        View::Detail(_) => session.detail().and_then(|detail| detail_key(detail, code)),
    };
    if let Some(action) = action {
        app.controller.dispatch(action);
    }
    false
}

fn overview_key(overview: &OverviewState, code: KeyCode) -> Option<Action> {
    match code {
        KeyCode::Left | KeyCode::Right => {
            let cities = overview.cities.ready()?;
            let current = cities.iter().position(|c| Some(c.id) == overview.selected_city);
            let next = step_index(current, cities.len(), code == KeyCode::Right)?;
            Some(Action::SelectCity(cities[next].id))
        }
        KeyCode::Up | KeyCode::Down => {
            let list = overview.intersections.ready()?;
            let current = list.iter().position(|i| Some(i.id) == overview.selected_intersection);
            let next = step_index(current, list.len(), code == KeyCode::Down)?;
            Some(Action::SelectIntersection(list[next].id))
        }
        KeyCode::Enter => Some(Action::OpenDetail),
        KeyCode::Char('r') if overview.cities.error().is_some() => Some(Action::LoadCities),
        KeyCode::Char('r') => Some(Action::RetryIntersections),
        _ => None,
    }
}

/// Next index in a wrapping list, starting at the first entry when nothing is selected
fn step_index(current: Option<usize>, len: usize, forward: bool) -> Option<usize> {
    if len == 0 {
        return None;
    }
    Some(match (current, forward) {
        (None, _) => 0,
        (Some(i), true) => (i + 1) % len,
        (Some(i), false) => (i + len - 1) % len,
    })
}

fn detail_key(detail: &DetailState, code: KeyCode) -> Option<Action> {
    match code {
        KeyCode::Esc | KeyCode::Backspace | KeyCode::Char('b') => Some(Action::Back),
        KeyCode::Char('s') if detail.running => Some(Action::StopSimulation),
        KeyCode::Char('s') => Some(Action::StartSimulation),
        KeyCode::Char('o') => Some(Action::OptimizeSignals),
        KeyCode::Char('i') => Some(Action::InjectVehicle),
        KeyCode::Char('t') => Some(Action::StepSimulation),
        KeyCode::Char('v') => Some(Action::SetVehicleType(detail.injector.vehicle_type.next())),
        KeyCode::Char('d') => Some(Action::SetDirection(detail.injector.direction.next())),
        KeyCode::Char('e') => Some(Action::SetEmergency(!detail.injector.is_emergency)),
        KeyCode::Char('r') => Some(Action::RetryIntersection),
        _ => None,
    }
}

/// Terminal cell to virtual canvas pixel
fn to_canvas(area: Rect, canvas: &MapCanvas, column: u16, row: u16) -> Option<ScreenPoint> {
    if area.width == 0 || area.height == 0 || !area.contains((column, row).into()) {
        return None;
    }
    let fx = (f64::from(column - area.x) + 0.5) / f64::from(area.width);
    let fy = (f64::from(row - area.y) + 0.5) / f64::from(area.height);
    Some(ScreenPoint { x: fx * canvas.width, y: fy * canvas.height })
}

fn on_mouse(app: &mut App, mouse: MouseEvent) {
    let session = app.controller.session();
    if session.view() != View::Overview {
        return;
    }
    let Some(list) = session.overview().intersections.ready() else {
        return;
    };
    let scene = overview_scene(list, None, None, app.canvas);
    let slack = cell_size(app.map_area, &app.canvas).0;
    let hit = to_canvas(app.map_area, &app.canvas, mouse.column, mouse.row)
        .and_then(|p| scene.hit_test(p, slack));

    match mouse.kind {
        MouseEventKind::Moved => {
            if hit != session.overview().hovered {
                app.controller.dispatch(Action::Hover(hit));
            }
        }
        MouseEventKind::Down(MouseButton::Left) => {
            if let Some(id) = hit {
                let already = session.overview().selected_intersection == Some(id);
                let action =
                    if already { Action::OpenDetail } else { Action::SelectIntersection(id) };
                app.controller.dispatch(action);
            }
        }
        _ => {}
    }
}

// ============================================================================
// Drawing
// ============================================================================

/// Draw one frame; returns the inner map area
fn draw_ui(f: &mut Frame, app: &App) -> Rect {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Body
            Constraint::Length(3), // Alerts + client metrics
        ])
        .split(f.area());

    draw_header(f, chunks[0], app);
    let map_area = match app.controller.session().view() {
        View::Overview => draw_overview(f, chunks[1], app),
        View::Detail(id) => draw_detail(f, chunks[1], app, id),
    };
    draw_footer(f, chunks[2], app);
    map_area
}

fn draw_header(f: &mut Frame, area: Rect, app: &App) {
    let session = app.controller.session();
    let (place, keys) = match session.view() {
        View::Overview => {
            let city = session.overview().selected_city().map(|c| c.name.as_str()).unwrap_or("-");
            (city.to_string(), "←/→ city  ↑/↓ junction  Enter open  r retry  q quit")
        }
        View::Detail(id) => {
            let name = session
                .detail()
                .and_then(|d| d.intersection.ready())
                .map(|i| i.name.clone())
                .unwrap_or_else(|| format!("Intersection {id}"));
            (name, "s start/stop  o optimize  i inject  t step  v/d/e injector  Esc back")
        }
    };

    let header = Paragraph::new(Line::from(vec![
        Span::styled("Junction Console ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw("| "),
        Span::styled(place, Style::default().fg(Color::Yellow)),
        Span::raw(" | "),
        Span::styled(app.api_url.as_str(), Style::default().fg(Color::DarkGray)),
        Span::raw(" | "),
        Span::raw(keys),
    ]))
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(header, area);
}

fn placeholder(f: &mut Frame, area: Rect, title: &str, text: String, color: Color) {
    let widget = Paragraph::new(text)
        .style(Style::default().fg(color))
        .wrap(Wrap { trim: true })
        .block(Block::default().title(format!(" {title} ")).borders(Borders::ALL));
    f.render_widget(widget, area);
}

fn draw_overview(f: &mut Frame, area: Rect, app: &App) -> Rect {
    let overview = app.controller.session().overview();
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
        .split(area);
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(chunks[0]);

    match &overview.cities {
        Load::Loading => placeholder(f, left[0], "Cities", "Loading cities...".into(), Color::Gray),
        Load::Failed(e) => {
            placeholder(f, left[0], "Cities", format!("{e}\n\nPress r to retry"), Color::Red)
        }
        Load::Ready(cities) => {
            let items: Vec<ListItem> = cities
                .iter()
                .map(|c| ListItem::new(format!("{} ({})", c.name, c.state)))
                .collect();
            let mut state = ListState::default()
                .with_selected(cities.iter().position(|c| Some(c.id) == overview.selected_city));
            let list = List::new(items)
                .block(Block::default().title(" Cities ").borders(Borders::ALL))
                .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
                .highlight_symbol("▶ ");
            f.render_stateful_widget(list, left[0], &mut state);
        }
    }

    let map_block = Block::default().title(" Road Junctions ").borders(Borders::ALL);
    let inner = map_block.inner(chunks[1]);
    let intersections = match &overview.intersections {
        Load::Ready(list) => list,
        Load::Loading => {
            placeholder(f, left[1], "Junctions", "Loading intersections...".into(), Color::Gray);
            placeholder(f, chunks[1], "Road Junctions", String::new(), Color::Gray);
            return inner;
        }
        Load::Failed(e) => {
            placeholder(f, left[1], "Junctions", format!("{e}\n\nPress r to retry"), Color::Red);
            placeholder(f, chunks[1], "Road Junctions", String::new(), Color::Gray);
            return inner;
        }
    };

    let items: Vec<ListItem> = intersections
        .iter()
        .map(|i| {
            let style = if overview.hovered == Some(i.id) {
                Style::default().fg(Color::Blue)
            } else {
                Style::default()
            };
            ListItem::new(vec![
                Line::from(Span::styled(format!("{}  [{} lanes]", i.name, i.num_lanes), style)),
                Line::from(Span::styled(
                    format!("  {:.4}, {:.4}", i.latitude, i.longitude),
                    Style::default().fg(Color::DarkGray),
                )),
            ])
        })
        .collect();
    let mut state = ListState::default().with_selected(
        intersections.iter().position(|i| Some(i.id) == overview.selected_intersection),
    );
    let list = List::new(items)
        .block(Block::default().title(" Junctions ").borders(Borders::ALL))
        .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .highlight_symbol("▶ ");
    f.render_stateful_widget(list, left[1], &mut state);

    let scene =
        overview_scene(intersections, overview.selected_intersection, overview.hovered, app.canvas);
    let labels: Vec<(ScreenPoint, String)> = scene
        .markers
        .iter()
        .filter_map(|m| {
            let i = overview.intersection(m.intersection)?;
            Some((ScreenPoint { x: m.at.x + 12.0, y: m.at.y }, i.name.clone()))
        })
        .collect();
    draw_scene(f, chunks[1], map_block, &scene, &labels);
    inner
}

fn draw_detail(f: &mut Frame, area: Rect, app: &App, id: IntersectionId) -> Rect {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(58), Constraint::Percentage(42)])
        .split(area);
    let map_block = Block::default().title(" Live Map ").borders(Borders::ALL);
    let inner = map_block.inner(chunks[0]);

    let Some(detail) = app.controller.session().detail() else {
        return inner;
    };
    let intersection = match &detail.intersection {
        Load::Ready(intersection) => intersection,
        Load::Loading => {
            placeholder(f, area, "Intersection", format!("Loading intersection {id}..."), Color::Gray);
            return inner;
        }
        Load::Failed(e) => {
            placeholder(f, area, "Intersection", format!("{e}\n\nPress r to retry, Esc to go back"), Color::Red);
            return inner;
        }
    };

    let scene = detail_scene(&intersection.name, &detail.vehicles, app.canvas);
    draw_scene(f, chunks[0], map_block, &scene, &[]);

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(7), Constraint::Min(0)])
        .split(chunks[1]);
    draw_controls(f, right[0], detail);
    draw_metrics(f, right[1], detail);
    inner
}

fn control_line<'a>(key: &'a str, label: String, busy: bool, enabled: bool) -> Line<'a> {
    let style = if busy || !enabled {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default().fg(Color::White)
    };
    let mut spans = vec![Span::styled(format!("[{key}] "), Style::default().fg(Color::Cyan)), Span::styled(label, style)];
    if busy {
        spans.push(Span::styled(" …", Style::default().fg(Color::Yellow)));
    }
    Line::from(spans)
}

fn draw_controls(f: &mut Frame, area: Rect, detail: &DetailState) {
    let busy = |control| detail.in_flight.is_busy(control);
    let run_label = if detail.running { "Stop Simulation" } else { "Start Simulation" };
    let injector = &detail.injector;
    let mut lines = vec![
        control_line("s", run_label.to_string(), busy(Control::RunToggle), true),
        control_line("o", "Optimize Signals".to_string(), busy(Control::Optimize), true),
        control_line("t", "Step".to_string(), busy(Control::Step), detail.running),
        control_line(
            "i",
            format!(
                "Inject {} from {}{}",
                injector.vehicle_type.label(),
                injector.direction.label(),
                if injector.is_emergency { " (emergency)" } else { "" }
            ),
            busy(Control::Inject),
            true,
        ),
    ];
    if let Some(report) = &detail.last_optimization {
        lines.push(Line::from(Span::styled(
            format!(
                "Last optimize: {} timings{}",
                report.optimized_timings.len(),
                if report.emergency_detected { ", emergency corridor" } else { "" }
            ),
            Style::default().fg(Color::DarkGray),
        )));
    }
    let widget = Paragraph::new(lines)
        .block(Block::default().title(" Simulation Control ").borders(Borders::ALL));
    f.render_widget(widget, area);
}

fn draw_metrics(f: &mut Frame, area: Rect, detail: &DetailState) {
    let panel = MetricsPanel::build(detail.metrics.as_ref(), &detail.vehicles, detail.running);
    let status_color = if panel.running { Color::Green } else { Color::Red };
    let block = Block::default()
        .title(Line::from(vec![
            Span::raw(" Live Metrics | "),
            Span::styled(panel.status_label(), Style::default().fg(status_color)),
            Span::raw(" "),
        ]))
        .borders(Borders::ALL);

    let Some(snapshot) = &panel.snapshot else {
        let widget = Paragraph::new(NO_METRICS).style(Style::default().fg(Color::Gray)).block(block);
        f.render_widget(widget, area);
        return;
    };

    let inner = block.inner(area);
    f.render_widget(block, area);
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // Cards
            Constraint::Length(3), // Congestion
            Constraint::Length(2), // Sim time + vehicles
            Constraint::Min(0),    // Lanes and signals
        ])
        .split(inner);

    let card_areas = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 4); 4])
        .split(chunks[0]);
    for (card, card_area) in snapshot.cards.iter().zip(card_areas.iter()) {
        let widget = Paragraph::new(vec![
            Line::from(Span::styled(card.value.clone(), Style::default().add_modifier(Modifier::BOLD))),
            Line::from(Span::styled(card.subtext, Style::default().fg(Color::DarkGray))),
        ])
        .block(Block::default().title(card.label).borders(Borders::TOP));
        f.render_widget(widget, *card_area);
    }

    let congestion = &snapshot.congestion;
    let gauge = Gauge::default()
        .block(Block::default().title(" Congestion Level ").borders(Borders::ALL))
        .gauge_style(Style::default().fg(rgb(congestion.color)))
        .ratio(congestion.percent / 100.0)
        .label(format!("{} {}", congestion.label(), congestion.severity.as_str()));
    f.render_widget(gauge, chunks[1]);

    let vehicles = match snapshot.vehicles {
        Some(s) => format!(
            "{} Moving  {} Stopped  {} Waiting  {} Emergency",
            s.moving, s.stopped, s.waiting, s.emergency
        ),
        None => NO_VEHICLES.to_string(),
    };
    let summary = Paragraph::new(vec![
        Line::from(format!("Simulation Time: {}", snapshot.simulation_time)),
        Line::from(vehicles),
    ]);
    f.render_widget(summary, chunks[2]);

    let tables = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(chunks[3]);

    let lane_rows: Vec<Row> = snapshot
        .lanes
        .iter()
        .map(|l| {
            Row::new(vec![
                l.name.clone(),
                l.vehicles.to_string(),
                l.congestion.label(),
                format!("{:.1}s", l.avg_wait_secs),
            ])
            .style(Style::default().fg(rgb(l.congestion.color)))
        })
        .collect();
    let lanes = Table::new(
        lane_rows,
        [Constraint::Percentage(40), Constraint::Length(5), Constraint::Length(8), Constraint::Length(8)],
    )
    .header(Row::new(vec!["Lane", "Veh", "Cong", "Wait"]).style(Style::default().add_modifier(Modifier::BOLD)))
    .block(Block::default().title(" Lanes ").borders(Borders::TOP));
    f.render_widget(lanes, tables[0]);

    let signal_rows: Vec<Row> = snapshot
        .signals
        .iter()
        .map(|s| {
            let color = match s.state {
                SignalState::Green => Color::Green,
                SignalState::Yellow => Color::Yellow,
                SignalState::Red => Color::Red,
            };
            Row::new(vec![
                s.name.clone(),
                format!("{:?}", s.state).to_uppercase(),
                format!("{:.0}s", s.remaining_secs),
                format!("{}s{}", s.green_secs, if s.optimized { " *" } else { "" }),
            ])
            .style(Style::default().fg(color))
        })
        .collect();
    let signals = Table::new(
        signal_rows,
        [Constraint::Percentage(40), Constraint::Length(7), Constraint::Length(6), Constraint::Length(8)],
    )
    .header(Row::new(vec!["Signal", "State", "Left", "Green"]).style(Style::default().add_modifier(Modifier::BOLD)))
    .block(Block::default().title(" Signals ").borders(Borders::TOP));
    f.render_widget(signals, tables[1]);
}

fn draw_footer(f: &mut Frame, area: Rect, app: &App) {
    let session = app.controller.session();
    let metrics = app.controller.metrics();
    let alert = match session.alerts().back() {
        Some(alert) => {
            let color = match alert.level {
                AlertLevel::Info => Color::Green,
                AlertLevel::Error => Color::Red,
            };
            Span::styled(
                format!("{} {} ({} queued, x to dismiss)", alert.at.format("%H:%M:%S"), alert.message, session.alerts().len()),
                Style::default().fg(color),
            )
        }
        None => Span::styled("No alerts", Style::default().fg(Color::DarkGray)),
    };
    let stats = Span::styled(
        format!(
            " | polls {} | stale {} | errors v{}/m{}",
            metrics.poll_ticks_total(),
            metrics.stale_dropped_total(),
            metrics.fetch_failures(FetchKind::Vehicles),
            metrics.fetch_failures(FetchKind::Metrics),
        ),
        Style::default().fg(Color::DarkGray),
    );
    let footer = Paragraph::new(Line::from(vec![alert, stats])).block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, area);
}

// ============================================================================
// Scene painting
// ============================================================================

/// Virtual pixels per terminal cell (x) and per braille dot row (y)
fn cell_size(area: Rect, canvas: &MapCanvas) -> (f64, f64) {
    let w = f64::from(area.width.max(1));
    let h = f64::from(area.height.max(1));
    (canvas.width / w, canvas.height / (h * 4.0))
}

fn draw_scene(f: &mut Frame, area: Rect, block: Block, scene: &Scene, labels: &[(ScreenPoint, String)]) {
    let inner = block.inner(area);
    let canvas = MapCanvas::new(scene.width, scene.height, 0.0);
    let (cell_w, dot_h) = cell_size(inner, &canvas);

    let legend: Vec<Span> = scene
        .legend
        .iter()
        .flat_map(|entry| {
            [
                Span::styled("■ ", Style::default().fg(rgb(entry.color))),
                Span::raw(format!("{}  ", entry.label)),
            ]
        })
        .collect();

    let widget = Canvas::default()
        .block(block.title_bottom(Line::from(legend)))
        .marker(symbols::Marker::Braille)
        .background_color(rgb(scene.background))
        .x_bounds([0.0, scene.width])
        .y_bounds([0.0, scene.height])
        .paint(|ctx| {
            paint_shapes(ctx, scene, cell_w, dot_h);
            for (at, text) in labels {
                ctx.print(at.x, scene.height - at.y, Span::styled(text.clone(), Style::default().fg(Color::Black)));
            }
        });
    f.render_widget(widget, area);
}

fn paint_shapes(ctx: &mut Context, scene: &Scene, cell_w: f64, dot_h: f64) {
    // Canvas y grows up; scene y grows down
    let flip = |y: f64| scene.height - y;
    let step = dot_h.max(0.5);

    for shape in &scene.shapes {
        match shape {
            Shape::Rect { x, y, width, height, fill } => {
                let mut yy = flip(y + height);
                let top = flip(*y);
                while yy <= top {
                    ctx.draw(&CanvasLine { x1: *x, y1: yy, x2: x + width, y2: yy, color: rgb(*fill) });
                    yy += step;
                }
            }
            Shape::Line { from, to, color, dashed, .. } => {
                let (x1, y1, x2, y2) = (from.x, flip(from.y), to.x, flip(to.y));
                if !dashed {
                    ctx.draw(&CanvasLine { x1, y1, x2, y2, color: rgb(*color) });
                    continue;
                }
                let len = (x2 - x1).hypot(y2 - y1);
                let mut start = 0.0;
                while start < len {
                    let (t0, t1) = (start / len, ((start + DASH) / len).min(1.0));
                    ctx.draw(&CanvasLine {
                        x1: x1 + (x2 - x1) * t0,
                        y1: y1 + (y2 - y1) * t0,
                        x2: x1 + (x2 - x1) * t1,
                        y2: y1 + (y2 - y1) * t1,
                        color: rgb(*color),
                    });
                    start += 2.0 * DASH;
                }
            }
            Shape::Circle { center, radius, fill, stroke, .. } => {
                let (x, y) = (center.x, flip(center.y));
                if let Some(fill) = fill {
                    let mut r = radius - step;
                    while r > 0.0 {
                        ctx.draw(&Circle { x, y, radius: r, color: rgb(*fill) });
                        r -= step;
                    }
                }
                ctx.draw(&Circle { x, y, radius: *radius, color: rgb(*stroke) });
            }
            Shape::Text { at, text, color } => {
                // Centre on the anchor like the browser canvas did
                let half = text.chars().count() as f64 * cell_w / 2.0;
                ctx.print(at.x - half, flip(at.y), Span::styled(text.clone(), Style::default().fg(rgb(*color))));
            }
        }
    }
}
