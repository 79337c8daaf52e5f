use nalgebra::{Rotation3, Vector3};
use ratatui::{
    prelude::*,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{
        canvas::{Canvas, Circle, Line as CanvasLine, Points},
        Block, BorderType, Borders, Cell, Gauge, List, ListItem, Paragraph, Row, Sparkline, Table,
        Tabs, Wrap,
    },
};

use crate::core::chemistry::{self, BOHR2ANG};
use crate::interface::state::{AppMode, AppState, WorkerStatus};
use crate::solvers::StepPhase;

// --- Color Palette ---
const COL_BG: Color = Color::Reset;
const COL_FG: Color = Color::White;
const COL_HIGHLIGHT: Color = Color::Yellow;
const COL_ACCENT: Color = Color::Cyan;
const COL_BOND: Color = Color::DarkGray;
const COL_SUCCESS: Color = Color::Green;
const COL_FAIL: Color = Color::Red;
const COL_HEADER: Color = Color::Magenta;
const COL_FORCE: Color = Color::LightGreen;

const HARTREE2KJMOL: f64 = 2625.499639;

pub fn draw(f: &mut Frame, app: &mut AppState) {
    if f.area().width < 40 || f.area().height < 10 {
        let p = Paragraph::new("Terminal too small.")
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(p, f.area());
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(f.area());

    draw_header(f, app, chunks[0]);

    match app.mode {
        AppMode::Dashboard => draw_dashboard(f, app, chunks[1]),
        AppMode::Images => draw_images(f, app, chunks[1]),
        AppMode::Parameters => draw_config(f, app, chunks[1]),
        AppMode::StructureViewer => draw_hei_3d(f, app, chunks[1], " Highest Energy Image "),
    }

    draw_footer(f, app, chunks[2]);
}

fn draw_header(f: &mut Frame, app: &AppState, area: Rect) {
    let titles = vec![" 1:Dash ", " 2:Images ", " 3:Params ", " 4:Viewer "];
    let idx = match app.mode {
        AppMode::Dashboard => 0,
        AppMode::Images => 1,
        AppMode::Parameters => 2,
        AppMode::StructureViewer => 3,
    };

    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::BOTTOM))
        .select(idx)
        .highlight_style(Style::default().fg(COL_HIGHLIGHT).add_modifier(Modifier::BOLD));

    f.render_widget(tabs, area);
}

fn draw_footer(f: &mut Frame, app: &AppState, area: Rect) {
    let status_str = match app.worker_status {
        WorkerStatus::Running => "RUNNING",
        WorkerStatus::Cancelling => "STOPPING",
        WorkerStatus::Idle => "IDLE",
        WorkerStatus::Starting => "STARTING",
        WorkerStatus::Finished => "DONE",
        WorkerStatus::Error => "ERROR",
    };

    let color = match app.worker_status {
        WorkerStatus::Running => COL_SUCCESS,
        WorkerStatus::Error => COL_FAIL,
        WorkerStatus::Cancelling => COL_HIGHLIGHT,
        _ => COL_FG,
    };

    let hei = app
        .hei
        .as_ref()
        .map(|h| format!("HEI: #{} {:.6} Eh", h.index, h.energy))
        .unwrap_or_else(|| "HEI: -".to_string());

    let text = Line::from(vec![
        Span::styled(
            format!(" STATUS: {:<8}", status_str),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!("Cycles/s: {:<6.2}", app.cycles_per_second)),
        Span::raw(" | "),
        Span::styled(hei, Style::default().fg(COL_ACCENT)),
        Span::raw(" | [Q]uit [Space]Rotate [J/K]Select"),
    ]);

    let p = Paragraph::new(text).style(Style::default().bg(Color::DarkGray).fg(Color::White));
    f.render_widget(p, area);
}

fn draw_dashboard(f: &mut Frame, app: &AppState, area: Rect) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(area);

    let left_rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(cols[0]);

    draw_energy_profile(f, app, left_rows[0]);
    draw_force_charts(f, app, left_rows[1]);

    let right_rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(50),
            Constraint::Percentage(15),
            Constraint::Percentage(35),
        ])
        .split(cols[1]);

    draw_logs(f, app, right_rows[0]);
    draw_progress(f, app, right_rows[1]);
    draw_stats(f, app, right_rows[2]);
}

/// Energies along the current path, relative to the first image.
fn draw_energy_profile(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default()
        .title(" Energy Profile (kJ/mol) ")
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded);

    let Some(stats) = app.latest.as_ref().filter(|s| !s.energies.is_empty()) else {
        f.render_widget(block.title(" Waiting for Data... "), area);
        return;
    };

    let e0 = stats.energies[0];
    let points: Vec<(f64, f64)> = stats
        .energies
        .iter()
        .enumerate()
        .map(|(i, e)| (i as f64, (e - e0) * HARTREE2KJMOL))
        .collect();

    let y_min = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let y_max = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    let pad = ((y_max - y_min) * 0.1).max(1e-3);
    let x_max = (points.len().saturating_sub(1)).max(1) as f64;
    let selected = app.image_state.selected();

    let canvas = Canvas::default()
        .block(block)
        .background_color(COL_BG)
        .x_bounds([-0.5, x_max + 0.5])
        .y_bounds([y_min - pad, y_max + pad])
        .paint(|ctx| {
            for w in points.windows(2) {
                ctx.draw(&CanvasLine {
                    x1: w[0].0,
                    y1: w[0].1,
                    x2: w[1].0,
                    y2: w[1].1,
                    color: COL_ACCENT,
                });
            }
            ctx.draw(&Points {
                coords: &points,
                color: COL_FG,
            });
            if let Some(&(x, y)) = points.get(stats.hei_index) {
                ctx.print(x, y, Span::styled("▲", Style::default().fg(COL_HIGHLIGHT)));
            }
            if let Some(&(x, y)) = selected.and_then(|i| points.get(i)) {
                ctx.print(x, y, Span::styled("●", Style::default().fg(COL_HEADER)));
            }
        });

    f.render_widget(canvas, area);
}

fn sparkline_data(history: &std::collections::VecDeque<(f64, f64)>, width: usize) -> Vec<u64> {
    // log10 scale, 1e-6 maps to 0 and 1 to 60
    let data: Vec<u64> = history
        .iter()
        .rev()
        .take(width)
        .map(|(_, v)| ((v.max(1e-6).log10() + 6.0) * 10.0).max(0.0) as u64)
        .collect();
    data.into_iter().rev().collect()
}

fn draw_force_charts(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().title(" Convergence ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(inner);

    let width = inner.width as usize;
    if !app.telemetry.max_force_history.is_empty() {
        let data = sparkline_data(&app.telemetry.max_force_history, width);
        let spark = Sparkline::default()
            .block(Block::default().title("max |f| (log)").borders(Borders::NONE))
            .style(Style::default().fg(COL_FORCE))
            .data(&data);
        f.render_widget(spark, chunks[0]);
    }

    if !app.telemetry.rms_force_history.is_empty() {
        let data = sparkline_data(&app.telemetry.rms_force_history, width);
        let spark = Sparkline::default()
            .block(Block::default().title("rms(f) (log)").borders(Borders::NONE))
            .style(Style::default().fg(COL_ACCENT))
            .data(&data);
        f.render_widget(spark, chunks[1]);
    }
}

fn draw_logs(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().title(" System Log ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let items: Vec<ListItem> = app
        .logs
        .iter()
        .rev()
        .map(|line| {
            let style = if line.contains("!!!") || line.to_lowercase().contains("failed") {
                Style::default().fg(COL_FAIL)
            } else if line.contains("Converged") || line.contains("Splined HEI") {
                Style::default().fg(COL_SUCCESS)
            } else {
                Style::default().fg(Color::Gray)
            };

            ListItem::new(Line::from(vec![
                Span::styled(">", Style::default().fg(Color::DarkGray)),
                Span::raw(" "),
                Span::raw(line.as_str()),
            ]))
            .style(style)
        })
        .collect();

    f.render_widget(List::new(items), inner);
}

fn draw_progress(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().title(" Progress ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let max_cycles = app.config.opt.max_cycles.max(1);
    let done = app.latest.as_ref().map(|s| s.cycle + 1).unwrap_or(0);
    let ratio = (done as f64 / max_cycles as f64).clamp(0.0, 1.0);

    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(COL_ACCENT).bg(Color::DarkGray))
        .ratio(ratio)
        .label(format!("Cycle {} / {}", done, max_cycles));
    f.render_widget(gauge, inner);
}

fn draw_stats(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().title(" Statistics ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(s) = &app.latest else {
        f.render_widget(Paragraph::new("No cycle finished yet."), inner);
        return;
    };

    let kv = |k: &str, v: String, color: Color| {
        Line::from(vec![
            Span::styled(format!("{:<12}", k), Style::default().fg(Color::Gray)),
            Span::styled(v, Style::default().fg(color)),
        ])
    };
    let phase = match s.phase {
        StepPhase::Warmup => "steepest descent",
        StepPhase::Steady => "conjugate",
    };
    let countdown = s
        .stop_in
        .map(|n| n.to_string())
        .unwrap_or_else(|| "off".to_string());

    let text = vec![
        kv("Cycle:", s.cycle.to_string(), COL_HIGHLIGHT),
        kv("max |f|:", format!("{:.3e}", s.max_force), COL_HIGHLIGHT),
        kv("rms(f):", format!("{:.3e}", s.rms_force), COL_HIGHLIGHT),
        kv("max |dx|:", format!("{:.3e}", s.max_step), COL_HIGHLIGHT),
        kv("Step:", format!("{} ({} clipped)", phase, s.clipped), COL_ACCENT),
        kv("Countdown:", countdown, COL_ACCENT),
        kv(
            "Converged:",
            s.converged.to_string(),
            if s.converged { COL_SUCCESS } else { COL_FG },
        ),
    ];

    f.render_widget(Paragraph::new(text).wrap(Wrap { trim: true }), inner);
}

fn draw_images(f: &mut Frame, app: &mut AppState, area: Rect) {
    let Some(stats) = app.latest.clone() else {
        f.render_widget(
            Paragraph::new("Waiting for the first cycle...")
                .block(Block::default().borders(Borders::ALL).title(" Images "))
                .alignment(Alignment::Center),
            area,
        );
        return;
    };

    let header_cells = ["Image", "Energy (Eh)", "ΔE (kJ/mol)", ""]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(COL_HEADER)));
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let e0 = stats.energies.first().copied().unwrap_or(0.0);
    let rows = stats.energies.iter().enumerate().map(|(i, e)| {
        let marker = if i == stats.hei_index { "HEI" } else { "" };
        Row::new(vec![
            Cell::from(format!("{:>3}", i)),
            Cell::from(format!("{:.8}", e)),
            Cell::from(format!("{:>10.2}", (e - e0) * HARTREE2KJMOL)),
            Cell::from(marker).style(Style::default().fg(COL_HIGHLIGHT)),
        ])
        .height(1)
    });

    let t = Table::new(
        rows,
        &[
            Constraint::Length(7),
            Constraint::Length(18),
            Constraint::Length(14),
            Constraint::Min(4),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Images ({}) - cycle {} ", stats.energies.len(), stats.cycle)),
    )
    .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    f.render_stateful_widget(t, area, &mut app.image_state);
}

fn draw_config(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title(" Run Parameters ");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let c = &app.config;

    let kv = |k: &str, v: String| -> ListItem {
        ListItem::new(Line::from(vec![
            Span::styled(format!("{:<18}", k), Style::default().fg(COL_ACCENT)),
            Span::raw(v),
        ]))
    };

    let items = vec![
        kv("Atoms:", app.atoms.len().to_string()),
        kv("Coordinates:", c.geom.coord_type.to_string()),
        kv("Calculator:", c.calc.kind.clone()),
        kv("Threads:", c.threads.to_string()),
        kv("Parallel:", c.parallel.to_string()),
        ListItem::new(Line::from(" ")),
        kv("Parametrization:", c.cos.param.to_string()),
        kv("Reparametrize:", format!("{} (every {})", c.cos.reparametrize, c.cos.reparam_every)),
        kv("Fixed ends:", c.cos.fix_ends.to_string()),
        kv("Perp. forces:", c.cos.perp_forces.to_string()),
        ListItem::new(Line::from(" ")),
        kv("Gamma:", format!("{:.3} Eh/Bohr²", c.opt.gamma)),
        kv("Max step:", format!("{:.3} Bohr", c.opt.max_step)),
        kv("Threshold:", c.opt.thresh.to_string()),
        kv("Max cycles:", c.opt.max_cycles.to_string()),
        kv("Align:", c.opt.align.to_string()),
        kv(
            "Stop when full:",
            c.opt
                .stop_in_when_full
                .map(|n| n.to_string())
                .unwrap_or_else(|| "off".to_string()),
        ),
    ];

    f.render_widget(List::new(items).block(Block::default().borders(Borders::NONE)), inner);
}

fn atom_color(symbol: &str) -> Color {
    match symbol.to_ascii_lowercase().as_str() {
        "h" => Color::White,
        "c" => Color::Gray,
        "n" => Color::LightBlue,
        "o" => Color::LightRed,
        "s" => Color::Yellow,
        _ => Color::LightMagenta,
    }
}

fn draw_hei_3d(f: &mut Frame, app: &AppState, area: Rect, title: &str) {
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded);

    let inner_area = block.inner(area);
    f.render_widget(block, area);

    if inner_area.width < 1 || inner_area.height < 1 {
        return;
    }
    let Some(hei) = &app.hei else {
        f.render_widget(
            Paragraph::new("No structure yet.").alignment(Alignment::Center),
            inner_area,
        );
        return;
    };

    let rot_y = Rotation3::from_axis_angle(&Vector3::y_axis(), app.viewport.azimuth);
    let rot_x = Rotation3::from_axis_angle(&Vector3::x_axis(), app.viewport.elevation);

    let positions: Vec<Vector3<f64>> = hei
        .coords
        .as_slice()
        .chunks_exact(3)
        .map(|c| Vector3::new(c[0], c[1], c[2]) * BOHR2ANG)
        .collect();
    if positions.is_empty() {
        return;
    }
    let center = positions.iter().sum::<Vector3<f64>>() / positions.len() as f64;

    // (x, y, z, color, radius, covalent radius in Å)
    let mut render_atoms: Vec<(f64, f64, f64, Color, f64, f64)> = positions
        .iter()
        .zip(app.atoms.iter())
        .map(|(p, symbol)| {
            let p_rot = rot_x * rot_y * (p - center);
            let r_cov = chemistry::covalent_radius(symbol).map(|r| r * BOHR2ANG).unwrap_or(0.7);
            (p_rot.x, p_rot.y, p_rot.z, atom_color(symbol), 0.3 + 0.3 * r_cov, r_cov)
        })
        .collect();

    if render_atoms
        .iter()
        .any(|(x, y, z, ..)| x.is_nan() || y.is_nan() || z.is_nan())
    {
        f.render_widget(
            Paragraph::new("Error: NaN Coordinates").style(Style::default().fg(COL_FAIL)),
            inner_area,
        );
        return;
    }

    let max_coord = render_atoms
        .iter()
        .flat_map(|(x, y, ..)| [x.abs(), y.abs()])
        .fold(0.0, f64::max)
        .max(1.0);
    let bound = max_coord * 1.2;

    render_atoms.sort_by(|a, b| a.2.total_cmp(&b.2));

    let canvas = Canvas::default()
        .background_color(COL_BG)
        .x_bounds([-bound, bound])
        .y_bounds([-bound, bound])
        .paint(|ctx| {
            for i in 0..render_atoms.len() {
                for j in (i + 1)..render_atoms.len() {
                    let a = &render_atoms[i];
                    let b = &render_atoms[j];
                    let d2 = (a.0 - b.0).powi(2) + (a.1 - b.1).powi(2) + (a.2 - b.2).powi(2);
                    let cutoff = 1.3 * (a.5 + b.5);

                    if d2 < cutoff * cutoff {
                        let avg_z = (a.2 + b.2) / 2.0;
                        let brightness = if avg_z < 0.0 { Color::DarkGray } else { COL_BOND };
                        ctx.draw(&CanvasLine {
                            x1: a.0,
                            y1: a.1,
                            x2: b.0,
                            y2: b.1,
                            color: brightness,
                        });
                    }
                }
            }
            for (x, y, z, col, size, _) in &render_atoms {
                let perspective = (1.0 + z * 0.05).clamp(0.5, 1.5);
                let view_zoom = app.viewport.zoom;
                ctx.draw(&Circle {
                    x: *x * view_zoom,
                    y: *y * view_zoom,
                    radius: *size * view_zoom * perspective,
                    color: *col,
                });
            }
        });

    f.render_widget(canvas, inner_area);

    let label = format!("image {} | cycle {}", hei.index, hei.cycle);
    let rot_status = if app.viewport.auto_rotate { "Auto-Rot: ON" } else { "Auto-Rot: OFF" };
    let overlay = Paragraph::new(format!("{}  {}", label, rot_status))
        .style(Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC));
    let width = 40.min(inner_area.width);
    let overlay_area = Rect {
        x: inner_area.x + inner_area.width.saturating_sub(width),
        y: inner_area.y,
        width,
        height: 1,
    };
    f.render_widget(overlay, overlay_area);
}
