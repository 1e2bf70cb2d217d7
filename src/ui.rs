use chrono::Utc;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Cell, Paragraph, Row as TableLine, Table, TableState},
    Frame,
};

use crate::app::{App, TableModel};
use crate::pagination::{RenderStrategy, Status};

/// Table body rows for a frame of the given height (borders and header excluded).
pub fn viewport_rows(frame_height: u16) -> usize {
    // header line + footer line + table borders + column header
    frame_height.saturating_sub(5).max(1) as usize
}

// ===============================
// Top-level draw
// ===============================
pub fn draw(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // header
            Constraint::Min(0),    // body
            Constraint::Length(1), // footer
        ])
        .split(f.area());

    header(f, chunks[0], app);
    let model = app.model(viewport_rows(f.area().height), Utc::now());
    match &model {
        Some(m) => body(f, chunks[1], m),
        None => {
            f.render_widget(Paragraph::new("No views configured."), chunks[1]);
        }
    }
    footer(f, chunks[2], app, model.as_ref());
}

fn header(f: &mut Frame, area: Rect, app: &App) {
    let mut spans = vec![Span::styled(" aoscan ", Style::default().add_modifier(Modifier::BOLD))];
    for (i, title) in app.tab_titles().into_iter().enumerate() {
        spans.push(Span::raw("│ "));
        if i == app.active() {
            spans.push(Span::styled(
                title.to_string(),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ));
        } else {
            spans.push(Span::raw(title.to_string()));
        }
        spans.push(Span::raw(" "));
    }
    if let Some(a) = app.annotation() {
        spans.push(Span::styled(format!("  {a}"), Style::default().fg(Color::DarkGray)));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

// ===============================
// Body
// ===============================
fn status_text(m: &TableModel) -> Option<String> {
    match m.status {
        Status::Idle | Status::LoadingInitial if m.loaded == 0 => Some("Loading...".into()),
        Status::Failed if m.loaded == 0 => Some(format!(
            "Failed to load: {}\n\nPress r to retry.",
            m.error.as_deref().unwrap_or("unknown error")
        )),
        Status::Exhausted | Status::Ready if m.loaded == 0 => Some("No data available.".into()),
        _ => None,
    }
}

fn body(f: &mut Frame, area: Rect, m: &TableModel) {
    let sort = format!(
        "{} {}",
        m.sort.field,
        if m.sort.ascending { "↑" } else { "↓" }
    );
    let filters = m
        .filters
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    let title = if filters.is_empty() {
        format!(" {} · {sort} ", m.title)
    } else {
        format!(" {} · {sort} · {filters} ", m.title)
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded);

    if let Some(text) = status_text(m) {
        f.render_widget(Paragraph::new(text).block(block), area);
        return;
    }

    let header = TableLine::new(
        m.headers
            .iter()
            .map(|h| Cell::from(*h).style(Style::default().add_modifier(Modifier::BOLD))),
    );
    let lines = m.rows.iter().map(|cells| TableLine::new(cells.iter().map(|c| Cell::from(c.as_str()))));
    let widths: Vec<Constraint> = m.widths.iter().map(|w| Constraint::Length(*w)).collect();

    let table = Table::new(lines, widths)
        .header(header)
        .block(block)
        .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    // Virtualized models hold only the visible window; selection is relative to it.
    let mut state = TableState::default();
    match m.strategy {
        RenderStrategy::Direct => state.select(Some(m.selected)),
        RenderStrategy::Virtualized => {
            state.select(m.selected.checked_sub(m.first_index));
        }
    }
    f.render_stateful_widget(table, area, &mut state);
}

// ===============================
// Footer
// ===============================
fn footer(f: &mut Frame, area: Rect, app: &App, model: Option<&TableModel>) {
    let mut spans = Vec::new();
    if let Some(m) = model {
        let count = match m.total {
            Some(t) => format!("{}/{t}", m.loaded),
            None => m.loaded.to_string(),
        };
        spans.push(Span::raw(format!(" {count} rows ")));
        let (label, color) = match m.status {
            Status::LoadingInitial | Status::LoadingMore => ("loading", Color::Yellow),
            Status::Exhausted => ("end reached", Color::DarkGray),
            Status::Failed => ("error (r to retry)", Color::Red),
            Status::Ready | Status::Idle => ("", Color::Reset),
        };
        if !label.is_empty() {
            spans.push(Span::styled(format!("[{label}] "), Style::default().fg(color)));
        }
    }
    if let Some(s) = app.last_status() {
        spans.push(Span::styled(s.to_string(), Style::default().fg(Color::DarkGray)));
    }
    spans.push(Span::raw(
        "  j/k move · s sort · o field · t type · a action · r retry · Tab view · q quit",
    ));
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}
