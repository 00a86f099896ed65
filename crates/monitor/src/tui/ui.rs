//! TUI rendering with ratatui
//!
//! Status bar on top, scrolling event log in the middle, key hints at the
//! bottom. The help dialog is drawn over everything when open.

use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
};
use std::time::Duration;

use super::app::{App, Dialog, LineKind, Status};

/// Main render function
pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Status bar
            Constraint::Min(5),    // Event log
            Constraint::Length(3), // Help bar
        ])
        .split(frame.area());

    render_status_bar(frame, app, chunks[0]);
    render_log(frame, app, chunks[1]);
    render_help_bar(frame, chunks[2]);

    if app.dialog() == Dialog::Help {
        render_help_dialog(frame);
    }
}

fn status_span(status: Status) -> Span<'static> {
    let (text, color) = match status {
        Status::Idle => ("Idle", Color::DarkGray),
        Status::Starting => ("Starting", Color::Yellow),
        Status::Monitoring => ("Monitoring", Color::Green),
        Status::Stopping => ("Stopping", Color::Yellow),
    };
    Span::styled(
        text,
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    )
}

/// Render the status bar (top panel)
fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let mut status_text = vec![
        Span::styled("State: ", Style::default().fg(Color::DarkGray)),
        status_span(app.status()),
        Span::raw("  |  "),
        Span::styled("Delay: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            format!("{}ms", app.poll_delay().as_millis()),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw("  |  "),
        Span::styled("Connected: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            app.connected_count().to_string(),
            Style::default().fg(Color::Green),
        ),
        Span::raw("  "),
        Span::styled("Removed: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            app.removed_count().to_string(),
            Style::default().fg(Color::Red),
        ),
        Span::raw("  |  "),
        Span::styled("Uptime: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            format_duration(app.uptime()),
            Style::default().fg(Color::Green),
        ),
    ];

    if let Some(notice) = app.notice() {
        status_text.push(Span::raw("  |  "));
        status_text.push(Span::styled(
            notice.to_string(),
            Style::default().fg(Color::Yellow),
        ));
    }

    let status = Paragraph::new(Line::from(status_text))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" USB Device Monitor ")
                .title_alignment(Alignment::Center)
                .border_style(Style::default().fg(Color::Blue)),
        )
        .alignment(Alignment::Center);

    frame.render_widget(status, area);
}

fn line_style(kind: LineKind) -> Style {
    match kind {
        LineKind::Info => Style::default(),
        LineKind::Connected => Style::default().fg(Color::Green),
        LineKind::Removed => Style::default().fg(Color::Red),
        LineKind::Error => Style::default()
            .fg(Color::LightRed)
            .add_modifier(Modifier::BOLD),
    }
}

/// First line index to draw so the newest lines (minus scroll) fill the pane
fn first_visible_line(total: usize, visible: usize, scroll_offset: usize) -> usize {
    total.saturating_sub(visible).saturating_sub(scroll_offset)
}

/// Render the event log (center panel)
fn render_log(frame: &mut Frame, app: &App, area: Rect) {
    let visible = area.height.saturating_sub(2) as usize;
    let lines = app.lines();
    let start = first_visible_line(lines.len(), visible, app.scroll_offset());

    let text: Vec<Line> = lines
        .iter()
        .skip(start)
        .take(visible)
        .map(|line| Line::from(Span::styled(line.text.clone(), line_style(line.kind))))
        .collect();

    let title = if app.scroll_offset() > 0 {
        format!(" Events ({} lines, scrolled {}) ", lines.len(), app.scroll_offset())
    } else {
        format!(" Events ({} lines) ", lines.len())
    };

    let log = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(Style::default().fg(Color::Blue)),
    );

    frame.render_widget(log, area);
}

fn key_span(key: &'static str) -> Span<'static> {
    Span::styled(
        key,
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    )
}

/// Render the help bar (bottom panel)
fn render_help_bar(frame: &mut Frame, area: Rect) {
    let help_text = vec![
        key_span("s"),
        Span::raw(" Start  "),
        key_span("x"),
        Span::raw(" Stop  "),
        key_span("i"),
        Span::raw(" Device Info  "),
        key_span("c"),
        Span::raw(" Clear  "),
        key_span("j/k"),
        Span::raw(" Scroll  "),
        key_span("?"),
        Span::raw(" Help  "),
        key_span("q"),
        Span::raw(" Quit"),
    ];

    let help = Paragraph::new(Line::from(help_text))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray)),
        )
        .alignment(Alignment::Center);

    frame.render_widget(help, area);
}

/// Render the help dialog
fn render_help_dialog(frame: &mut Frame) {
    let area = centered_rect(50, 60, frame.area());

    let rows = [
        ("s", "Start monitoring (clears the log)"),
        ("x", "Stop monitoring"),
        ("i", "List connected devices (idle only)"),
        ("c", "Clear the log"),
        ("k / Up", "Scroll up"),
        ("j / Down", "Scroll down"),
        ("G / End", "Follow newest events"),
        ("?", "Toggle this help"),
        ("Esc", "Close dialog"),
        ("q / Ctrl+C", "Quit"),
    ];

    let mut text = vec![Line::from("")];
    text.extend(rows.iter().map(|(key, description)| {
        Line::from(vec![
            Span::styled(
                format!("  {:<12}", key),
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(*description),
        ])
    }));

    let help = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Help ")
            .title_alignment(Alignment::Center)
            .border_style(Style::default().fg(Color::Yellow)),
    );

    frame.render_widget(Clear, area);
    frame.render_widget(help, area);
}

/// Helper function to create a centered rect
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

/// Format duration for display
fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tui::events::Action;
    use ratatui::{Terminal, backend::TestBackend};

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn test_first_visible_line() {
        // Fits entirely
        assert_eq!(first_visible_line(3, 10, 0), 0);
        // Follow the tail
        assert_eq!(first_visible_line(30, 10, 0), 20);
        // Scrolled back
        assert_eq!(first_visible_line(30, 10, 5), 15);
        assert_eq!(first_visible_line(30, 10, 50), 0);
    }

    #[test]
    fn test_centered_rect() {
        let area = Rect::new(0, 0, 100, 50);
        let centered = centered_rect(50, 50, area);

        assert!(centered.x > 0);
        assert!(centered.y > 0);
        assert!(centered.width < 100);
        assert!(centered.height < 50);
    }

    #[test]
    fn test_render_smoke() {
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        let mut app = App::new(Duration::from_secs(1));
        app.handle_action(Action::Start);
        app.show_error("Enumeration failed: USB error: Busy");

        terminal.draw(|frame| render(frame, &app)).unwrap();

        app.handle_action(Action::ShowHelp);
        terminal.draw(|frame| render(frame, &app)).unwrap();

        let buffer = terminal.backend().buffer();
        let content: String = buffer.content().iter().map(|c| c.symbol()).collect();
        assert!(content.contains("USB Device Monitor"));
        assert!(content.contains("Help"));
    }
}
