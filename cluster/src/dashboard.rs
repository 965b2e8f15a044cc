//! Dashboard drawing
//!
//! Maps the cluster's 970x580 reference geometry onto a ratatui canvas. The
//! reference layout grows downward; the canvas grows upward, so every
//! rectangle is flipped on the way in.

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::symbols::Marker;
use ratatui::text::{Line, Span};
use ratatui::widgets::canvas::{Canvas, Context, Rectangle};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;

use relay_core::render::geometry::{self, layout, CANVAS_HEIGHT, CANVAS_WIDTH};
use relay_core::{ConnectionState, DashboardFrame, StatusIndicator};

use crate::theme;

/// Everything the dashboard needs for one draw
#[derive(Debug, Clone, Copy)]
pub struct DashboardView<'a> {
    /// Render-loop frame
    pub frame: &'a DashboardFrame,
    /// Relay URL shown in the footer
    pub url: &'a str,
    /// Last link error, if any
    pub last_error: Option<&'a str>,
}

/// Draw the full dashboard into `area`
pub fn render(f: &mut Frame, area: Rect, view: &DashboardView<'_>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme::DIM_GRAY))
        .title(" Instrument Cluster ");
    let inner = block.inner(chunks[0]);
    f.render_widget(block, chunks[0]);

    // Canvas units covered by one terminal cell, for centering text
    let cell_width = CANVAS_WIDTH / f64::from(inner.width.max(1));
    let frame = view.frame.clone();

    let canvas = Canvas::default()
        .marker(Marker::Braille)
        .x_bounds([0.0, CANVAS_WIDTH])
        .y_bounds([0.0, CANVAS_HEIGHT])
        .paint(move |ctx| paint(ctx, &frame, cell_width));
    f.render_widget(canvas, inner);

    f.render_widget(Paragraph::new(footer(view)), chunks[1]);
}

fn paint(ctx: &mut Context<'_>, frame: &DashboardFrame, cell_width: f64) {
    let display = &frame.display;

    panel(ctx, layout::LAP_COMPARE, theme::LAP_COMPARE_PANEL);
    panel(ctx, layout::LAP_TIME, theme::LAP_TIME_PANEL);
    panel(ctx, layout::CURRENT_ZONE, theme::CURRENT_ZONE_PANEL);
    panel(ctx, layout::VERTICAL_TRACK, theme::TRACK);
    panel(ctx, layout::HORIZONTAL_TRACK, theme::TRACK);

    let (vw, vh) = layout::VERTICAL_MARKER;
    panel(
        ctx,
        geometry::Rect::new(layout::VERTICAL_MARKER_X, display.vertical_y, vw, vh),
        theme::MARKER,
    );
    let (hw, hh) = layout::HORIZONTAL_MARKER;
    panel(
        ctx,
        geometry::Rect::new(display.horizontal_x, layout::HORIZONTAL_MARKER_Y, hw, hh),
        theme::MARKER,
    );

    let status_color = theme::status_color(frame.status);
    panel(ctx, layout::STATUS_BUTTON, status_color);

    // Text goes last so it sits on top of the shapes
    ctx.layer();
    label(ctx, layout::LAP_COMPARE, &display.lap_compare, cell_width, theme::PANEL_TEXT);
    label(ctx, layout::LAP_TIME, &display.lap_time, cell_width, theme::PANEL_TEXT);
    label(ctx, layout::CURRENT_ZONE, &display.current_zone, cell_width, theme::PANEL_TEXT);

    let status_text = match frame.status {
        StatusIndicator::Connected => "LIVE",
        StatusIndicator::Disconnected => "OFF",
    };
    label(ctx, layout::STATUS_BUTTON, status_text, cell_width, status_color);
}

/// Flip a reference rectangle into canvas coordinates
fn to_canvas(rect: geometry::Rect) -> (f64, f64) {
    (rect.x, CANVAS_HEIGHT - rect.y - rect.height)
}

fn panel(ctx: &mut Context<'_>, rect: geometry::Rect, color: ratatui::style::Color) {
    let (x, y) = to_canvas(rect);
    ctx.draw(&Rectangle {
        x,
        y,
        width: rect.width,
        height: rect.height,
        color,
    });
}

fn label(
    ctx: &mut Context<'_>,
    rect: geometry::Rect,
    text: &str,
    cell_width: f64,
    color: ratatui::style::Color,
) {
    let (cx, cy) = rect.center();
    let half_width = text.chars().count() as f64 * cell_width / 2.0;
    let x = (cx - half_width).max(rect.x);
    ctx.print(
        x,
        CANVAS_HEIGHT - cy,
        Line::styled(
            text.to_string(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ),
    );
}

fn footer(view: &DashboardView<'_>) -> Line<'static> {
    let frame = view.frame;
    let state = match frame.connection {
        ConnectionState::Connected => "connected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Disconnected => "disconnected",
    };

    let mut spans = vec![
        Span::styled(
            format!(" \u{25cf} {state} "),
            Style::default().fg(theme::status_color(frame.status)),
        ),
        Span::styled(view.url.to_string(), Style::default().fg(theme::DIM_GRAY)),
        Span::raw("  "),
        Span::styled(
            "[d/space] toggle  [q/Esc] quit",
            Style::default().fg(theme::DIM_GRAY),
        ),
    ];

    if let Some(error) = view.last_error {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            error.to_string(),
            Style::default().fg(theme::ERROR_RED),
        ));
    }

    Line::from(spans)
}
