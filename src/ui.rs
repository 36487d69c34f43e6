use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph},
};

use crate::app::{App, DbMode, FocusPane, InputMode, SidebarField};
use crate::history::ChatRole;

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    let [sidebar_area, main_area] =
        Layout::horizontal([Constraint::Length(34), Constraint::Min(20)]).areas(body_area);

    render_sidebar(app, frame, sidebar_area);

    let [chat_area, input_area] =
        Layout::vertical([Constraint::Min(3), Constraint::Length(3)]).areas(main_area);

    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" dbchat ", Style::default().fg(Color::Cyan).bold()),
        Span::raw("chat with your SQL database "),
        Span::styled(
            format!("[{}] ", app.model),
            Style::default().fg(Color::Magenta),
        ),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn pane_border(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    }
}

/// Build one "Label:    value" form row. Returns the line and, when the
/// row is being edited, the cursor column within the pane.
fn field_line(
    label: &str,
    value: &str,
    mask: bool,
    selected: bool,
    editing: bool,
    cursor: usize,
) -> (Line<'static>, Option<u16>) {
    const LABEL_WIDTH: usize = 10;

    let shown = if mask {
        "•".repeat(value.chars().count())
    } else {
        value.to_string()
    };

    let style = if selected {
        Style::default().bg(Color::DarkGray).fg(Color::White)
    } else {
        Style::default()
    };

    let line = Line::from(Span::styled(
        format!("{:<LABEL_WIDTH$}{}", format!("{label}:"), shown),
        style,
    ));

    let cursor_col = if selected && editing {
        Some((LABEL_WIDTH + cursor) as u16)
    } else {
        None
    };

    (line, cursor_col)
}

fn render_sidebar(app: &App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Sidebar;
    let editing = focused && app.input_mode == InputMode::Editing;
    let current = app.current_field();

    let block = Block::default()
        .title(" Database ")
        .borders(Borders::ALL)
        .border_style(pane_border(focused));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let hint_style = Style::default().fg(Color::DarkGray);
    let selected_style = Style::default().bg(Color::DarkGray).fg(Color::White);

    let mut lines: Vec<Line> = Vec::new();
    let mut cursor: Option<(u16, u16)> = None;

    // Mode toggle
    lines.push(Line::from(Span::styled(
        "Choose the DB to chat with",
        hint_style,
    )));
    let mode_selected = focused && current == SidebarField::Mode;
    let mode_style = if mode_selected {
        selected_style
    } else {
        Style::default()
    };
    lines.push(Line::from(Span::styled(
        format!(
            "{} SQLite file",
            if app.mode == DbMode::Local { "(•)" } else { "( )" }
        ),
        mode_style,
    )));
    lines.push(Line::from(Span::styled(
        format!(
            "{} MySQL server",
            if app.mode == DbMode::Networked { "(•)" } else { "( )" }
        ),
        mode_style,
    )));
    lines.push(Line::from(""));

    match app.mode {
        DbMode::Local => {
            let file_selected = focused && current == SidebarField::DbFile;
            lines.push(Line::from(Span::styled(
                format!("Database file ({} found)", app.local_dbs.len()),
                if file_selected {
                    selected_style
                } else {
                    Style::default()
                },
            )));
            if app.local_dbs.is_empty() {
                lines.push(Line::from(Span::styled(
                    "  none found (press r to rescan)",
                    Style::default().fg(Color::Red),
                )));
            }
            for (i, path) in app.local_dbs.iter().enumerate() {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string());
                let is_chosen = app.db_list_state.selected() == Some(i);
                let marker = if is_chosen { "▶ " } else { "  " };
                let style = match (is_chosen, file_selected && editing) {
                    (true, true) => Style::default().fg(Color::Black).bg(Color::Cyan),
                    (true, false) => Style::default().fg(Color::Cyan),
                    _ => Style::default(),
                };
                lines.push(Line::from(Span::styled(format!("{marker}{name}"), style)));
            }
        }
        DbMode::Networked => {
            let rows = [
                (SidebarField::Host, app.host_input.clone(), false),
                (SidebarField::User, app.user_input.clone(), false),
                (SidebarField::Password, app.password_input.clone(), true),
                (SidebarField::Database, app.database_input.clone(), false),
            ];
            for (field, value, mask) in rows {
                let selected = focused && current == field;
                let (line, col) = field_line(
                    field.label(),
                    &value,
                    mask,
                    selected,
                    editing,
                    app.field_cursor,
                );
                if let Some(col) = col {
                    cursor = Some((col, lines.len() as u16));
                }
                lines.push(line);
            }
        }
    }

    lines.push(Line::from(""));
    let key_selected = focused && current == SidebarField::ApiKey;
    let (key_line, key_col) = field_line(
        "API key",
        &app.api_key_input,
        true,
        key_selected,
        editing,
        app.field_cursor,
    );
    if let Some(col) = key_col {
        cursor = Some((col, lines.len() as u16));
    }
    lines.push(key_line);

    lines.push(Line::from(""));
    let connect_style = if focused && current == SidebarField::Connect {
        Style::default().fg(Color::Black).bg(Color::Green)
    } else {
        Style::default().fg(Color::Green)
    };
    lines.push(Line::from(Span::styled("[ Connect ]", connect_style)));

    if let Some(target) = &app.target {
        lines.push(Line::from(""));
        let width = inner.width.saturating_sub(1) as usize;
        for wrapped in wrap_text(&format!("Connected to {}", target.describe()), width) {
            lines.push(Line::from(Span::styled(
                wrapped,
                Style::default().fg(Color::Green),
            )));
        }
        if !app.tables.is_empty() {
            for wrapped in wrap_text(&format!("Tables: {}", app.tables.join(", ")), width) {
                lines.push(Line::from(Span::styled(wrapped, hint_style)));
            }
        }
    }

    frame.render_widget(Paragraph::new(Text::from(lines)), inner);

    if let Some((col, row)) = cursor {
        if row < inner.height {
            let x = (inner.x + col).min(inner.x + inner.width.saturating_sub(1));
            frame.set_cursor_position((x, inner.y + row));
        }
    }
}

fn render_chat(app: &App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Chat;
    let block = Block::default()
        .title(" Chat ")
        .borders(Borders::ALL)
        .border_style(pane_border(focused));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let wrap_width = inner.width.saturating_sub(1) as usize;
    let mut all_lines: Vec<Line> = Vec::new();

    for msg in &app.messages {
        let (name, header_style, body_style) = match msg.role {
            ChatRole::User => (
                "You",
                Style::default().fg(Color::Cyan).bold(),
                Style::default().fg(Color::Cyan),
            ),
            ChatRole::Assistant => (
                "Assistant",
                Style::default().fg(Color::Green).bold(),
                Style::default(),
            ),
        };
        all_lines.push(Line::from(Span::styled(format!("{name}:"), header_style)));
        for wrapped in wrap_text(&msg.content, wrap_width) {
            all_lines.push(Line::from(Span::styled(wrapped, body_style)));
        }
        all_lines.push(Line::from(""));
    }

    // Live view of the run in progress: reasoning tokens, tool calls,
    // observations, in arrival order.
    if app.agent_running {
        all_lines.push(Line::from(Span::styled(
            "Assistant:",
            Style::default().fg(Color::Green).bold(),
        )));
        let trace_style = Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC);
        for entry in &app.trace {
            for wrapped in wrap_text(entry, wrap_width) {
                all_lines.push(Line::from(Span::styled(wrapped, trace_style)));
            }
        }
        if !app.trace_buffer.trim().is_empty() {
            for wrapped in wrap_text(&app.trace_buffer, wrap_width) {
                all_lines.push(Line::from(Span::styled(
                    wrapped,
                    Style::default().fg(Color::DarkGray),
                )));
            }
        }
        let dots = ".".repeat(app.animation_frame as usize + 1);
        all_lines.push(Line::from(Span::styled(
            format!("Thinking{dots}"),
            Style::default().fg(Color::Yellow),
        )));
    }

    let total = all_lines.len();
    let visible = inner.height as usize;
    let max_scroll = total.saturating_sub(visible);
    let offset = app.scroll_offset.min(max_scroll);

    let end = total - offset;
    let start = end.saturating_sub(visible);

    let visible_lines: Vec<Line> = all_lines.into_iter().skip(start).take(visible).collect();
    frame.render_widget(Paragraph::new(Text::from(visible_lines)), inner);

    if start > 0 {
        let indicator = Paragraph::new(format!("↑ {start} more"))
            .style(Style::default().fg(Color::DarkGray));
        let indicator_area = Rect {
            x: inner.x + inner.width.saturating_sub(12),
            y: inner.y,
            width: 12.min(inner.width),
            height: 1,
        };
        frame.render_widget(indicator, indicator_area);
    }
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Input;
    let editing = focused && app.input_mode == InputMode::Editing;

    let block = Block::default()
        .title(" Question ")
        .borders(Borders::ALL)
        .border_style(pane_border(focused));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if app.question_input.is_empty() && !editing {
        let placeholder = Paragraph::new("Ask anything from the database")
            .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(placeholder, inner);
        return;
    }

    // Keep the cursor in view by sliding the text left once it overflows.
    let width = inner.width.max(1);
    let cursor_col = app.question_cursor as u16;
    let x_off = cursor_col.saturating_sub(width.saturating_sub(1));

    let paragraph = Paragraph::new(app.question_input.as_str()).scroll((0, x_off));
    frame.render_widget(paragraph, inner);

    if editing {
        frame.set_cursor_position((inner.x + cursor_col - x_off, inner.y));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hints: Vec<Span> = match app.input_mode {
        InputMode::Editing => vec![
            Span::styled(" Enter ", key_style),
            Span::styled(
                if app.focus == FocusPane::Input { " send " } else { " next " },
                label_style,
            ),
            Span::styled(" Esc ", key_style),
            Span::styled(" done ", label_style),
        ],
        InputMode::Normal => vec![
            Span::styled(" Tab ", key_style),
            Span::styled(" focus ", label_style),
            Span::styled(" j/k ", key_style),
            Span::styled(" nav ", label_style),
            Span::styled(" Enter ", key_style),
            Span::styled(" select ", label_style),
            Span::styled(" ^E ", key_style),
            Span::styled(" export ", label_style),
            Span::styled(" ^L ", key_style),
            Span::styled(" clear ", label_style),
            Span::styled(" q ", key_style),
            Span::styled(" quit ", label_style),
        ],
    };

    let status_style = if app.agent_running {
        Style::default().fg(Color::Yellow)
    } else if app.status.contains("error") || app.status.contains("Error") {
        Style::default().fg(Color::Red)
    } else {
        Style::default().fg(Color::White)
    };

    let mut spans = vec![Span::styled(format!(" {} ", app.status), status_style)];
    spans.extend(hints);
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Greedy word wrap that preserves blank lines and hard-breaks words
/// longer than the width.
fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(10);
    let mut out = Vec::new();

    for raw in text.lines() {
        if raw.trim().is_empty() {
            out.push(String::new());
            continue;
        }

        let mut current = String::new();
        for word in raw.split_whitespace() {
            let mut word = word.to_string();
            loop {
                let current_len = current.chars().count();
                let word_len = word.chars().count();
                let needed = if current.is_empty() {
                    word_len
                } else {
                    current_len + 1 + word_len
                };

                if needed <= width {
                    if !current.is_empty() {
                        current.push(' ');
                    }
                    current.push_str(&word);
                    break;
                }

                if current.is_empty() {
                    let head: String = word.chars().take(width).collect();
                    word = word.chars().skip(width).collect();
                    out.push(head);
                    if word.is_empty() {
                        break;
                    }
                } else {
                    out.push(std::mem::take(&mut current));
                }
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
    }

    if out.is_empty() {
        out.push(String::new());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(wrap_text("hello world", 40), vec!["hello world"]);
    }

    #[test]
    fn long_lines_break_at_word_boundaries() {
        let wrapped = wrap_text("alpha beta gamma delta", 11);
        assert_eq!(wrapped, vec!["alpha beta", "gamma delta"]);
    }

    #[test]
    fn overlong_words_are_hard_broken() {
        let wrapped = wrap_text("abcdefghijklmnop", 10);
        assert_eq!(wrapped, vec!["abcdefghij", "klmnop"]);
    }

    #[test]
    fn blank_lines_survive() {
        let wrapped = wrap_text("one\n\ntwo", 40);
        assert_eq!(wrapped, vec!["one", "", "two"]);
    }

    #[test]
    fn empty_input_yields_one_empty_line() {
        assert_eq!(wrap_text("", 40), vec![""]);
    }
}
