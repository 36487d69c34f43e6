use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::app::{App, FocusPane, InputMode, SidebarField};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe edits.
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key).await?,
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick_animation(),
    }
    Ok(())
}

async fn handle_key(app: &mut App, key: KeyEvent) -> Result<()> {
    // Works everywhere, even mid-edit.
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return Ok(());
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key).await?,
        InputMode::Editing => handle_editing_mode(app, key).await?,
    }

    Ok(())
}

async fn handle_normal_mode(app: &mut App, key: KeyEvent) -> Result<()> {
    // Session-wide actions
    match key.code {
        KeyCode::Char('q') => {
            app.should_quit = true;
            return Ok(());
        }
        KeyCode::Char('e') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.export_history();
            return Ok(());
        }
        KeyCode::Char('l') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.clear_messages();
            return Ok(());
        }
        KeyCode::Tab => {
            app.focus = match app.focus {
                FocusPane::Sidebar => FocusPane::Input,
                FocusPane::Input => FocusPane::Chat,
                FocusPane::Chat => FocusPane::Sidebar,
            };
            return Ok(());
        }
        _ => {}
    }

    match app.focus {
        FocusPane::Sidebar => handle_sidebar_normal(app, key).await?,
        FocusPane::Chat => handle_chat_normal(app, key),
        FocusPane::Input => {
            if matches!(key.code, KeyCode::Enter | KeyCode::Char('i')) {
                app.input_mode = InputMode::Editing;
                app.question_cursor = app.question_input.chars().count();
            }
        }
    }

    Ok(())
}

async fn handle_sidebar_normal(app: &mut App, key: KeyEvent) -> Result<()> {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.sidebar_next(),
        KeyCode::Char('k') | KeyCode::Up => app.sidebar_prev(),
        KeyCode::Char('r') => app.refresh_local_databases(),
        KeyCode::Char(' ') if app.current_field() == SidebarField::Mode => app.toggle_mode(),
        KeyCode::Enter => match app.current_field() {
            SidebarField::Mode => app.toggle_mode(),
            SidebarField::DbFile => {
                if app.local_dbs.is_empty() {
                    // Surface the discovery error again.
                    app.refresh_local_databases();
                } else {
                    app.input_mode = InputMode::Editing;
                }
            }
            SidebarField::Connect => app.connect().await,
            _ => {
                app.input_mode = InputMode::Editing;
                app.field_cursor = app
                    .active_field_value()
                    .map(|v| v.chars().count())
                    .unwrap_or(0);
            }
        },
        _ => {}
    }
    Ok(())
}

fn handle_chat_normal(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('k') | KeyCode::Up => app.scroll_up(1),
        KeyCode::Char('j') | KeyCode::Down => app.scroll_down(1),
        KeyCode::PageUp => app.scroll_up(10),
        KeyCode::PageDown => app.scroll_down(10),
        KeyCode::Char('g') => app.scroll_up(usize::MAX / 2),
        KeyCode::Char('G') | KeyCode::End => app.scroll_to_bottom(),
        _ => {}
    }
}

async fn handle_editing_mode(app: &mut App, key: KeyEvent) -> Result<()> {
    match app.focus {
        FocusPane::Sidebar => handle_sidebar_editing(app, key),
        FocusPane::Input => handle_question_editing(app, key),
        // Editing never targets the chat pane; fall back to normal.
        FocusPane::Chat => app.input_mode = InputMode::Normal,
    }
    Ok(())
}

fn handle_sidebar_editing(app: &mut App, key: KeyEvent) {
    if app.current_field() == SidebarField::DbFile {
        match key.code {
            KeyCode::Esc => app.input_mode = InputMode::Normal,
            KeyCode::Char('j') | KeyCode::Down => app.db_list_down(),
            KeyCode::Char('k') | KeyCode::Up => app.db_list_up(),
            KeyCode::Enter => {
                app.input_mode = InputMode::Normal;
                app.sidebar_next();
            }
            _ => {}
        }
        return;
    }

    match key.code {
        KeyCode::Esc => app.input_mode = InputMode::Normal,
        KeyCode::Enter => {
            // Commit and fall through to the next form row.
            app.input_mode = InputMode::Normal;
            app.sidebar_next();
        }
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            let cursor = app.field_cursor;
            if let Some(value) = app.active_field_value_mut() {
                let idx = char_to_byte_index(value, cursor);
                value.insert(idx, c);
                app.field_cursor = cursor + 1;
            }
        }
        KeyCode::Backspace => {
            let cursor = app.field_cursor;
            if cursor > 0 {
                if let Some(value) = app.active_field_value_mut() {
                    let idx = char_to_byte_index(value, cursor - 1);
                    value.remove(idx);
                    app.field_cursor = cursor - 1;
                }
            }
        }
        KeyCode::Left => app.field_cursor = app.field_cursor.saturating_sub(1),
        KeyCode::Right => {
            let len = app.active_field_value().map(|v| v.chars().count()).unwrap_or(0);
            app.field_cursor = (app.field_cursor + 1).min(len);
        }
        KeyCode::Home => app.field_cursor = 0,
        KeyCode::End => {
            app.field_cursor = app.active_field_value().map(|v| v.chars().count()).unwrap_or(0);
        }
        _ => {}
    }
}

fn handle_question_editing(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.input_mode = InputMode::Normal,
        KeyCode::Enter => app.submit_question(),
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            let idx = char_to_byte_index(&app.question_input, app.question_cursor);
            app.question_input.insert(idx, c);
            app.question_cursor += 1;
        }
        KeyCode::Backspace => {
            if app.question_cursor > 0 {
                let idx = char_to_byte_index(&app.question_input, app.question_cursor - 1);
                app.question_input.remove(idx);
                app.question_cursor -= 1;
            }
        }
        KeyCode::Left => app.question_cursor = app.question_cursor.saturating_sub(1),
        KeyCode::Right => {
            let len = app.question_input.chars().count();
            app.question_cursor = (app.question_cursor + 1).min(len);
        }
        KeyCode::Home => app.question_cursor = 0,
        KeyCode::End => app.question_cursor = app.question_input.chars().count(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crossterm::event::KeyEvent;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[tokio::test]
    async fn quit_keys_set_the_flag() {
        let mut app = App::new(&Config::default());
        handle_key(&mut app, key(KeyCode::Char('q'))).await.unwrap();
        assert!(app.should_quit);

        let mut app = App::new(&Config::default());
        handle_key(
            &mut app,
            KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL),
        )
        .await
        .unwrap();
        assert!(app.should_quit);
    }

    #[tokio::test]
    async fn tab_cycles_focus() {
        let mut app = App::new(&Config::default());
        assert_eq!(app.focus, FocusPane::Sidebar);
        handle_key(&mut app, key(KeyCode::Tab)).await.unwrap();
        assert_eq!(app.focus, FocusPane::Input);
        handle_key(&mut app, key(KeyCode::Tab)).await.unwrap();
        assert_eq!(app.focus, FocusPane::Chat);
        handle_key(&mut app, key(KeyCode::Tab)).await.unwrap();
        assert_eq!(app.focus, FocusPane::Sidebar);
    }

    #[tokio::test]
    async fn editing_a_text_field_inserts_and_deletes() {
        let mut app = App::new(&Config::default());
        app.toggle_mode(); // networked fields
        app.sidebar_next(); // Host
        assert_eq!(app.current_field(), SidebarField::Host);

        handle_key(&mut app, key(KeyCode::Enter)).await.unwrap();
        assert_eq!(app.input_mode, InputMode::Editing);

        for c in "db:1x".chars() {
            handle_key(&mut app, key(KeyCode::Char(c))).await.unwrap();
        }
        handle_key(&mut app, key(KeyCode::Backspace)).await.unwrap();
        assert_eq!(app.host_input, "db:1");

        handle_key(&mut app, key(KeyCode::Enter)).await.unwrap();
        assert_eq!(app.input_mode, InputMode::Normal);
        assert_eq!(app.current_field(), SidebarField::User);
    }

    #[tokio::test]
    async fn question_editing_is_utf8_safe() {
        let mut app = App::new(&Config::default());
        app.focus = FocusPane::Input;
        app.input_mode = InputMode::Editing;

        for c in "héllo".chars() {
            handle_key(&mut app, key(KeyCode::Char(c))).await.unwrap();
        }
        handle_key(&mut app, key(KeyCode::Left)).await.unwrap();
        handle_key(&mut app, key(KeyCode::Left)).await.unwrap();
        handle_key(&mut app, key(KeyCode::Backspace)).await.unwrap();
        assert_eq!(app.question_input, "hélo");
        assert_eq!(app.question_cursor, 2);
    }

    #[test]
    fn char_index_maps_to_byte_index() {
        assert_eq!(char_to_byte_index("héllo", 0), 0);
        assert_eq!(char_to_byte_index("héllo", 1), 1);
        assert_eq!(char_to_byte_index("héllo", 2), 3);
        assert_eq!(char_to_byte_index("héllo", 99), 6);
    }
}
