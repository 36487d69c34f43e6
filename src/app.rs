use std::path::PathBuf;
use std::sync::Arc;

use ratatui::widgets::ListState;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::agent::{format_question, AgentEvent, SqlAgent};
use crate::config::Config;
use crate::db::{self, ConnectionTarget, SqlBackend};
use crate::groq::{GroqClient, DEFAULT_MODEL};
use crate::history::{self, ChatMessage, HistoryRecord, GREETING};

/// Where the database-selection form points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbMode {
    Local,
    Networked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Sidebar,
    Chat,
    Input,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

/// The rows of the sidebar form, in display order. The visible sequence
/// depends on the selected mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebarField {
    Mode,
    DbFile,
    Host,
    User,
    Password,
    Database,
    ApiKey,
    Connect,
}

impl SidebarField {
    pub fn sequence(mode: DbMode) -> &'static [SidebarField] {
        match mode {
            DbMode::Local => &[
                SidebarField::Mode,
                SidebarField::DbFile,
                SidebarField::ApiKey,
                SidebarField::Connect,
            ],
            DbMode::Networked => &[
                SidebarField::Mode,
                SidebarField::Host,
                SidebarField::User,
                SidebarField::Password,
                SidebarField::Database,
                SidebarField::ApiKey,
                SidebarField::Connect,
            ],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SidebarField::Mode => "Mode",
            SidebarField::DbFile => "Database file",
            SidebarField::Host => "Host",
            SidebarField::User => "User",
            SidebarField::Password => "Password",
            SidebarField::Database => "Database",
            SidebarField::ApiKey => "Groq API key",
            SidebarField::Connect => "Connect",
        }
    }
}

pub struct App {
    pub should_quit: bool,
    pub focus: FocusPane,
    pub input_mode: InputMode,

    // Sidebar form
    pub mode: DbMode,
    pub sidebar_index: usize,
    pub database_dir: PathBuf,
    pub local_dbs: Vec<PathBuf>,
    pub db_list_state: ListState,
    pub host_input: String,
    pub user_input: String,
    pub password_input: String,
    pub database_input: String,
    pub api_key_input: String,
    pub field_cursor: usize,

    // Connection
    pub db: Option<Arc<dyn SqlBackend>>,
    pub target: Option<ConnectionTarget>,
    pub tables: Vec<String>,

    // Chat
    pub messages: Vec<ChatMessage>,
    pub question_input: String,
    pub question_cursor: usize,
    pub scroll_offset: usize,
    pub auto_scroll: bool,

    // In-flight agent run
    pub agent_running: bool,
    pub trace: Vec<String>,
    pub trace_buffer: String,
    agent_rx: Option<mpsc::UnboundedReceiver<AgentEvent>>,
    pending: Option<(String, String)>,
    pub animation_frame: u8,

    // Export log: append-only, survives "clear"
    pub history: Vec<HistoryRecord>,

    pub status: String,
    pub model: String,
}

impl App {
    pub fn new(config: &Config) -> Self {
        let database_dir = config
            .database_dir
            .clone()
            .unwrap_or_else(|| "database/local".to_string());

        // Environment wins over the config file.
        let api_key_input = std::env::var("GROQ_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| config.groq_api_key.clone())
            .unwrap_or_default();

        let model = config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let mut app = Self {
            should_quit: false,
            focus: FocusPane::Sidebar,
            input_mode: InputMode::Normal,

            mode: DbMode::Local,
            sidebar_index: 0,
            database_dir: PathBuf::from(database_dir),
            local_dbs: Vec::new(),
            db_list_state: ListState::default(),
            host_input: String::new(),
            user_input: String::new(),
            password_input: String::new(),
            database_input: String::new(),
            api_key_input,
            field_cursor: 0,

            db: None,
            target: None,
            tables: Vec::new(),

            messages: vec![ChatMessage::assistant(GREETING)],
            question_input: String::new(),
            question_cursor: 0,
            scroll_offset: 0,
            auto_scroll: true,

            agent_running: false,
            trace: Vec::new(),
            trace_buffer: String::new(),
            agent_rx: None,
            pending: None,
            animation_frame: 0,

            history: Vec::new(),

            status: String::from("Select a database to get started"),
            model,
        };
        app.refresh_local_databases();
        app
    }

    // ----- sidebar form -----

    pub fn sidebar_fields(&self) -> &'static [SidebarField] {
        SidebarField::sequence(self.mode)
    }

    pub fn current_field(&self) -> SidebarField {
        let fields = self.sidebar_fields();
        fields[self.sidebar_index.min(fields.len() - 1)]
    }

    pub fn sidebar_next(&mut self) {
        let len = self.sidebar_fields().len();
        self.sidebar_index = (self.sidebar_index + 1).min(len - 1);
    }

    pub fn sidebar_prev(&mut self) {
        self.sidebar_index = self.sidebar_index.saturating_sub(1);
    }

    pub fn toggle_mode(&mut self) {
        self.mode = match self.mode {
            DbMode::Local => DbMode::Networked,
            DbMode::Networked => DbMode::Local,
        };
        self.sidebar_index = 0;
        if self.mode == DbMode::Local {
            self.refresh_local_databases();
        }
    }

    /// Re-scan the database directory. Zero matches is a hard error for
    /// local mode and lands in the status line immediately.
    pub fn refresh_local_databases(&mut self) {
        match db::discover_local_databases(&self.database_dir) {
            Ok(found) => {
                self.local_dbs = found;
                let idx = self
                    .db_list_state
                    .selected()
                    .unwrap_or(0)
                    .min(self.local_dbs.len() - 1);
                self.db_list_state.select(Some(idx));
            }
            Err(e) => {
                self.local_dbs.clear();
                self.db_list_state.select(None);
                self.status = e.to_string();
            }
        }
    }

    pub fn selected_db(&self) -> Option<PathBuf> {
        self.db_list_state
            .selected()
            .and_then(|i| self.local_dbs.get(i).cloned())
    }

    pub fn db_list_down(&mut self) {
        let len = self.local_dbs.len();
        if len > 0 {
            let i = self.db_list_state.selected().unwrap_or(0);
            self.db_list_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn db_list_up(&mut self) {
        let i = self.db_list_state.selected().unwrap_or(0);
        self.db_list_state.select(Some(i.saturating_sub(1)));
    }

    pub fn active_field_value(&self) -> Option<&str> {
        match self.current_field() {
            SidebarField::Host => Some(&self.host_input),
            SidebarField::User => Some(&self.user_input),
            SidebarField::Password => Some(&self.password_input),
            SidebarField::Database => Some(&self.database_input),
            SidebarField::ApiKey => Some(&self.api_key_input),
            _ => None,
        }
    }

    pub fn active_field_value_mut(&mut self) -> Option<&mut String> {
        match self.current_field() {
            SidebarField::Host => Some(&mut self.host_input),
            SidebarField::User => Some(&mut self.user_input),
            SidebarField::Password => Some(&mut self.password_input),
            SidebarField::Database => Some(&mut self.database_input),
            SidebarField::ApiKey => Some(&mut self.api_key_input),
            _ => None,
        }
    }

    pub fn api_key(&self) -> &str {
        self.api_key_input.trim()
    }

    // ----- connection -----

    /// Resolve the form into a target, open the handle, and introspect
    /// the schema. Every failure path stops here with a status message.
    pub async fn connect(&mut self) {
        let target = match self.mode {
            DbMode::Local => match self.selected_db() {
                Some(path) => ConnectionTarget::Local { path },
                None => {
                    self.status = db::DbError::NoSelection.to_string();
                    return;
                }
            },
            DbMode::Networked => match db::networked_target(
                &self.host_input,
                &self.user_input,
                &self.password_input,
                &self.database_input,
            ) {
                Ok(target) => target,
                Err(e) => {
                    self.status = format!("Connection error: {e}");
                    return;
                }
            },
        };

        if self.api_key().is_empty() {
            self.status = String::from("Please add the Groq API key");
            return;
        }

        match db::connect(&target).await {
            Ok(handle) => {
                info!(target = %target.describe(), "connected");
                // Introspection failure is not fatal; the agent just
                // starts without a schema hint.
                match handle.list_tables().await {
                    Ok(tables) => {
                        self.status = format!(
                            "Connected to {} ({} tables)",
                            target.describe(),
                            tables.len()
                        );
                        self.tables = tables;
                    }
                    Err(e) => {
                        warn!(error = %e, "schema introspection failed");
                        self.tables.clear();
                        self.status = format!("Connected; could not read schema: {e}");
                    }
                }
                self.db = Some(handle);
                self.target = Some(target);
                let _ = Config::save_api_key(self.api_key());
                self.focus = FocusPane::Input;
                self.input_mode = InputMode::Editing;
                self.question_cursor = 0;
            }
            Err(e) => {
                warn!(error = %e, "connect failed");
                self.status = format!("Connection error: {e}");
            }
        }
    }

    // ----- chat -----

    /// Send the typed question through the agent. One run at a time.
    pub fn submit_question(&mut self) {
        let question = self.question_input.trim().to_string();
        if question.is_empty() {
            return;
        }
        if self.agent_running {
            self.status = String::from("The agent is still working");
            return;
        }
        let Some(db) = self.db.clone() else {
            self.status = String::from("Connect to a database first");
            return;
        };

        self.question_input.clear();
        self.question_cursor = 0;
        self.messages.push(ChatMessage::user(question.clone()));

        let prompt = format_question(&question, &self.tables);
        self.pending = Some((question, prompt.clone()));

        let (tx, rx) = mpsc::unbounded_channel();
        self.agent_rx = Some(rx);
        self.agent_running = true;
        self.trace.clear();
        self.trace_buffer.clear();
        self.scroll_to_bottom();
        self.status = String::from("Thinking");

        let agent = SqlAgent::new(GroqClient::new(self.api_key()), &self.model, db);
        tokio::spawn(async move {
            match agent.run(&prompt, tx.clone()).await {
                Ok(answer) => {
                    let _ = tx.send(AgentEvent::Finished(answer));
                }
                Err(e) => {
                    let _ = tx.send(AgentEvent::Failed(e.to_string()));
                }
            }
        });
    }

    /// Pull everything the agent task has pushed since the last frame.
    pub fn drain_agent_events(&mut self) {
        let Some(mut rx) = self.agent_rx.take() else {
            return;
        };

        let mut done = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                AgentEvent::Token(token) => {
                    self.trace_buffer.push_str(&token);
                }
                AgentEvent::Action { tool, input } => {
                    self.flush_trace_buffer();
                    let summary = input.lines().next().unwrap_or("").to_string();
                    self.trace.push(format!("▸ {tool}: {summary}"));
                }
                AgentEvent::Observation(observation) => {
                    let shown = observation.lines().next().unwrap_or("").to_string();
                    let more = observation.lines().count().saturating_sub(1);
                    if more > 0 {
                        self.trace.push(format!("· {shown} (+{more} lines)"));
                    } else {
                        self.trace.push(format!("· {shown}"));
                    }
                }
                AgentEvent::Finished(answer) => {
                    self.finish_run(answer);
                    done = true;
                }
                AgentEvent::Failed(error) => {
                    warn!(error = %error, "agent run failed");
                    self.messages
                        .push(ChatMessage::assistant(format!("Agent error: {error}")));
                    self.pending = None;
                    self.status = format!("Agent error: {error}");
                    done = true;
                }
            }
        }

        if done {
            self.agent_running = false;
            self.trace.clear();
            self.trace_buffer.clear();
            self.scroll_to_bottom();
        } else {
            self.agent_rx = Some(rx);
        }
    }

    fn finish_run(&mut self, answer: String) {
        self.messages.push(ChatMessage::assistant(answer.clone()));
        if let Some((question, prompt)) = self.pending.take() {
            self.history.push(HistoryRecord::new(question, prompt, answer));
        }
        self.status = String::from("Ready");
    }

    fn flush_trace_buffer(&mut self) {
        let lines: Vec<String> = self
            .trace_buffer
            .lines()
            .map(|l| l.trim_end().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        for line in lines {
            self.trace.push(format!("  {line}"));
        }
        self.trace_buffer.clear();
    }

    /// Reset the displayed messages to the greeting. The export log is
    /// deliberately untouched.
    pub fn clear_messages(&mut self) {
        self.messages = vec![ChatMessage::assistant(GREETING)];
        self.scroll_to_bottom();
        self.status = String::from("Message history cleared");
    }

    /// Write the export log as CSV into the working directory.
    pub fn export_history(&mut self) {
        let csv = history::to_csv(&self.history);
        match std::fs::write("chat_history.csv", csv) {
            Ok(()) => {
                self.status = format!(
                    "Exported {} record(s) to chat_history.csv",
                    self.history.len()
                );
            }
            Err(e) => {
                self.status = format!("Export failed: {e}");
            }
        }
    }

    // ----- chat scrolling -----

    pub fn scroll_up(&mut self, amount: usize) {
        self.scroll_offset = self.scroll_offset.saturating_add(amount);
        self.auto_scroll = false;
    }

    pub fn scroll_down(&mut self, amount: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(amount);
        if self.scroll_offset == 0 {
            self.auto_scroll = true;
        }
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_offset = 0;
        self.auto_scroll = true;
    }

    pub fn tick_animation(&mut self) {
        if self.agent_running {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ChatRole;

    fn test_app() -> App {
        App::new(&Config::default())
    }

    #[test]
    fn starts_with_a_greeting_and_empty_history() {
        let app = test_app();
        assert_eq!(app.messages.len(), 1);
        assert_eq!(app.messages[0].role, ChatRole::Assistant);
        assert_eq!(app.messages[0].content, GREETING);
        assert!(app.history.is_empty());
    }

    #[test]
    fn clear_resets_messages_but_not_history() {
        let mut app = test_app();
        app.messages.push(ChatMessage::user("hello"));
        app.history.push(HistoryRecord::new(
            "hello".to_string(),
            "prompt".to_string(),
            "answer".to_string(),
        ));

        app.clear_messages();

        assert_eq!(app.messages.len(), 1);
        assert_eq!(app.messages[0].content, GREETING);
        assert_eq!(app.history.len(), 1);
    }

    #[test]
    fn mode_toggle_switches_the_field_sequence() {
        let mut app = test_app();
        assert_eq!(app.mode, DbMode::Local);
        assert_eq!(app.sidebar_fields().len(), 4);

        app.toggle_mode();
        assert_eq!(app.mode, DbMode::Networked);
        assert_eq!(app.sidebar_fields().len(), 7);
        assert_eq!(app.current_field(), SidebarField::Mode);
    }

    #[test]
    fn sidebar_navigation_stays_in_bounds() {
        let mut app = test_app();
        for _ in 0..20 {
            app.sidebar_next();
        }
        assert_eq!(app.current_field(), SidebarField::Connect);
        for _ in 0..20 {
            app.sidebar_prev();
        }
        assert_eq!(app.current_field(), SidebarField::Mode);
    }

    #[test]
    fn submit_without_connection_sets_an_error() {
        let mut app = test_app();
        app.question_input = String::from("how many rows?");
        app.submit_question();
        assert!(app.status.contains("Connect to a database"));
        assert!(!app.agent_running);
    }

    #[tokio::test]
    async fn local_connect_without_selection_is_rejected() {
        let mut app = test_app();
        // Discovery found nothing in the default directory, so nothing
        // is selected and connect must halt.
        app.local_dbs.clear();
        app.db_list_state.select(None);
        app.connect().await;
        assert!(app.db.is_none());
        assert_eq!(app.status, "no database selected");
    }

    #[tokio::test]
    async fn networked_connect_validates_before_dialing() {
        let mut app = test_app();
        app.mode = DbMode::Networked;
        app.host_input = String::from("db@example.com");
        app.user_input = String::from("root");
        app.password_input = String::from("secret");
        app.database_input = String::from("shop");
        app.api_key_input = String::from("gsk_test");

        app.connect().await;
        assert!(app.db.is_none());
        assert!(app.status.contains("host cannot contain '@'"));
    }
}
