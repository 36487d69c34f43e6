use anyhow::Result;

mod agent;
mod app;
mod config;
mod db;
mod groq;
mod handler;
mod history;
mod tui;
mod ui;

use app::App;
use config::Config;

/// Log to a file when `DBCHAT_LOG` carries a filter (e.g. `debug` or
/// `dbchat=trace`). Writing to the terminal would fight the UI.
fn init_logging() -> Result<()> {
    let Ok(filter) = std::env::var("DBCHAT_LOG") else {
        return Ok(());
    };

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open("dbchat.log")?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let config = Config::load().unwrap_or_default();
    let mut app = App::new(&config);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();

    let result = run(&mut terminal, &mut events, &mut app).await;

    tui::restore()?;
    result
}

async fn run(
    terminal: &mut tui::Tui,
    events: &mut tui::EventHandler,
    app: &mut App,
) -> Result<()> {
    while !app.should_quit {
        // Pick up whatever the agent task streamed since the last frame.
        app.drain_agent_events();

        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event).await?,
            None => break,
        }
    }
    Ok(())
}
