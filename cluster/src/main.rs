//! Cluster TUI Entry Point
//!
//! Usage:
//!   cluster-tui [OPTIONS]
//!
//! Options:
//!   --url <URL>        Relay viewer WebSocket (default: ws://127.0.0.1:8000/ws)
//!   --log-file <PATH>  Write logs to a file (the terminal is busy drawing)

use std::io;
use std::io::IsTerminal;
use std::panic;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use cluster_tui::App;

/// Terminal instrument cluster for the telemetry relay
#[derive(Parser, Debug)]
#[command(name = "cluster-tui")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay viewer WebSocket URL
    #[arg(short = 'u', long, env = "CLUSTER_RELAY_URL", default_value = "ws://127.0.0.1:8000/ws")]
    url: String,

    /// Log file (logging is off without one)
    #[arg(long, env = "CLUSTER_LOG_FILE", value_name = "PATH")]
    log_file: Option<PathBuf>,
}

fn init_logging(path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create log file {}", path.display()))?;
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cluster_tui=info,relay_core=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if let Some(path) = &args.log_file {
        init_logging(path)?;
    }

    if !io::stdin().is_terminal() || !io::stdout().is_terminal() {
        eprintln!("Error: cluster-tui requires a terminal (TTY)");
        eprintln!();
        eprintln!("Use the browser dashboard served by the relay instead,");
        eprintln!("or run with: script -c 'cluster-tui' /dev/null");
        std::process::exit(1);
    }

    // Set up panic hook to restore terminal
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic_info);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut app = App::new(args.url);
    let result = app.run(&mut terminal).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}
