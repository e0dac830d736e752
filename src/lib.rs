pub mod app;
pub mod catalog;
pub mod db;
pub mod export;
pub mod models;
pub mod playback;
pub mod session;
pub mod settings;
mod utils;

use clap::Parser;
use env_logger::Env;

const DEBUG_ENV: &str = "NONWORD_SCORER_DEBUG";

fn debug_requested() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true"))
        .unwrap_or(false)
}

pub fn run() -> anyhow::Result<()> {
    let cli = app::Cli::parse();

    // RUST_LOG wins; otherwise Info, or Debug when asked for.
    let default_level = if debug_requested() { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    log::info!("nonword-scorer starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(app::run(cli))
}
