//! Bootstrap helpers for request-bot.
//!
//! Settings are read from env vars. Two dotenv files are consulted before
//! anything else runs:
//!
//!   explicit env vars > `./.env` > `~/.request-bot/.env`
//!
//! dotenvy never overwrites variables that are already set, so loading the
//! local file first gives it priority.

use std::path::PathBuf;

/// The per-user state directory: `~/.request-bot`.
pub fn bot_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".request-bot")
}

/// Path to the per-user `.env` file.
pub fn bot_env_path() -> PathBuf {
    bot_home().join(".env")
}

/// Load `./.env` and then `~/.request-bot/.env`.
pub fn load_env() {
    let _ = dotenvy::dotenv();

    let path = bot_env_path();
    if path.exists()
        && let Err(e) = dotenvy::from_path(&path)
    {
        eprintln!("Warning: failed to load {}: {e}", path.display());
    }
}
