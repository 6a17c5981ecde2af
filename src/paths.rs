//! Where the CLI finds its config file and durable store.
//!
//! Explicit flags win, then `data_dir` from the config file, then the XDG
//! base directories (`$XDG_CONFIG_HOME/medgate`, `$XDG_DATA_HOME/medgate`).

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

const APP_DIR: &str = "medgate";
const CONFIG_FILE: &str = "config.toml";

/// Errors from locating or creating medgate's directories.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(medgate::paths::no_home),
        help("Set HOME, or pass --data-dir and --config explicitly.")
    )]
    NoHome,

    #[error("failed to create data directory: {path}")]
    #[diagnostic(
        code(medgate::paths::create_dir),
        help("Check permissions, or pass --data-dir pointing at a writable directory.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// The config file to load, if any.
///
/// An explicit path is returned as is, so a missing file surfaces as a read
/// error. The XDG default is only used when it exists.
pub fn config_file(explicit: Option<&Path>) -> PathResult<Option<PathBuf>> {
    if let Some(path) = explicit {
        return Ok(Some(path.to_path_buf()));
    }
    let default = xdg_base(&env_var, "XDG_CONFIG_HOME", ".config")?
        .join(APP_DIR)
        .join(CONFIG_FILE);
    Ok(default.exists().then_some(default))
}

/// The durable store directory, created if missing.
pub fn data_dir(flag: Option<&Path>, configured: Option<&Path>) -> PathResult<PathBuf> {
    let dir = match flag.or(configured) {
        Some(dir) => dir.to_path_buf(),
        None => xdg_base(&env_var, "XDG_DATA_HOME", ".local/share")?.join(APP_DIR),
    };
    std::fs::create_dir_all(&dir).map_err(|source| PathError::CreateDir {
        path: dir.display().to_string(),
        source,
    })?;
    Ok(dir)
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// `$var`, or `$HOME/<fallback>` when it is unset or empty.
fn xdg_base(lookup: &dyn Fn(&str) -> Option<String>, var: &str, fallback: &str) -> PathResult<PathBuf> {
    if let Some(dir) = lookup(var).filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    lookup("HOME")
        .filter(|h| !h.is_empty())
        .map(|home| PathBuf::from(home).join(fallback))
        .ok_or(PathError::NoHome)
}
