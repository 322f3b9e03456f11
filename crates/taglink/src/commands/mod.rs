//! Command handlers.

mod check;
mod watch;

use std::path::{Path, PathBuf};

use taglink_config::Config;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

pub async fn dispatch(command: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match command {
        Command::Check(args) => check::handle(&args, global),
        Command::Watch(args) => watch::handle(&args, global).await,
    }
}

/// Load the configuration named on the command line, or the default one.
fn load(path: Option<&Path>) -> Result<(PathBuf, Config), CliError> {
    let path = path.map_or_else(taglink_config::config_path, Path::to_path_buf);
    let config = taglink_config::load_config(&path)?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok((path, config))
}
