//! Command-line arguments

use crate::tracing_support::{TracingConfig, TracingFormat};
use clap::Parser;
use std::path::{Path, PathBuf};

/// File name looked up in the working directory and the user config dir
pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Parser)]
#[command(name = "herald", version, about = "Chat-commanded agent with pluggable extensions")]
pub struct Cli {
    /// Path to the root config file
    #[arg(short, long, env = "HERALD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = TracingFormat::Pretty, env = "HERALD_LOG_FORMAT")]
    pub log_format: TracingFormat,

    /// Log level; overrides RUST_LOG
    #[arg(long)]
    pub log_level: Option<tracing::Level>,
}

impl Cli {
    pub fn tracing_config(&self) -> TracingConfig {
        TracingConfig {
            level: self.log_level,
            format: self.log_format,
            ..TracingConfig::default()
        }
    }

    pub fn config_path(&self) -> PathBuf {
        resolve_config_path(
            self.config.as_deref(),
            Path::new("."),
            dirs::config_dir().as_deref(),
        )
    }
}

/// Pick the config file: the explicit path, else `<cwd>/config.json`, else
/// `<config_dir>/herald/config.json`.
///
/// When nothing exists the working-directory path is returned so the load
/// error names it.
pub fn resolve_config_path(
    explicit: Option<&Path>,
    cwd: &Path,
    config_dir: Option<&Path>,
) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = cwd.join(CONFIG_FILE);
    if local.is_file() {
        return local;
    }
    if let Some(user) = config_dir.map(|dir| dir.join("herald").join(CONFIG_FILE)) {
        if user.is_file() {
            return user;
        }
    }
    local
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_args() {
        let cli = Cli::try_parse_from([
            "herald",
            "--config",
            "/etc/herald.json",
            "--log-format",
            "json",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/herald.json")));
        let logging = cli.tracing_config();
        assert_eq!(logging.format, TracingFormat::Json);
        assert_eq!(logging.level, Some(tracing::Level::DEBUG));
    }

    #[test]
    fn test_config_lookup_order() {
        let cwd = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        let user = home.path().join("herald").join(CONFIG_FILE);

        // Nothing exists: fall back to the local path
        assert_eq!(
            resolve_config_path(None, cwd.path(), Some(home.path())),
            cwd.path().join(CONFIG_FILE)
        );

        fs::create_dir_all(user.parent().unwrap()).unwrap();
        fs::write(&user, "{}").unwrap();
        assert_eq!(resolve_config_path(None, cwd.path(), Some(home.path())), user);

        fs::write(cwd.path().join(CONFIG_FILE), "{}").unwrap();
        assert_eq!(
            resolve_config_path(None, cwd.path(), Some(home.path())),
            cwd.path().join(CONFIG_FILE)
        );

        let explicit = Path::new("/nowhere/agent.json");
        assert_eq!(
            resolve_config_path(Some(explicit), cwd.path(), Some(home.path())),
            explicit
        );
    }
}
