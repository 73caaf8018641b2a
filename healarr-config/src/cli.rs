//! `clap`-derived CLI overlay (spec §6 ambient stack): flags take precedence
//! over environment variables the same way `ferrex-init`'s CLI flags
//! shadow `.env` values before `ConfigLoader` runs.

use std::path::PathBuf;

use clap::Parser;

use crate::models::Config;

#[derive(Debug, Parser)]
#[command(name = "healarr-server", about = "Media-library corruption health service")]
pub struct CliArgs {
    #[arg(long, env = "HEALARR_HOST")]
    pub host: Option<String>,

    #[arg(long, env = "HEALARR_PORT")]
    pub port: Option<u16>,

    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "HEALARR_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[arg(long, env = "HEALARR_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, env = "HEALARR_BASE_PATH")]
    pub base_path: Option<String>,

    /// Run without performing any mutating arr-instance or filesystem calls
    /// (spec §6 "dry-run mode").
    #[arg(long, env = "HEALARR_DRY_RUN")]
    pub dry_run: bool,

    /// Print the fully resolved configuration and exit.
    #[arg(long)]
    pub dump_config: bool,
}

impl CliArgs {
    /// Applies flags on top of an already env-loaded `Config`. Only fields
    /// the user actually supplied are overridden, so running with no flags
    /// is a no-op.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(url) = &self.database_url {
            config.database.url = url.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(base_path) = &self.base_path {
            config.base_path = base_path.clone();
        }
        if self.dry_run {
            config.metadata.dry_run = true;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_overrides_only_supplied_fields() {
        let args = CliArgs {
            host: None,
            port: Some(9000),
            database_url: None,
            log_level: None,
            data_dir: None,
            base_path: None,
            dry_run: false,
            dump_config: false,
        };
        let base = Config::default();
        let original_host = base.server.host.clone();
        let merged = args.apply(base);
        assert_eq!(merged.server.port, 9000);
        assert_eq!(merged.server.host, original_host);
    }
}
