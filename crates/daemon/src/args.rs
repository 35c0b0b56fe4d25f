// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use clap::builder::ValueHint;
use clap_derive::Parser;
use eyre::eyre;
use figment::Figment;
use figment::providers::{Format as ProviderFormat, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use vgdb_daemon::{ProviderConfig, ServerConfig};

/// Everything the daemon can be configured with from a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub provider: ProviderConfig,
    pub server: ServerConfig,
}

#[derive(Parser, Debug, Serialize, Deserialize)]
pub struct Args {
    #[arg(
        value_name = "catalog",
        help = "Dataset catalog (JSON) to serve",
        value_hint = ValueHint::FilePath
    )]
    pub catalog: PathBuf,

    #[arg(
        long,
        value_name = "config",
        help = "Path to configuration (YAML) file to use, if any. If not specified, defaults are used.\
                Configuration file values can be overridden by command line arguments.",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[arg(
        long,
        value_name = "listen",
        help = "Address the data server listens on",
        default_value = "127.0.0.1:7878"
    )]
    pub listen: String,

    #[arg(
        long,
        value_name = "batch-size",
        help = "Rows per batch when the client does not ask for a size"
    )]
    pub batch_size: Option<u32>,

    #[arg(
        long,
        value_name = "max-connections",
        help = "Maximum number of concurrent client connections, each served by its own thread"
    )]
    pub max_connections: Option<usize>,

    #[arg(
        long,
        value_name = "read-timeout-seconds",
        help = "Seconds to wait for the rest of a partially received request, and for writes"
    )]
    pub read_timeout_seconds: Option<u64>,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    pub debug: bool,
}

impl Args {
    fn merge_config(&self, mut config: DaemonConfig) -> DaemonConfig {
        if let Some(batch_size) = self.batch_size {
            config.provider.batch_size = batch_size;
        }
        if let Some(max_connections) = self.max_connections {
            config.server.max_connections = max_connections;
        }
        if let Some(seconds) = self.read_timeout_seconds {
            config.server.read_timeout = Duration::from_secs(seconds);
        }
        config
    }

    /// Load the configuration file if we have it, and then merge the arguments into it.
    pub fn load_config(&self) -> Result<DaemonConfig, eyre::Report> {
        let config = match &self.config_file {
            Some(config_path) => Figment::new()
                .merge(Serialized::defaults(DaemonConfig::default()))
                .merge(Yaml::file(config_path))
                .extract::<DaemonConfig>()
                .map_err(|e| {
                    eyre!(
                        "Failed to parse configuration from {:?}: {}",
                        config_path,
                        e
                    )
                })?,
            None => DaemonConfig::default(),
        };
        Ok(self.merge_config(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_arguments_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "provider:\n  batch_size: 250\nserver:\n  max_connections: 4"
        )
        .unwrap();
        let args = Args::parse_from([
            "vgdb-daemon",
            "catalog.json",
            "--config-file",
            file.path().to_str().unwrap(),
            "--max-connections",
            "16",
        ]);
        let config = args.load_config().unwrap();
        assert_eq!(config.provider.batch_size, 250);
        assert_eq!(config.server.max_connections, 16);
        assert_eq!(config.server.read_timeout, ServerConfig::default().read_timeout);
    }

    #[test]
    fn test_defaults_without_config_file() {
        let args = Args::parse_from(["vgdb-daemon", "catalog.json"]);
        assert_eq!(args.listen, "127.0.0.1:7878");
        assert_eq!(args.load_config().unwrap(), DaemonConfig::default());
    }
}
