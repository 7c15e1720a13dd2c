//! Mailbox relay configuration.
//!
//! Settings are layered: the built-in defaults, then `Mailbox` / `.mailbox` files in TOML,
//! JSON or YAML format from the configuration directory, then any explicitly given file,
//! then `MSPM0_RELAY_` environment variables. Command line arguments ([`RelayArgs`]) are
//! applied last, on the extracted [`RelayConfig`].

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use figment::providers::{Env, Format, Json, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Prefix of environment variables overriding relay settings. Nested keys are separated
/// by a double underscore, e.g. `MSPM0_RELAY_SINK__KIND=file`.
pub const ENV_PREFIX: &str = "MSPM0_RELAY_";

/// An error while loading the configuration.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum ConfigError {
    /// File format of '{0}' not recognized from extension (supported: .toml, .json, .yaml / .yml)
    UnknownFormat(String),
    /// Failed to parse supplied configuration: {0}
    Invalid(String),
    /// Invalid TCP target '{0}', expected HOST:PORT
    InvalidTcpTarget(String),
    /// The '{0}' sink needs a '{1}' setting
    IncompleteSink(&'static str, &'static str),
}

/// All settings of a mailbox relay session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Where reassembled frames are sent.
    pub sink: SinkConfig,
    /// Optional file receiving a raw copy of every received byte.
    pub dump: Option<PathBuf>,
    /// Interval of reconnect attempts and of the idle indicator, in ms.
    #[serde(with = "duration_ms")]
    pub heartbeat: Duration,
    /// Delay between mailbox polls, in ms.
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    /// How long a TCP connect may wait for the connection, in ms.
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Size of the frame reassembly buffer.
    pub buffer_capacity: usize,
    /// Headroom kept free in the reassembly buffer.
    pub buffer_reserve: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            sink: SinkConfig::File { path: None },
            dump: None,
            heartbeat: Duration::from_millis(500),
            poll_interval: Duration::from_millis(10),
            connect_timeout: Duration::from_millis(1000),
            buffer_capacity: 256,
            buffer_reserve: 4,
        }
    }
}

impl RelayConfig {
    /// How many bytes may be buffered before a partial frame is flushed.
    pub fn buffer_limit(&self) -> usize {
        self.buffer_capacity.saturating_sub(self.buffer_reserve).max(4)
    }
}

/// The output of the relay.
///
/// In configuration sources the sink is a flat table, see [`SinkSettings`]. Keys that do not
/// belong to the selected `kind` are ignored, so a layer can switch the kind without
/// clearing the keys of a lower layer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "SinkSettings", into = "SinkSettings")]
pub enum SinkConfig {
    /// Write to a file, or to stdout if no path is given.
    File {
        /// The file to create.
        path: Option<PathBuf>,
    },
    /// Connect to a TCP server.
    Tcp {
        /// IP address of the server.
        host: String,
        /// Port of the server.
        port: u16,
    },
}

/// Kind of a [`SinkConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// [`SinkConfig::File`]
    File,
    /// [`SinkConfig::Tcp`]
    Tcp,
}

/// The `[sink]` table as it appears in configuration sources.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SinkSettings {
    /// Which sink to use.
    pub kind: SinkKind,
    /// Output file of a `file` sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Server address of a `tcp` sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Server port of a `tcp` sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl TryFrom<SinkSettings> for SinkConfig {
    type Error = ConfigError;

    fn try_from(settings: SinkSettings) -> Result<Self, Self::Error> {
        match settings.kind {
            SinkKind::File => Ok(SinkConfig::File {
                path: settings.path,
            }),
            SinkKind::Tcp => Ok(SinkConfig::Tcp {
                host: settings
                    .host
                    .ok_or(ConfigError::IncompleteSink("tcp", "host"))?,
                port: settings
                    .port
                    .ok_or(ConfigError::IncompleteSink("tcp", "port"))?,
            }),
        }
    }
}

impl From<SinkConfig> for SinkSettings {
    fn from(sink: SinkConfig) -> Self {
        match sink {
            SinkConfig::File { path } => SinkSettings {
                kind: SinkKind::File,
                path,
                host: None,
                port: None,
            },
            SinkConfig::Tcp { host, port } => SinkSettings {
                kind: SinkKind::Tcp,
                path: None,
                host: Some(host),
                port: Some(port),
            },
        }
    }
}

/// A `HOST:PORT` pair given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpTarget {
    /// Host part, without brackets for IPv6 addresses.
    pub host: String,
    /// Port part.
    pub port: u16,
}

impl FromStr for TcpTarget {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidTcpTarget(s.to_string());

        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|host| host.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse().map_err(|_| invalid())?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Command line options of the relay.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct RelayArgs {
    /// Send the mailbox stream to a TCP server.
    #[clap(long, value_name = "HOST:PORT", conflicts_with = "output")]
    pub tcp: Option<TcpTarget>,

    /// Write the mailbox stream to a file instead of stdout.
    #[clap(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Write a raw copy of all received bytes to a file.
    #[clap(long, value_name = "PATH")]
    pub dump: Option<PathBuf>,

    /// Load relay settings from this file (.toml, .json, .yaml / .yml).
    #[clap(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl RelayArgs {
    /// Override the settings of `config` that were given on the command line.
    pub fn apply(&self, config: &mut RelayConfig) {
        if let Some(tcp) = &self.tcp {
            config.sink = SinkConfig::Tcp {
                host: tcp.host.clone(),
                port: tcp.port,
            };
        } else if let Some(output) = &self.output {
            config.sink = SinkConfig::File {
                path: Some(output.clone()),
            };
        }
        if let Some(dump) = &self.dump {
            config.dump = Some(dump.clone());
        }
    }

    /// Load the configuration from `conf_dir` and apply these arguments to it.
    pub fn load(&self, conf_dir: impl AsRef<Path>) -> Result<RelayConfig, ConfigError> {
        let mut configs = RelayConfigs::new(conf_dir);
        if let Some(file) = &self.config {
            configs.merge(file.clone())?;
        }
        let mut config = configs.extract()?;
        self.apply(&mut config);
        Ok(config)
    }
}

/// The layered configuration sources.
#[derive(Debug, Clone)]
pub struct RelayConfigs {
    figment: Figment,
}

impl RelayConfigs {
    /// Collect the default configuration and the configuration files in `conf_dir`.
    pub fn new(conf_dir: impl AsRef<Path>) -> Self {
        let conf_dir = conf_dir.as_ref();
        let mut figment = Figment::new().merge(Toml::string(include_str!("default.toml")));

        // Project files first, local overrides last.
        for file in [".mailbox", "Mailbox", ".mailbox.local", "Mailbox.local"] {
            figment = figment
                .merge(Toml::file(conf_dir.join(format!("{file}.toml"))))
                .merge(Json::file(conf_dir.join(format!("{file}.json"))))
                .merge(Yaml::file(conf_dir.join(format!("{file}.yaml"))))
                .merge(Yaml::file(conf_dir.join(format!("{file}.yml"))));
        }

        Self { figment }
    }

    /// Merge an additional configuration file. The format is chosen by its extension.
    pub fn merge(&mut self, conf_file: PathBuf) -> Result<(), ConfigError> {
        let figment = self.figment.clone();
        self.figment = match conf_file.extension().and_then(|e| e.to_str()) {
            Some("toml") => figment.merge(Toml::file(conf_file)),
            Some("json") => figment.merge(Json::file(conf_file)),
            Some("yml" | "yaml") => figment.merge(Yaml::file(conf_file)),
            _ => {
                return Err(ConfigError::UnknownFormat(
                    conf_file.display().to_string(),
                ))
            }
        };
        Ok(())
    }

    /// Merge settings given as a TOML string.
    pub fn merge_toml(&mut self, toml: &str) {
        self.figment = self.figment.clone().merge(Toml::string(toml));
    }

    /// Extract the final configuration, with environment overrides applied.
    pub fn extract(&self) -> Result<RelayConfig, ConfigError> {
        self.figment
            .clone()
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|error: figment::Error| {
                ConfigError::Invalid(
                    error
                        .into_iter()
                        .map(|e| e.to_string())
                        .collect::<Vec<String>>()
                        .join("\n"),
                )
            })
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;
    use std::time::Duration;

    use clap::Parser;
    use figment::providers::Format;
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::{
        ConfigError, RelayArgs, RelayConfig, RelayConfigs, SinkConfig, SinkKind, SinkSettings,
        TcpTarget,
    };
    use crate::flashing::FlashConfig;

    const TCP_PROJECT: &str = "[sink]\nkind = \"tcp\"\nhost = \"127.0.0.1\"\nport = 4000\n";

    #[derive(Debug, Parser)]
    struct Cli {
        #[clap(flatten)]
        relay: RelayArgs,
    }

    // Every test reading the environment runs in a jail, which serializes them.

    #[test]
    fn default_file_matches_default_impl() {
        Jail::expect_with(|jail| {
            let config = RelayConfigs::new(jail.directory()).extract().unwrap();

            assert_eq!(config, RelayConfig::default());
            assert_eq!(config.buffer_limit(), 252);
            Ok(())
        });
    }

    #[test]
    fn project_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("Mailbox.toml", &format!("heartbeat = 250\n{TCP_PROJECT}"))?;

            let config = RelayConfigs::new(jail.directory()).extract().unwrap();

            assert_eq!(config.heartbeat, Duration::from_millis(250));
            assert_eq!(
                config.sink,
                SinkConfig::Tcp {
                    host: "127.0.0.1".to_string(),
                    port: 4000
                }
            );
            assert_eq!(config.poll_interval, Duration::from_millis(10));
            Ok(())
        });
    }

    #[test]
    fn local_yaml_overrides_project_toml() {
        Jail::expect_with(|jail| {
            jail.create_file("Mailbox.toml", "poll_interval = 20\n")?;
            jail.create_file(".mailbox.local.yaml", "poll_interval: 5\n")?;

            let config = RelayConfigs::new(jail.directory()).extract().unwrap();

            assert_eq!(config.poll_interval, Duration::from_millis(5));
            Ok(())
        });
    }

    #[test]
    fn unknown_config_items_fail() {
        Jail::expect_with(|jail| {
            let mut configs = RelayConfigs::new(jail.directory());
            configs.merge_toml("bogus_invalid_item = \"oops\"");

            let error = configs.extract().unwrap_err();

            assert!(matches!(error, ConfigError::Invalid(_)));
            Ok(())
        });
    }

    #[test]
    fn environment_switches_the_sink_kind() {
        Jail::expect_with(|jail| {
            jail.create_file("Mailbox.toml", TCP_PROJECT)?;
            jail.set_env("MSPM0_RELAY_SINK__KIND", "file");

            let config = RelayConfigs::new(jail.directory()).extract().unwrap();

            assert_eq!(config.sink, SinkConfig::File { path: None });
            Ok(())
        });
    }

    #[test]
    fn environment_selects_a_tcp_sink() {
        Jail::expect_with(|jail| {
            jail.set_env("MSPM0_RELAY_SINK__KIND", "tcp");
            jail.set_env("MSPM0_RELAY_SINK__HOST", "10.0.0.2");
            jail.set_env("MSPM0_RELAY_SINK__PORT", "5000");
            jail.set_env("MSPM0_RELAY_HEARTBEAT", "250");

            let config = RelayConfigs::new(jail.directory()).extract().unwrap();

            assert_eq!(
                config.sink,
                SinkConfig::Tcp {
                    host: "10.0.0.2".to_string(),
                    port: 5000
                }
            );
            assert_eq!(config.heartbeat, Duration::from_millis(250));
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_files() {
        Jail::expect_with(|jail| {
            jail.create_file("Mailbox.toml", "poll_interval = 20\n")?;
            jail.set_env("MSPM0_RELAY_POLL_INTERVAL", "3");

            let config = RelayConfigs::new(jail.directory()).extract().unwrap();

            assert_eq!(config.poll_interval, Duration::from_millis(3));
            Ok(())
        });
    }

    #[test]
    fn tcp_sink_without_port_fails() {
        Jail::expect_with(|jail| {
            let mut configs = RelayConfigs::new(jail.directory());
            configs.merge_toml("[sink]\nkind = \"tcp\"\nhost = \"127.0.0.1\"");

            let error = configs.extract().unwrap_err();

            assert!(matches!(error, ConfigError::Invalid(message) if message.contains("port")));
            Ok(())
        });
    }

    #[test]
    fn file_kind_ignores_tcp_keys() {
        Jail::expect_with(|jail| {
            let mut configs = RelayConfigs::new(jail.directory());
            configs.merge_toml(TCP_PROJECT);
            configs.merge_toml("[sink]\nkind = \"file\"\npath = \"trace.txt\"");

            let config = configs.extract().unwrap();

            assert_eq!(
                config.sink,
                SinkConfig::File {
                    path: Some(PathBuf::from("trace.txt"))
                }
            );
            Ok(())
        });
    }

    #[test]
    fn sink_settings_are_flat() {
        let sink = SinkConfig::Tcp {
            host: "::1".to_string(),
            port: 22,
        };

        let settings = SinkSettings::from(sink.clone());

        assert_eq!(settings.kind, SinkKind::Tcp);
        assert_eq!(settings.path, None);
        assert_eq!(SinkConfig::try_from(settings).unwrap(), sink);
    }

    #[test]
    fn file_name_patterns() {
        // Existence of files is not tested here.
        let dir = tempfile::tempdir().unwrap();
        RelayConfigs::new(dir.path())
            .merge("nonexistent-file.yml".into())
            .unwrap();
        RelayConfigs::new(dir.path())
            .merge("nonexistent-file.unknown".into())
            .unwrap_err();
    }

    #[test_case("127.0.0.1:4000", "127.0.0.1", 4000; "ipv4")]
    #[test_case("[::1]:22", "::1", 22; "ipv6")]
    #[test_case("localhost:1", "localhost", 1; "name")]
    fn tcp_target_parsing(input: &str, host: &str, port: u16) {
        assert_eq!(
            input.parse::<TcpTarget>().unwrap(),
            TcpTarget {
                host: host.to_string(),
                port
            }
        );
    }

    #[test_case("127.0.0.1"; "no port")]
    #[test_case(":4000"; "no host")]
    #[test_case("host:70000"; "port out of range")]
    fn tcp_target_rejects(input: &str) {
        assert!(input.parse::<TcpTarget>().is_err());
    }

    #[test]
    fn arguments_override_the_configuration() {
        let cli = Cli::parse_from(["relay", "--tcp", "10.0.0.1:5000", "--dump", "raw.bin"]);
        let mut config = RelayConfig::default();

        cli.relay.apply(&mut config);

        assert_eq!(
            config.sink,
            SinkConfig::Tcp {
                host: "10.0.0.1".to_string(),
                port: 5000
            }
        );
        assert_eq!(config.dump, Some(PathBuf::from("raw.bin")));
    }

    #[test]
    fn output_selects_a_file_sink() {
        Jail::expect_with(|jail| {
            let cli = Cli::parse_from(["relay", "-o", "trace.txt"]);

            let config = cli.relay.load(jail.directory()).unwrap();

            assert_eq!(
                config.sink,
                SinkConfig::File {
                    path: Some(PathBuf::from("trace.txt"))
                }
            );
            Ok(())
        });
    }

    #[test]
    fn tcp_and_output_conflict() {
        assert!(Cli::try_parse_from(["relay", "--tcp", "1.2.3.4:5", "--output", "x"]).is_err());
    }

    #[test]
    fn flash_config_uses_milliseconds() {
        let config: FlashConfig = figment::Figment::new()
            .merge(figment::providers::Toml::string("command_timeout = 50"))
            .extract()
            .unwrap();

        assert_eq!(config.command_timeout, Duration::from_millis(50));
        assert!(config.stub_enabled);
    }
}
