use crate::error::CliError;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};
use udprpc::config::{RETRIES_TIMEOUT_ENV_VAR, TIMEOUT_ENV_VAR};
use udprpc::RpcConfig;

/// JSON-RPC 2.0 over UDP.
///
/// Serve a demo handler, or call methods on a remote peer.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Config {
    /// Path to a YAML file with `timeout_ms` and `retries_timeout_ms`.
    #[arg(long = "config-file", short = 'c')]
    pub config_file: Option<PathBuf>,
    /// How long each call attempt waits for a response, in milliseconds. The default is 40.
    #[arg(long = "timeout-ms", env = TIMEOUT_ENV_VAR)]
    pub timeout_ms: Option<u64>,
    /// How long a call may take across all of its attempts, in milliseconds. The default is 150.
    #[arg(long = "retries-timeout-ms", env = RETRIES_TIMEOUT_ENV_VAR)]
    pub retries_timeout_ms: Option<u64>,
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Answer requests with the demo handler until interrupted.
    #[command(name = "serve", alias = "start")]
    Serve(ServeCommand),
    /// Call a method on a remote peer and print the result.
    #[command(name = "call")]
    Call(CallCommand),
    /// Send a notification to a remote peer. No response is expected.
    #[command(name = "notify")]
    Notify(CallCommand),
}

#[derive(Debug, Args)]
pub struct ServeCommand {
    /// The local port to listen on.
    #[arg(long = "port", short = 'p', default_value_t = 3000)]
    pub port: u16,
}

#[derive(Debug, Args)]
pub struct CallCommand {
    /// The local port to send from. The default, 0, picks any free port.
    #[arg(long = "port", short = 'p', default_value_t = 0)]
    pub port: u16,
    /// The peer to call, e.g. `127.0.0.1:3000`.
    pub destination: SocketAddrV4,
    /// The method to call.
    pub method: String,
    /// Positional parameters. Each is parsed as JSON if possible and sent as a string otherwise.
    #[arg(allow_hyphen_values = true)]
    pub params: Vec<String>,
}

impl CallCommand {
    pub fn json_params(&self) -> Vec<Value> {
        self.params.iter().map(|p| parse_param(p)).collect()
    }
}

pub struct GlobalOptions {
    pub config_file: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
    pub retries_timeout_ms: Option<u64>,
}

impl Config {
    pub fn to_parts(self) -> (GlobalOptions, CliCommand) {
        let global = GlobalOptions {
            config_file: self.config_file,
            timeout_ms: self.timeout_ms,
            retries_timeout_ms: self.retries_timeout_ms,
        };
        (global, self.command)
    }
}

impl GlobalOptions {
    /// Defaults, overridden by the config file (if any), overridden by flags and environment variables.
    pub fn rpc_config(&self) -> Result<RpcConfig, CliError> {
        let mut config = match &self.config_file {
            Some(path) => load_rpc_config(path)?,
            None => RpcConfig::default(),
        };
        if let Some(ms) = self.timeout_ms {
            config.timeout_ms = ms;
        }
        if let Some(ms) = self.retries_timeout_ms {
            config.retries_timeout_ms = ms;
        }
        Ok(config)
    }
}

pub fn load_rpc_config<P: AsRef<Path>>(path: P) -> Result<RpcConfig, CliError> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let config = serde_yml::from_reader(reader)?;
    Ok(config)
}

pub fn parse_param(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn params_are_json_or_strings() {
        assert_eq!(parse_param("42"), json!(42));
        assert_eq!(parse_param("-1.5"), json!(-1.5));
        assert_eq!(parse_param(r#"{"key1":"value1"}"#), json!({"key1": "value1"}));
        assert_eq!(parse_param(r#""quoted""#), json!("quoted"));
        assert_eq!(parse_param("hello world"), json!("hello world"));
    }

    #[test]
    fn parses_a_call() {
        let args = ["udprpc", "call", "-p", "3001", "127.0.0.1:3000", "sum", "1", "-2"];
        let config = Config::try_parse_from(args).unwrap();
        match config.command {
            CliCommand::Call(cmd) => {
                assert_eq!(cmd.port, 3001);
                assert_eq!(cmd.destination, "127.0.0.1:3000".parse().unwrap());
                assert_eq!(cmd.method, "sum");
                assert_eq!(cmd.json_params(), vec![json!(1), json!(-2)]);
            }
            other => panic!("Expected a call command, got {other:?}"),
        }
    }

    #[test]
    fn rejects_ipv6_destinations() {
        assert!(Config::try_parse_from(["udprpc", "call", "[::1]:3000", "echo"]).is_err());
    }

    #[test]
    fn flags_override_the_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timeout_ms: 100\nretries_timeout_ms: 1000").unwrap();
        let global = GlobalOptions {
            config_file: Some(file.path().to_path_buf()),
            timeout_ms: None,
            retries_timeout_ms: Some(500),
        };
        let config = global.rpc_config().unwrap();
        assert_eq!(config, RpcConfig { timeout_ms: 100, retries_timeout_ms: 500 });
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let global = GlobalOptions {
            config_file: Some(PathBuf::from("./does/not/exist.yml")),
            timeout_ms: None,
            retries_timeout_ms: None,
        };
        assert!(matches!(global.rpc_config(), Err(CliError::IoError(_))));
    }
}
