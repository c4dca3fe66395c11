//! panemux - session host entry point.
//!
//! Runs shells on behalf of a controller that speaks the panemux protocol.
//!
//! Usage: panemux [OPTIONS]
//!
//! Options:
//!   --version, -v      Show version
//!   --stdio            Serve one controller on stdin/stdout
//!   --socket <PATH>    Serve controllers on a Unix socket
//!   --config <PATH>    Read configuration from PATH instead of ~/.panemuxrc
//!
//! Without `--stdio`, controllers are served on the configured socket.

use std::env;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info, warn};

use panemux::config::Config;
use panemux::protocol::Host;
use panemux::{VERSION, logging};

/// Parsed command line.
#[derive(Debug, Default)]
struct Args {
    version: bool,
    stdio: bool,
    socket: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut args = args.skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-v" => parsed.version = true,
            "--stdio" => parsed.stdio = true,
            "--socket" => {
                let path = args.next().ok_or("--socket needs a path")?;
                parsed.socket = Some(PathBuf::from(path));
            }
            "--config" => {
                let path = args.next().ok_or("--config needs a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(parsed)
}

fn main() -> ExitCode {
    let args = match parse_args(env::args()) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("panemux: {e}");
            eprintln!("usage: panemux [--version] [--stdio] [--socket PATH] [--config PATH]");
            return ExitCode::from(2);
        }
    };

    if args.version {
        println!("panemux v{}", VERSION);
        return ExitCode::SUCCESS;
    }

    let config_result = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let (config, config_error) = match config_result {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    init_logging(&config);
    if let Some(e) = config_error {
        warn!("Failed to load config, using defaults: {}", e);
    }
    info!("panemux v{} starting", VERSION);

    let result = if args.stdio {
        serve_stdio(&config)
    } else {
        let path = args
            .socket
            .or_else(|| config.socket_path.clone())
            .unwrap_or_else(panemux::protocol::default_socket_path);
        serve_socket(&config, path)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Host stopped: {}", e);
            eprintln!("panemux: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Logs to a file when enabled, otherwise to stderr.
fn init_logging(config: &Config) {
    match logging::init(&config.log_config) {
        Ok(Some(_)) => {}
        Ok(None) => {
            let _ = logging::init_stderr(&config.log_config.level);
        }
        Err(e) => {
            eprintln!("panemux: file logging unavailable ({e}), logging to stderr");
            let _ = logging::init_stderr(&config.log_config.level);
        }
    }
}

fn serve_stdio(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let host = Host::new(config.shell.clone());
    host.serve(BufReader::new(io::stdin()), io::stdout())?;
    Ok(())
}

#[cfg(unix)]
fn serve_socket(config: &Config, path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    use panemux::protocol::HostListener;
    use std::thread;

    let listener = HostListener::bind(&path)?;
    loop {
        let stream = match listener.accept() {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Accept failed: {}", e);
                continue;
            }
        };
        let reader = match stream.try_clone() {
            Ok(reader) => reader,
            Err(e) => {
                warn!("Could not split controller stream: {}", e);
                continue;
            }
        };
        let host = Host::new(config.shell.clone());
        let spawned = thread::Builder::new()
            .name("panemux-host".to_string())
            .spawn(move || {
                if let Err(e) = host.serve(BufReader::new(reader), stream) {
                    error!("Controller session failed: {}", e);
                }
            });
        if let Err(e) = spawned {
            error!("Failed to start controller thread: {}", e);
        }
    }
}

#[cfg(not(unix))]
fn serve_socket(_config: &Config, _path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    Err("socket mode needs Unix domain sockets; use --stdio".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        std::iter::once("panemux".to_string()).chain(list.iter().map(|s| (*s).to_string()))
    }

    #[test]
    fn test_parse_flags() {
        let parsed = parse_args(args(&["--stdio", "--config", "/tmp/rc"])).unwrap();
        assert!(parsed.stdio);
        assert_eq!(parsed.config, Some(PathBuf::from("/tmp/rc")));
        assert!(parsed.socket.is_none());
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(args(&["--socket"])).is_err());
        assert!(parse_args(args(&["--bogus"])).is_err());
    }
}
