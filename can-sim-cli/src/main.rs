//! CAN Simulator CLI Application
//!
//! Command-line front end for the can-sim-core library. It adds:
//! - Configuration loading (JSON or TOML)
//! - Script engines (declarative rules, native plugins)
//! - SocketCAN bootstrap and process exit codes

use clap::Parser;
use can_sim_core::{ScriptError, SimError, Simulator, SocketCan};
use std::path::PathBuf;
use std::process::ExitCode;

mod config;
mod script;

/// CAN Simulator - Simulate CAN nodes on a SocketCAN interface
#[derive(Parser, Debug)]
#[command(name = "can-sim")]
#[command(about = "Simulate scripted CAN nodes on a SocketCAN interface", long_about = None)]
#[command(version)]
struct Args {
    /// Simulation configuration (JSON or TOML)
    #[arg(value_name = "CONFIG", default_value = config::DEFAULT_CONFIG)]
    config: PathBuf,

    /// CAN interface to use instead of the configured one
    #[arg(short, long, value_name = "IFACE")]
    interface: Option<String>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ReturnCode {
    Ok = 0,
    Config = 1,
    ScriptLoad = 2,
    ScriptInit = 3,
    NodeInit = 4,
    Socket = 5,
    Bind = 6,
    SocketRead = 7,
}

impl From<ReturnCode> for ExitCode {
    fn from(code: ReturnCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Startup or runtime failure
#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("{0:#}")]
    Config(anyhow::Error),

    #[error("node {name}: {reason:#}")]
    NodeInit { name: String, reason: anyhow::Error },

    #[error("node {name}: {source}")]
    Node { name: String, source: SimError },

    #[error(transparent)]
    Sim(#[from] SimError),
}

impl AppError {
    fn code(&self) -> ReturnCode {
        match self {
            AppError::Config(_) => ReturnCode::Config,
            AppError::NodeInit { .. } => ReturnCode::NodeInit,
            AppError::Node { source, .. } | AppError::Sim(source) => match source {
                SimError::Script(ScriptError::Load(_)) => ReturnCode::ScriptLoad,
                SimError::Script(ScriptError::Init(_)) => ReturnCode::ScriptInit,
                SimError::Script(_) => ReturnCode::NodeInit,
                SimError::Socket(_) => ReturnCode::Socket,
                SimError::Bind { .. } => ReturnCode::Bind,
                SimError::SocketRead(_) | SimError::InvalidFrame(_) => ReturnCode::SocketRead,
            },
        }
    }
}

fn main() -> ExitCode {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("CAN Simulator v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using simulator library v{}", can_sim_core::VERSION);

    match run(&args) {
        Ok(()) => ReturnCode::Ok.into(),
        Err(err) => {
            log::error!("{}", err);
            err.code().into()
        }
    }
}

/// Load the configuration, open the bus, load every node and simulate
fn run(args: &Args) -> Result<(), AppError> {
    log::info!("Loading configuration from: {:?}", args.config);
    let mut config = config::load_config(&args.config).map_err(AppError::Config)?;
    if let Some(interface) = &args.interface {
        config.canif.name = interface.clone();
    }

    let socket = SocketCan::open(&config.canif.name, &config.canif.socket_options())?;
    log::info!(
        "Interface {}: timestamps {:?}, CAN FD {}",
        socket.interface(),
        socket.timestamp_mode(),
        if socket.fd_frames() { "on" } else { "off" }
    );

    let mut sim = Simulator::new(socket).with_poll_timeout(config.canif.poll_timeout());
    for node in &config.nodes {
        let engine = script::create_engine(&node.path).map_err(|reason| AppError::NodeInit {
            name: node.name.clone(),
            reason,
        })?;
        sim.load_node(&node.name, node.enabled, engine, &node.path)
            .map_err(|source| AppError::Node {
                name: node.name.clone(),
                source,
            })?;
    }

    let result = sim.run();
    sim.shutdown();
    result?;
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["can-sim"]);
        assert_eq!(args.config, PathBuf::from("default.json"));
        assert!(args.interface.is_none());

        let args = Args::parse_from(["can-sim", "sim.toml", "-i", "vcan1", "-vv"]);
        assert_eq!(args.config, PathBuf::from("sim.toml"));
        assert_eq!(args.interface.as_deref(), Some("vcan1"));
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_error_codes() {
        let node = |source| AppError::Node {
            name: "A".to_string(),
            source,
        };
        assert_eq!(
            AppError::Config(anyhow::anyhow!("bad")).code(),
            ReturnCode::Config
        );
        assert_eq!(
            node(SimError::Script(ScriptError::Load("x".into()))).code(),
            ReturnCode::ScriptLoad
        );
        assert_eq!(
            node(SimError::Script(ScriptError::Init("x".into()))).code(),
            ReturnCode::ScriptInit
        );
        assert_eq!(
            AppError::NodeInit {
                name: "A".to_string(),
                reason: anyhow::anyhow!("no engine"),
            }
            .code(),
            ReturnCode::NodeInit
        );
        assert_eq!(
            AppError::Sim(SimError::Socket(io::Error::from(io::ErrorKind::Other))).code(),
            ReturnCode::Socket
        );
        assert_eq!(
            AppError::Sim(SimError::Bind {
                interface: "vcan9".to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
            })
            .code(),
            ReturnCode::Bind
        );
        assert_eq!(
            AppError::Sim(SimError::SocketRead(io::Error::from(io::ErrorKind::BrokenPipe)))
                .code(),
            ReturnCode::SocketRead
        );
        assert_eq!(ReturnCode::SocketRead as u8, 7);
    }
}
