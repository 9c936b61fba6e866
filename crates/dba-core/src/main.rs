//! Device Bridge Autoconnect
//!
//! Keeps the debug bridge connected to every local device endpoint:
//! - Scans the socket table for listening loopback/wildcard endpoints
//! - Connects the ones the bridge does not know yet
//! - Kills connect attempts that hang
//! - Disconnects devices the bridge reports offline

use clap::builder::BoolishValueParser;
use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser};
use dba_core::action::{platform_process_control, AdbClient};
use dba_core::collect::{SystemSocketTable, ToolRunner};
use dba_core::config::{
    resolve_bridge_path, ConnectPolicy, PollConfig, DEFAULT_BRIDGE_PATH,
    DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_LOOP_DELAY_MS, DEFAULT_MIN_PORT, DEFAULT_SETTLE_DELAY_MS,
};
use dba_core::daemon::{PollLoop, ThreadSleeper};
use dba_core::exit_codes::ExitCode;
use dba_core::logging::{init_logging, LogConfig, LogFormat};
use std::time::Duration;
use tracing::{error, info};

const AFTER_HELP: &str = "\
Flags also accept the underscore spelling and an `=` value, for example
`--min_port=5550 --limit_port=0 --print_output=1`. Toggles take
0/1, true/false, yes/no or on/off.";

/// Device Bridge Autoconnect - keep adb connected to local device endpoints
#[derive(Parser, Debug)]
#[command(name = "dba")]
#[command(version, about, long_about = None, after_help = AFTER_HELP)]
#[command(disable_help_flag = true)]
struct Cli {
    /// Print this help and exit (exit code 10)
    #[arg(short = 'h', long, num_args = 0..=1, default_missing_value = "1", value_name = "ANY")]
    help: Option<String>,

    /// Path or name of the adb executable
    #[arg(long, alias = "adb_path", env = "DBA_ADB_PATH", default_value = DEFAULT_BRIDGE_PATH)]
    adb_path: String,

    /// Ports below this value are never connected
    #[arg(long, alias = "min_port", env = "DBA_MIN_PORT", default_value_t = DEFAULT_MIN_PORT)]
    min_port: u16,

    /// Set ADB_LOCAL_TRANSPORT_MAX_PORT to the minimum port for the bridge
    #[arg(
        long,
        alias = "limit_port",
        env = "DBA_LIMIT_PORT",
        default_value = "true",
        num_args = 0..=1,
        default_missing_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
    )]
    limit_port: bool,

    /// Verbose colored logging on stderr
    #[arg(
        long,
        alias = "print_output",
        env = "DBA_PRINT_OUTPUT",
        default_value = "false",
        num_args = 0..=1,
        default_missing_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
    )]
    print_output: bool,

    /// Wait after launching connect attempts, in milliseconds
    #[arg(long, alias = "sleep_after_connect", env = "DBA_SLEEP_AFTER_CONNECT", default_value_t = DEFAULT_SETTLE_DELAY_MS, value_name = "MS")]
    sleep_after_connect: u64,

    /// Wait between cycles, in milliseconds
    #[arg(long, alias = "sleep_after_loop", env = "DBA_SLEEP_AFTER_LOOP", default_value_t = DEFAULT_LOOP_DELAY_MS, value_name = "MS")]
    sleep_after_loop: u64,

    /// Extra ports never to connect, comma separated
    #[arg(long, alias = "exclude_port", env = "DBA_EXCLUDE_PORT", value_delimiter = ',', value_name = "PORT")]
    exclude_port: Vec<u16>,

    /// Timeout for each external command, in milliseconds
    #[arg(
        long,
        alias = "command_timeout",
        env = "DBA_COMMAND_TIMEOUT",
        default_value_t = DEFAULT_COMMAND_TIMEOUT_MS,
        value_parser = clap::value_parser!(u64).range(1..),
        value_name = "MS",
    )]
    command_timeout: u64,

    /// Run a single cycle and print its report as JSON on stdout
    #[arg(long)]
    once: bool,

    /// Log format on stderr
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Disable colored output (also set by a non-empty NO_COLOR)
    #[arg(long)]
    no_color: bool,
}

impl Cli {
    fn log_config(&self) -> LogConfig {
        let mut config = LogConfig::from_env(None, self.log_format);
        if self.print_output {
            config = config.verbose();
        }
        let no_color_env = std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty());
        if self.no_color || no_color_env {
            config = config.with_color(false);
        }
        config
    }

    fn poll_config(&self) -> Result<PollConfig, dba_common::Error> {
        let bridge_path = resolve_bridge_path(&self.adb_path)?;
        let config = PollConfig {
            bridge_path,
            policy: ConnectPolicy::default()
                .with_min_port(self.min_port)
                .with_excluded_ports(self.exclude_port.iter().copied()),
            limit_port: self.limit_port,
            settle_delay: Duration::from_millis(self.sleep_after_connect),
            loop_delay: Duration::from_millis(self.sleep_after_loop),
            command_timeout: Duration::from_millis(self.command_timeout),
        };
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Main entry point
// ============================================================================

fn main() {
    let exit_code = match Cli::try_parse() {
        Ok(cli) => run(&cli),
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayVersion => ExitCode::Clean,
                _ => ExitCode::ArgsError,
            };
            let _ = err.print();
            code
        }
    };

    if !exit_code.is_success() {
        info!(exit = %exit_code, "dba exiting");
    }
    std::process::exit(exit_code.as_i32());
}

fn run(cli: &Cli) -> ExitCode {
    if cli.help.is_some() {
        eprintln!("{}", Cli::command().render_help());
        return ExitCode::ArgsError;
    }

    init_logging(&cli.log_config());

    let config = match cli.poll_config() {
        Ok(config) => config,
        Err(err) => {
            error!(code = err.code(), error = %err, "invalid configuration");
            eprintln!("{}", err.to_human());
            return ExitCode::for_error(&err);
        }
    };

    info!(
        bridge = %config.bridge_path.display(),
        min_port = config.policy.min_port,
        limit_port = config.limit_port,
        settle_ms = config.settle_delay.as_millis() as u64,
        loop_ms = config.loop_delay.as_millis() as u64,
        "dba starting"
    );

    let runner = ToolRunner::with_defaults();
    let bridge = AdbClient::new(config.bridge_path.clone(), runner.clone(), config.command_timeout);
    let sockets = SystemSocketTable::new(runner.clone(), config.command_timeout);
    let processes = platform_process_control(runner, config.command_timeout);
    let mut poll = PollLoop::new(config, bridge, sockets, processes, ThreadSleeper);

    if !cli.once {
        poll.run(None);
        return ExitCode::Clean;
    }

    let Some(report) = poll.run(Some(1)).last_report else {
        return ExitCode::InternalError;
    };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            error!(error = %err, "could not serialize cycle report");
            return ExitCode::InternalError;
        }
    }
    if report.succeeded() {
        ExitCode::Clean
    } else {
        ExitCode::CycleFailed
    }
}
