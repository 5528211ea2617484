//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "flyrig", version, about = "Fly tracking rig CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/flyrig.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the closed-loop experiment until Ctrl-C
    Run {
        /// Force the simulated stage and vision source
        #[arg(long, action = ArgAction::SetTrue)]
        sim: bool,
        /// Re-home the stage before waiting for the first fly
        #[arg(long, action = ArgAction::SetTrue)]
        home_first: bool,
    },
    /// Drive the stage to the limit switches, re-zero the frame, and center
    Home {
        /// Use the simulated stage
        #[arg(long, action = ArgAction::SetTrue)]
        sim: bool,
    },
    /// Move the stage to the remembered arena center and block until arrival
    Center {
        /// Use the simulated stage
        #[arg(long, action = ArgAction::SetTrue)]
        sim: bool,
    },
    /// Constant-velocity operator move for a fixed duration
    Jog {
        /// X velocity in m/s (clamped to the manual ceiling)
        #[arg(long, value_name = "M_PER_S", allow_hyphen_values = true)]
        vel_x: f64,
        /// Y velocity in m/s (clamped to the manual ceiling)
        #[arg(long, value_name = "M_PER_S", allow_hyphen_values = true)]
        vel_y: f64,
        /// How long to jog before stopping
        #[arg(long, value_name = "MS", default_value_t = 1000)]
        duration_ms: u64,
        /// Use the simulated stage
        #[arg(long, action = ArgAction::SetTrue)]
        sim: bool,
    },
    /// Quick health check (config, wire codec, simulated hardware)
    SelfCheck,
}
