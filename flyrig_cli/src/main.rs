mod cli;
mod error_fmt;
mod rig;

use clap::Parser;
use cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use flyrig_config::Config;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let args = Cli::parse();
    let _ = JSON_MODE.set(args.json);
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error reporting: {e}");
    }

    let cfg = match load_config(&args) {
        Ok(cfg) => cfg,
        Err(e) => return fail(&e),
    };
    if let Err(e) = init_tracing(&args, &cfg) {
        eprintln!("failed to init logging: {e}");
    }

    let result = match args.cmd {
        Commands::Run { sim, home_first } => rig::run_experiment(&cfg, sim, home_first),
        Commands::Home { sim } => rig::home(&cfg, sim),
        Commands::Center { sim } => rig::center(&cfg, sim),
        Commands::Jog {
            vel_x,
            vel_y,
            duration_ms,
            sim,
        } => rig::jog(&cfg, sim, vel_x, vel_y, duration_ms),
        Commands::SelfCheck => rig::self_check(&cfg),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

fn fail(err: &eyre::Report) -> ExitCode {
    if JSON_MODE.get().copied().unwrap_or(false) {
        eprintln!("{}", error_fmt::json_error(err));
    } else {
        eprintln!("{}", error_fmt::humanize(err));
    }
    ExitCode::FAILURE
}

fn load_config(args: &Cli) -> eyre::Result<Config> {
    if args.config.exists() {
        return flyrig_config::load_file(&args.config);
    }
    // the default path is optional; an explicit one must exist
    if args.config == Path::new("etc/flyrig.toml") {
        return Ok(Config::default());
    }
    eyre::bail!("config file {} not found", args.config.display())
}

fn init_tracing(args: &Cli, cfg: &Config) -> eyre::Result<()> {
    let level = cfg
        .logging
        .level
        .clone()
        .unwrap_or_else(|| args.log_level.clone());
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&level))?;

    match cfg.logging.file.as_deref() {
        Some(path) => {
            let path = Path::new(path);
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let name = path.file_name().unwrap_or_else(|| "flyrig.log".as_ref());
            let appender =
                tracing_appender::rolling::never(dir.unwrap_or_else(|| Path::new(".")), name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_writer(writer)
                .init();
        }
        None if args.json => {
            tracing_subscriber::fmt().with_env_filter(filter).json().init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}
