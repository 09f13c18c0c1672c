mod commands;

use capsa_core::{expand_tilde, install_signal_handler, Config, CoreError, Manager};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::Failure;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(
    name = "capsa",
    version,
    about = "Install command-line programs into sandboxed root filesystems"
)]
struct Cli {
    /// Install root (overrides the config file).
    #[arg(long, global = true)]
    root: Option<String>,

    /// Configuration file to read instead of the default location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build a package and expose its command.
    Install {
        /// Package name, or `-` to infer it from the commands the build adds.
        name: String,
        /// Build arguments passed to the engine, e.g. `--apk xeyes`.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        tokens: Vec<String>,
    },
    /// Rebuild packages from their recorded build arguments.
    Rebuild {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Remove a package and its command link.
    Remove { name: String },
    /// Refresh the engine cache and rebuild every package.
    Upgrade,
    /// Write a package's launcher and store entry to a gzipped tarball.
    Package {
        name: String,
        /// Output archive path.
        out: PathBuf,
    },
    /// Print one install line per package, for `unfreeze`.
    Freeze,
    /// Replace the installed package set with the one in a freeze file.
    Unfreeze { file: PathBuf },
    /// List installed packages.
    List,
    /// Remove leftover staging directories and unused engine state.
    Clean,
    /// Drop engine layers not used by any package.
    Purge,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn load_config(root: Option<&str>, config: Option<&Path>) -> Result<Config, CoreError> {
    let mut config = Config::discover(config)?;
    if let Some(root) = root {
        config.root = expand_tilde(root);
    }
    debug!(
        "install root {}, engine {} ({})",
        config.root.display(),
        config.engine.backend,
        config.engine.program
    );
    Ok(config)
}

fn run(cli: Cli) -> commands::CommandResult {
    let json = cli.json;
    let manager = || -> Result<Manager, Failure> {
        Ok(Manager::new(load_config(
            cli.root.as_deref(),
            cli.config.as_deref(),
        )?)?)
    };

    match cli.command {
        Commands::Install { name, tokens } => {
            commands::install::run(&manager()?, &name, &tokens, json)
        }
        Commands::Rebuild { names } => commands::rebuild::run(&manager()?, &names, json),
        Commands::Remove { name } => commands::remove::run(&manager()?, &name, json),
        Commands::Upgrade => commands::upgrade::run(&manager()?, json),
        Commands::Package { name, out } => {
            commands::package::run(&manager()?, &name, &out, json)
        }
        Commands::Freeze => commands::freeze::run(&manager()?),
        Commands::Unfreeze { file } => commands::unfreeze::run(&manager()?, &file, json),
        Commands::List => commands::list::run(&manager()?, json),
        Commands::Clean => commands::clean::run(&manager()?, json),
        Commands::Purge => commands::purge::run(&manager()?, json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CAPSA_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(failure) => {
            eprintln!("error: {}", failure.message);
            ExitCode::from(failure.code)
        }
    }
}
