//! codecarbon CLI - Track the carbon emissions of a workload.

use std::process;
use std::sync::mpsc::{self, Receiver};

use clap::Parser;
use codecarbon::cli::{Cli, Commands, ConfigCommands};
use codecarbon::commands::{self, Output};
use codecarbon::{ConfigSources, Error, Layer, Resolver, Result};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;

    if let Err(e) = run_command(cli.command, human) {
        if human {
            eprintln!("Error: {}", e);
        } else {
            let err = serde_json::json!({ "error": e.to_string() });
            eprintln!("{}", err);
        }
        process::exit(1);
    }
}

fn run_command(command: Commands, human: bool) -> Result<()> {
    // Flags are the explicit layer; everything else comes from files and env
    let explicit = match &command {
        Commands::Monitor(args) => args.explicit_layer(),
        Commands::Config { .. } => Layer::new(),
    };
    let sources = ConfigSources::from_process()?.with_explicit(explicit);
    let settings = Resolver::new().resolve(&sources)?;

    init_logging(settings.log_level());

    match command {
        Commands::Monitor(args) => {
            let shutdown = shutdown_signal()?;
            let result = commands::monitor(settings, args.no_api, &shutdown)?;
            output(&result, human);
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let result = commands::config_show(&settings);
                output(&result, human);
            }
        },
    }
    Ok(())
}

/// Log to stderr so stdout stays machine-readable. `RUST_LOG` wins over the
/// configured `log_level`.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Receiver that fires once on Ctrl-C.
fn shutdown_signal() -> Result<Receiver<()>> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| Error::Io(std::io::Error::other(e)))?;
    Ok(rx)
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
