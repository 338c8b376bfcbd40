mod cmd;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cmd::cache::CacheSubcommand;
use stackup_core::config::StackConfig;
use stackup_core::pipeline::{MarkerOptions, ServerOptions, DEFAULT_CERT_DAYS, DEFAULT_HTTPS_PORT};
use stackup_core::ProvisionError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "stackup",
    about = "Provision the contest server container and hand off to the process manager",
    version,
    propagate_version = true
)]
struct Cli {
    /// Stack description (YAML); built-in container defaults when omitted
    #[arg(long, global = true, env = "STACKUP_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Runs `shell` when omitted
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a server container, then start the process manager
    Server {
        /// Validity in days of newly generated certificates
        #[arg(long, default_value_t = DEFAULT_CERT_DAYS)]
        days: u32,

        /// Hostname for a newly generated web server certificate
        #[arg(long, value_name = "HOSTNAME")]
        server: Option<String>,

        /// HTTPS port as seen from outside the container
        #[arg(long, value_name = "PORT", default_value_t = DEFAULT_HTTPS_PORT)]
        https_port: u16,

        /// Provision only; print the handoff command instead of running it
        #[arg(long)]
        no_handoff: bool,
    },

    /// Provision a marker (worker) container, then start the process manager
    Marker {
        /// Server to connect to
        #[arg(long, value_name = "HOSTNAME")]
        server: Option<String>,

        /// Provision only; print the handoff command instead of running it
        #[arg(long)]
        no_handoff: bool,
    },

    /// Replace this process with an interactive shell
    Shell {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Merge INI-style files and apply SECTION.NAME=VALUE overrides
    Inichange {
        /// Files to merge, later files win
        files: Vec<PathBuf>,

        /// Override a value (repeatable)
        #[arg(short = 's', long = "set", value_name = "SECTION.NAME=VALUE")]
        set: Vec<String>,

        /// Write to this file instead of stdout
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },

    /// Inspect the record of completed one-time actions
    Cache {
        #[command(subcommand)]
        subcommand: CacheSubcommand,
    },
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<StackConfig> {
    StackConfig::load(path).context("failed to load stack configuration")
}

/// Bad operator input exits 2, everything else 1.
fn exit_code(e: &anyhow::Error) -> i32 {
    let input = e.chain().any(|cause| {
        cause
            .downcast_ref::<ProvisionError>()
            .is_some_and(ProvisionError::is_input_error)
    });
    if input {
        2
    } else {
        1
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Some(Commands::Server { .. } | Commands::Marker { .. }) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Some(Commands::Server {
            days,
            server,
            https_port,
            no_handoff,
        }) => load_config(config_path).and_then(|config| {
            let opts = ServerOptions {
                hostname: server,
                https_port,
                days,
            };
            cmd::server::run(config, &opts, no_handoff)
        }),
        Some(Commands::Marker { server, no_handoff }) => {
            load_config(config_path).and_then(|config| {
                cmd::marker::run(config, &MarkerOptions { server }, no_handoff)
            })
        }
        Some(Commands::Shell { args }) => cmd::shell::run(&args),
        Some(Commands::Inichange { files, set, output }) => {
            cmd::inichange::run(&files, &set, output.as_deref())
        }
        Some(Commands::Cache { subcommand }) => load_config(config_path)
            .and_then(|config| cmd::cache::run(&config, subcommand, cli.json)),
        None => cmd::shell::run(&[]),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(exit_code(&e));
    }
}
