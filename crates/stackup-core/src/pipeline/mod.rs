//! The ordered provisioning sequence run by the container entrypoint.
//!
//! Server mode:
//!
//! 1. log/data directories
//! 2. root CA and front-end certificate (created once)
//! 3. datastore engine and schema (created once)
//! 4. server and worker configuration (merged every run)
//! 5. key/trust stores, runtime secrets, descriptors (rebuilt every run)
//! 6. bootstrap accounts (each created once, through the action cache)
//! 7. hand off to the process manager
//!
//! Steps 1–6 live here; step 7 is `Handoff::exec`, performed by the caller.
//! Every step is safe to repeat, so an interrupted run is recovered by running
//! again. The first error aborts the sequence.

pub mod bootstrap;
pub mod datastore;
pub mod frontend;

use std::os::unix::process::CommandExt;
use std::path::PathBuf;

use tracing::info;

use crate::cache::ActionCache;
use crate::config::{CommandLine, StackConfig};
use crate::credentials::Toolchain;
use crate::error::{ProvisionError, Result};
use crate::io;
use crate::layering::{self, EffectiveConfig, Override};
use crate::paths;
use crate::supervisor;

pub const DEFAULT_HTTPS_PORT: u16 = 443;
pub const DEFAULT_CERT_DAYS: u32 = 3650;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Public hostname: subject of a newly generated front-end certificate and
    /// the worker's `server.address`.
    pub hostname: Option<String>,
    /// HTTPS port as seen from outside the container.
    pub https_port: u16,
    /// Validity of newly issued certificates.
    pub days: u32,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            hostname: None,
            https_port: DEFAULT_HTTPS_PORT,
            days: DEFAULT_CERT_DAYS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MarkerOptions {
    /// Server the worker connects to.
    pub server: Option<String>,
}

// ---------------------------------------------------------------------------
// Handoff
// ---------------------------------------------------------------------------

/// The long-running process that replaces the entrypoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    command: CommandLine,
}

impl Handoff {
    pub fn new(command: CommandLine) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    /// Replace the current process image. Returns only on failure.
    pub fn exec(&self) -> ProvisionError {
        info!(command = %self.command, "handing off");
        match self.command.to_command() {
            Ok(mut cmd) => ProvisionError::Io(cmd.exec()),
            Err(e) => e,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    config: StackConfig,
}

impl Pipeline {
    pub fn new(config: StackConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Provision a server container (steps 1–6).
    ///
    /// Inputs are validated and the action cache is opened before step 1, so
    /// a bad input or a cache held by another run changes nothing.
    pub fn run_server(&self, opts: &ServerOptions) -> Result<Handoff> {
        let config = &self.config;
        let stop_signal = supervisor::parse_signal(&config.app_server.stop_signal)?;
        require_files(&server_inputs(config))?;
        let cache = ActionCache::open(&paths::action_cache_path(config))?;

        info!(step = 1, "preparing directories");
        make_service_dirs(config, paths::SERVER_LOG_SERVICES)?;
        io::ensure_dir(&paths::www_dir(config))?;
        io::ensure_dir(&paths::standings_dir(config))?;

        info!(step = 2, "ensuring certificates");
        let toolchain = Toolchain::new(&config.tools, opts.days);
        toolchain.ensure_root_ca(&paths::root_ca_dir(config))?;
        toolchain.ensure_leaf_cert(&paths::leaf_cert_dir(config), opts.hostname.as_deref())?;

        info!(step = 3, "ensuring datastore");
        datastore::ensure_initialized(config, &cache)?;

        info!(step = 4, "synthesizing configuration");
        let server_conf = synthesize_server_config(config)?;
        synthesize_marker_config(config, opts.hostname.as_deref())?;

        info!(step = 5, "rebuilding front-end material");
        frontend::install(config, &toolchain, opts.https_port)?;
        install_program(config, paths::SERVER_PROGRAM)?;

        info!(step = 6, "bootstrapping accounts");
        bootstrap::create_accounts(config, &cache, &server_conf, stop_signal)?;

        Ok(Handoff::new(config.handoff.command.clone()))
    }

    /// Provision a worker container. Requires the root CA from a server run.
    pub fn run_marker(&self, opts: &MarkerOptions) -> Result<Handoff> {
        let config = &self.config;
        let ca_dir = paths::root_ca_dir(config);
        if !ca_dir.is_dir() {
            return Err(ProvisionError::MissingCertificates(ca_dir));
        }
        require_files(&marker_inputs(config))?;

        make_service_dirs(config, paths::MARKER_LOG_SERVICES)?;
        synthesize_marker_config(config, opts.server.as_deref())?;
        install_program(config, paths::MARKER_PROGRAM)?;

        Ok(Handoff::new(config.handoff.command.clone()))
    }
}

// ---------------------------------------------------------------------------
// Steps shared by both modes
// ---------------------------------------------------------------------------

/// Source files a server run reads. All must exist before step 1, including
/// the schema script on volumes whose schema is already loaded.
pub fn server_inputs(config: &StackConfig) -> Vec<PathBuf> {
    let mut inputs = vec![
        paths::stock_config(config, paths::SERVER_CONF),
        paths::stock_config(config, paths::MARKER_CONF),
        paths::schema_script(config),
        paths::stock_config(config, paths::SERVER_PROGRAM),
    ];
    if !config.bootstrap.accounts.is_empty() {
        inputs.push(paths::admin_client_config(config));
    }
    inputs
}

pub fn marker_inputs(config: &StackConfig) -> Vec<PathBuf> {
    vec![
        paths::stock_config(config, paths::MARKER_CONF),
        paths::stock_config(config, paths::MARKER_PROGRAM),
    ]
}

/// `MissingFile` for the first path that is not a regular file.
fn require_files(files: &[PathBuf]) -> Result<()> {
    match files.iter().find(|p| !p.is_file()) {
        Some(missing) => Err(ProvisionError::MissingFile(missing.clone())),
        None => Ok(()),
    }
}

fn make_service_dirs(config: &StackConfig, services: &[&str]) -> Result<()> {
    for service in services {
        io::ensure_dir(&paths::log_dir(config, service))?;
    }
    io::ensure_dir(&paths::app_state_dir(config))
}

/// Stock server config, then the operator and contest overrides if present.
pub fn server_config_sources(config: &StackConfig) -> Vec<PathBuf> {
    let mut sources = vec![paths::stock_config(config, paths::SERVER_CONF)];
    sources.extend(layering::existing([
        paths::operator_override(config, paths::SERVER_CONF),
        paths::contest_override(config, paths::SERVER_CONF),
    ]));
    sources
}

/// Stock worker config, then the operator override if present.
pub fn marker_config_sources(config: &StackConfig) -> Vec<PathBuf> {
    let mut sources = vec![paths::stock_config(config, paths::MARKER_CONF)];
    sources.extend(layering::existing([paths::operator_override(
        config,
        paths::MARKER_CONF,
    )]));
    sources
}

fn synthesize_server_config(config: &StackConfig) -> Result<EffectiveConfig> {
    synthesize(
        &server_config_sources(config),
        &[],
        &paths::generated_config(config, paths::SERVER_CONF),
    )
}

fn synthesize_marker_config(config: &StackConfig, server: Option<&str>) -> Result<EffectiveConfig> {
    let overrides: Vec<Override> = server
        .map(|host| Override::new("server", "address", host))
        .into_iter()
        .collect();
    synthesize(
        &marker_config_sources(config),
        &overrides,
        &paths::generated_config(config, paths::MARKER_CONF),
    )
}

fn synthesize(
    sources: &[PathBuf],
    overrides: &[Override],
    out: &std::path::Path,
) -> Result<EffectiveConfig> {
    let effective = layering::merge(sources, overrides)?;
    effective.write_to(out)?;
    info!(
        out = %out.display(),
        sources = sources.len(),
        overrides = overrides.len(),
        "wrote configuration"
    );
    Ok(effective)
}

/// Copy a process-manager program file from the sources into place.
fn install_program(config: &StackConfig, name: &str) -> Result<()> {
    let src = paths::stock_config(config, name);
    if !src.is_file() {
        return Err(ProvisionError::MissingFile(src));
    }
    let data = std::fs::read(&src)?;
    let dest = paths::supervisor_program(config, name);
    io::atomic_write(&dest, &data, Some(0o644))?;
    info!(program = name, "installed process-manager program");
    Ok(())
}
