//! Datastore engine and application schema initialization.

use tracing::info;

use crate::cache::{ActionCache, ActionId, RunOnce};
use crate::config::{DatastoreConfig, StackConfig};
use crate::error::{ProvisionError, Result};
use crate::paths;
use crate::runner::{run_checked, run_with_stdin};
use crate::supervisor::{supervised, CommandProbe, ProcessSpec, StopMethod};

pub fn process_spec(config: &StackConfig) -> ProcessSpec {
    ProcessSpec {
        name: "datastore".to_string(),
        command: config.datastore.start.clone(),
        args: Vec::new(),
        cwd: None,
        stop: StopMethod::Command(config.datastore.shutdown.clone()),
    }
}

pub fn probe(config: &StackConfig) -> CommandProbe {
    CommandProbe::new(config.datastore.probe.clone())
}

/// SQL fed to the client: a fresh database, grant, then the schema script.
///
/// The database is dropped first so that a load that failed partway is
/// replaced rather than built upon.
pub fn schema_batch(datastore: &DatastoreConfig, script: &str) -> String {
    let DatastoreConfig {
        database,
        user,
        password,
        ..
    } = datastore;
    format!(
        "drop database if exists {database};\n\
         create database {database};\n\
         grant all privileges on {database}.* to {user}@localhost identified by '{password}';\n\
         use {database};\n\
         {script}"
    )
}

/// Identity under which a completed schema load is cached.
pub fn schema_action(config: &StackConfig) -> ActionId {
    ActionId::new("load_schema").arg(&config.datastore.database)
}

/// Install the engine if its control database is missing, then load the
/// application schema unless `cache` records a completed load. Returns true
/// if the schema was loaded on this call.
///
/// The schema is loaded with the datastore running under supervision; it is
/// stopped again whether or not the load succeeds.
pub fn ensure_initialized(config: &StackConfig, cache: &ActionCache) -> Result<bool> {
    let action = schema_action(config);
    let loaded = cache.has(&action)?;
    let script_path = paths::schema_script(config);
    if !loaded && !script_path.is_file() {
        return Err(ProvisionError::MissingFile(script_path));
    }

    let control = paths::datastore_control_marker(config);
    if !control.is_dir() {
        info!(dir = %paths::datastore_dir(config).display(), "installing datastore engine");
        let mut install = config.datastore.install.to_command()?;
        run_checked(&mut install, &config.datastore.install.display_name())?;
    }

    if loaded {
        info!(database = %config.datastore.database, "schema present; skipping");
        return Ok(false);
    }
    let batch = schema_batch(&config.datastore, &std::fs::read_to_string(&script_path)?);

    let outcome = cache.run_once(&action, || {
        supervised(
            &process_spec(config),
            &probe(config),
            &config.datastore.readiness,
            |_| {
                let client = &config.datastore.client;
                let mut cmd = client.to_command()?;
                run_with_stdin(&mut cmd, &client.display_name(), batch.as_bytes())
            },
        )
    })?;
    info!(database = %config.datastore.database, "schema loaded");
    Ok(outcome == RunOnce::Executed)
}
