//! Stack description: where things live and how to run the external pieces.
//!
//! Loaded from an optional YAML file. Every field has a default, and the
//! defaults describe the stock container layout, so an empty file (or no file
//! at all) provisions the standard image.

use crate::error::{ProvisionError, Result};
use crate::supervisor::Readiness;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;

// ---------------------------------------------------------------------------
// CommandLine
// ---------------------------------------------------------------------------

/// A program plus its leading arguments, e.g. `["mysqladmin", "ping"]`.
///
/// A bare program name is looked up on `PATH` when the command is built; a
/// name containing `/` is used as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandLine(Vec<String>);

impl CommandLine {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn program(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or("")
    }

    pub fn args(&self) -> &[String] {
        self.0.get(1..).unwrap_or(&[])
    }

    /// Short name used in logs and error messages.
    pub fn display_name(&self) -> String {
        Path::new(self.program())
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program().to_string())
    }

    /// Build a `Command` with the program resolved and leading args applied.
    pub fn to_command(&self) -> Result<Command> {
        let program = resolve_program(self.program())?;
        let mut cmd = Command::new(program);
        cmd.args(self.args());
        Ok(cmd)
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

fn resolve_program(program: &str) -> Result<PathBuf> {
    if program.is_empty() {
        return Err(ProvisionError::ToolNotFound("<empty command>".into()));
    }
    if program.contains('/') {
        return Ok(PathBuf::from(program));
    }
    which::which(program).map_err(|_| ProvisionError::ToolNotFound(program.to_string()))
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    /// Installed application sources (stock config files, schema script).
    pub src_dir: PathBuf,
    /// Operator-supplied configuration volume.
    pub conf_dir: PathBuf,
    /// Persistent data volume.
    pub data_dir: PathBuf,
    /// Per-contest overrides volume.
    pub contest_dir: PathBuf,
    /// Web front-end configuration directory (key/trust stores, descriptors).
    pub web_dir: PathBuf,
    /// Runtime secret directory for the application server.
    pub secret_dir: PathBuf,
    /// Program directory read by the final process manager.
    pub supervisor_conf_dir: PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            src_dir: "/usr/src/abacuscm".into(),
            conf_dir: "/conf".into(),
            data_dir: "/data".into(),
            contest_dir: "/contest".into(),
            web_dir: "/etc/jetty8".into(),
            secret_dir: "/etc/abacus".into(),
            supervisor_conf_dir: "/etc/supervisor/conf.d".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub openssl: CommandLine,
    pub keytool: CommandLine,
    pub key_bits: u32,
    pub keystore_password: String,
    pub truststore_alias: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            openssl: CommandLine::new(["openssl"]),
            keytool: CommandLine::new(["keytool"]),
            key_bits: 4096,
            keystore_password: "password".into(),
            truststore_alias: "abacuscert".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    /// Engine data directory. Defaults to `<data_dir>/mysql`.
    pub data_dir: Option<PathBuf>,
    /// Subdirectory whose presence means the engine is initialized.
    pub control_marker: String,
    pub install: CommandLine,
    pub start: CommandLine,
    pub probe: CommandLine,
    pub shutdown: CommandLine,
    /// Batch client; the schema script is fed on stdin.
    pub client: CommandLine,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Schema script. Defaults to `<src_dir>/db/structure.sql`.
    pub schema: Option<PathBuf>,
    pub readiness: Readiness,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            control_marker: "mysql".into(),
            install: CommandLine::new(["mysql_install_db", "--user", "mysql"]),
            start: CommandLine::new(["/usr/bin/mysqld_safe", "--skip-syslog"]),
            probe: CommandLine::new(["/usr/bin/mysqladmin", "ping"]),
            shutdown: CommandLine::new(["/usr/bin/mysqladmin", "shutdown"]),
            client: CommandLine::new(["/usr/bin/mysql", "-u", "root", "--batch"]),
            database: "abacus".into(),
            user: "abacus".into(),
            password: "abacus".into(),
            schema: None,
            readiness: Readiness::new(20, 500),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppServerConfig {
    /// Server binary; the synthesized config path is appended.
    pub command: CommandLine,
    /// Signal name used for graceful shutdown.
    pub stop_signal: String,
    /// Admin-tool verb used as the authenticated liveness check.
    pub probe_args: Vec<String>,
    pub readiness: Readiness,
}

impl Default for AppServerConfig {
    fn default() -> Self {
        Self {
            command: CommandLine::new(["/usr/bin/abacusd"]),
            stop_signal: "SIGINT".into(),
            probe_args: vec!["whatami".into()],
            readiness: Readiness::new(10, 500),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminToolConfig {
    pub command: CommandLine,
    /// Client config. Defaults to `<src_dir>/docker/admin.conf`.
    pub client_config: Option<PathBuf>,
}

impl Default for AdminToolConfig {
    fn default() -> Self {
        Self {
            command: CommandLine::new(["/usr/bin/abacustool"]),
            client_config: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSpec {
    pub username: String,
    pub display_name: String,
    pub role: String,
    /// Generated once. Defaults to `<data_dir>/abacus/<username>.pw`.
    #[serde(default)]
    pub password_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub password_length: usize,
    pub accounts: Vec<AccountSpec>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            password_length: 16,
            accounts: vec![AccountSpec {
                username: "standings".into(),
                display_name: "Standings bot".into(),
                role: "contestant".into(),
                password_file: None,
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    pub command: CommandLine,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            command: CommandLine::new([
                "/usr/bin/supervisord",
                "-n",
                "-c",
                "/etc/supervisor/supervisord.conf",
            ]),
        }
    }
}

// ---------------------------------------------------------------------------
// StackConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub layout: Layout,
    pub tools: ToolsConfig,
    pub datastore: DatastoreConfig,
    pub app_server: AppServerConfig,
    pub admin_tool: AdminToolConfig,
    pub bootstrap: BootstrapConfig,
    pub handoff: HandoffConfig,
}

impl StackConfig {
    /// Load from `path`, or return the built-in defaults when no path is given.
    ///
    /// An explicitly named file that does not exist is an input error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.is_file() {
            return Err(ProvisionError::MissingFile(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}
