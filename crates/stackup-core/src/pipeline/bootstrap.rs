//! One-time account creation on a freshly provisioned server.
//!
//! Each account is its own cached action, so a run interrupted after the
//! first account resumes with the second. Temporary datastore and app server
//! instances are only started when some account is still pending.

use std::path::PathBuf;

use nix::sys::signal::Signal;
use tracing::info;

use crate::cache::{ActionCache, ActionId, RunOnce};
use crate::config::{AccountSpec, CommandLine, StackConfig};
use crate::credentials;
use crate::error::Result;
use crate::layering::EffectiveConfig;
use crate::paths;
use crate::runner::run_checked;
use crate::supervisor::{supervised, CommandProbe, ProcessSpec, StopMethod};

use super::datastore;

/// The admin tool, pointed at the client config and the synthesized server
/// config (from which it takes the admin credentials).
#[derive(Debug, Clone)]
pub struct AdminTool {
    command: CommandLine,
    client_config: PathBuf,
    server_config: PathBuf,
}

impl AdminTool {
    pub fn new(config: &StackConfig) -> Self {
        Self {
            command: config.admin_tool.command.clone(),
            client_config: paths::admin_client_config(config),
            server_config: paths::generated_config(config, paths::SERVER_CONF),
        }
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "-c".to_string(),
            self.client_config.display().to_string(),
            "-s".to_string(),
            self.server_config.display().to_string(),
        ]
    }

    /// Authenticated no-op used as the app server's readiness check.
    pub fn probe(&self, verb: &[String]) -> CommandProbe {
        CommandProbe::new(self.command.clone())
            .with_args(self.base_args().into_iter().chain(verb.iter().cloned()))
    }

    pub fn add_user(&self, account: &AccountSpec, password: &str) -> Result<()> {
        let mut cmd = self.command.to_command()?;
        cmd.args(self.base_args()).args([
            "adduser",
            account.username.as_str(),
            account.display_name.as_str(),
            password,
            account.role.as_str(),
        ]);
        run_checked(&mut cmd, "adduser")
    }
}

/// Identity under which the creation of `account` is cached.
pub fn account_action(account: &AccountSpec, password: &str) -> ActionId {
    ActionId::new("create_account")
        .arg(&account.username)
        .arg(&account.display_name)
        .secret_arg(password)
        .arg(&account.role)
}

struct Pending<'a> {
    account: &'a AccountSpec,
    password: String,
    action: ActionId,
}

fn app_server_spec(config: &StackConfig, stop_signal: Signal) -> ProcessSpec {
    ProcessSpec {
        name: "app-server".to_string(),
        command: config.app_server.command.clone(),
        args: vec![paths::generated_config(config, paths::SERVER_CONF)
            .display()
            .to_string()],
        cwd: None,
        stop: StopMethod::Signal(stop_signal),
    }
}

/// Create every configured account not yet recorded in `cache`.
/// Returns how many were created on this call.
pub fn create_accounts(
    config: &StackConfig,
    cache: &ActionCache,
    server_conf: &EffectiveConfig,
    stop_signal: Signal,
) -> Result<usize> {
    let mut pending = Vec::new();
    for account in &config.bootstrap.accounts {
        let pw_file = paths::account_password_file(config, account);
        credentials::ensure_password_file(&pw_file, config.bootstrap.password_length)?;
        let password = credentials::read_password(&pw_file)?;
        let action = account_action(account, &password);
        if cache.has(&action)? {
            info!(action = %action, "already done, skipping");
            continue;
        }
        pending.push(Pending {
            account,
            password,
            action,
        });
    }
    if pending.is_empty() {
        return Ok(0);
    }

    // The admin tool authenticates with this; fail before starting anything.
    server_conf.require("initialisation", "admin_password")?;

    let admin = AdminTool::new(config);
    let app_probe = admin.probe(&config.app_server.probe_args);

    supervised(
        &datastore::process_spec(config),
        &datastore::probe(config),
        &config.datastore.readiness,
        |_| {
            supervised(
                &app_server_spec(config, stop_signal),
                &app_probe,
                &config.app_server.readiness,
                |_| {
                    let mut created = 0;
                    for p in &pending {
                        let outcome = cache
                            .run_once(&p.action, || admin.add_user(p.account, &p.password))?;
                        if outcome == RunOnce::Executed {
                            created += 1;
                        }
                    }
                    Ok(created)
                },
            )
        },
    )
}
