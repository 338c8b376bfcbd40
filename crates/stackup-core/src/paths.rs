use crate::config::{AccountSpec, StackConfig};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory and file names
// ---------------------------------------------------------------------------

pub const APP_STATE_DIR: &str = "abacus";
pub const ROOT_CA_DIR: &str = "abacus-certs";
pub const LEAF_CERT_DIR: &str = "jetty-certs";
pub const WWW_DIR: &str = "www";
pub const STANDINGS_DIR: &str = "www/standings";

pub const ACTION_CACHE_FILE: &str = "runcache.redb";
pub const SERVER_CONF: &str = "server.conf";
pub const MARKER_CONF: &str = "marker.conf";
pub const OVERRIDE_SUFFIX: &str = ".override";

pub const CA_CERT: &str = "cacert.crt";
pub const SERVER_KEY: &str = "server.key";
pub const LEAF_KEY: &str = "jetty.key";
pub const LEAF_CERT: &str = "jetty.crt";

pub const KEYSTORE: &str = "keystore";
pub const TRUSTSTORE: &str = "abacus_keystore";
pub const WEB_DESCRIPTOR: &str = "jetty.xml";
pub const WEB_SSL_DESCRIPTOR: &str = "jetty-ssl.xml";

pub const SYMMETRIC_KEY: &str = "rijndael.key";
pub const SYMMETRIC_IV: &str = "rijndael.iv";

pub const SERVER_PROGRAM: &str = "server-supervisord.conf";
pub const MARKER_PROGRAM: &str = "marker-supervisord.conf";

/// Services that get a `<data>/<service>/log` directory in server mode.
pub const SERVER_LOG_SERVICES: &[&str] = &["supervisor", "mysql", "jetty8", "abacus"];
/// Services that get a `<data>/<service>/log` directory in marker mode.
pub const MARKER_LOG_SERVICES: &[&str] = &["supervisor", "abacus"];

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn app_state_dir(config: &StackConfig) -> PathBuf {
    config.layout.data_dir.join(APP_STATE_DIR)
}

pub fn action_cache_path(config: &StackConfig) -> PathBuf {
    app_state_dir(config).join(ACTION_CACHE_FILE)
}

pub fn log_dir(config: &StackConfig, service: &str) -> PathBuf {
    config.layout.data_dir.join(service).join("log")
}

pub fn www_dir(config: &StackConfig) -> PathBuf {
    config.layout.data_dir.join(WWW_DIR)
}

pub fn standings_dir(config: &StackConfig) -> PathBuf {
    config.layout.data_dir.join(STANDINGS_DIR)
}

pub fn root_ca_dir(config: &StackConfig) -> PathBuf {
    config.layout.conf_dir.join(ROOT_CA_DIR)
}

pub fn leaf_cert_dir(config: &StackConfig) -> PathBuf {
    config.layout.conf_dir.join(LEAF_CERT_DIR)
}

/// Stock config shipped with the application sources.
pub fn stock_config(config: &StackConfig, name: &str) -> PathBuf {
    config.layout.src_dir.join("docker").join(name)
}

pub fn operator_override(config: &StackConfig, name: &str) -> PathBuf {
    config
        .layout
        .conf_dir
        .join(APP_STATE_DIR)
        .join(format!("{name}{OVERRIDE_SUFFIX}"))
}

pub fn contest_override(config: &StackConfig, name: &str) -> PathBuf {
    config
        .layout
        .contest_dir
        .join(format!("{name}{OVERRIDE_SUFFIX}"))
}

/// Synthesized config written to the data volume.
pub fn generated_config(config: &StackConfig, name: &str) -> PathBuf {
    app_state_dir(config).join(name)
}

pub fn datastore_dir(config: &StackConfig) -> PathBuf {
    config
        .datastore
        .data_dir
        .clone()
        .unwrap_or_else(|| config.layout.data_dir.join("mysql"))
}

pub fn datastore_control_marker(config: &StackConfig) -> PathBuf {
    datastore_dir(config).join(&config.datastore.control_marker)
}

pub fn schema_script(config: &StackConfig) -> PathBuf {
    config
        .datastore
        .schema
        .clone()
        .unwrap_or_else(|| config.layout.src_dir.join("db").join("structure.sql"))
}

pub fn admin_client_config(config: &StackConfig) -> PathBuf {
    config
        .admin_tool
        .client_config
        .clone()
        .unwrap_or_else(|| stock_config(config, "admin.conf"))
}

pub fn account_password_file(config: &StackConfig, account: &AccountSpec) -> PathBuf {
    account
        .password_file
        .clone()
        .unwrap_or_else(|| app_state_dir(config).join(format!("{}.pw", account.username)))
}

pub fn web_file(config: &StackConfig, name: &str) -> PathBuf {
    config.layout.web_dir.join(name)
}

pub fn secret_file(config: &StackConfig, name: &str) -> PathBuf {
    config.layout.secret_dir.join(name)
}

pub fn supervisor_program(config: &StackConfig, name: &str) -> PathBuf {
    config.layout.supervisor_conf_dir.join(name)
}

/// Sibling staging path used while building `dir` (e.g. `abacus-certs.tmp`).
pub fn staging_dir(dir: &Path) -> PathBuf {
    let mut name = dir.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    dir.with_file_name(name)
}
