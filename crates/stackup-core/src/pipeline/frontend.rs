//! Material derived from the persistent credentials on every run: web
//! front-end key/trust stores and descriptors, and the application server's
//! runtime secrets. None of it is persisted in the container image.

use std::borrow::Cow;
use std::path::Path;
use std::sync::OnceLock;

use regex::{NoExpand, Regex};
use tracing::{debug, info};

use crate::config::StackConfig;
use crate::credentials::{self, Toolchain};
use crate::error::Result;
use crate::io;
use crate::paths;

pub const SYMMETRIC_KEY_LEN: usize = 32;
pub const SYMMETRIC_IV_LEN: usize = 16;

fn obfuscated_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"OBF:[a-zA-Z0-9]*").unwrap())
}

fn confidential_port_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<Set name="confidentialPort">[0-9]*</Set>"#).unwrap())
}

/// Replace every obfuscated (`OBF:...`) password with `password`.
pub fn replace_obfuscated_passwords<'a>(text: &'a str, password: &str) -> Cow<'a, str> {
    obfuscated_re().replace_all(text, NoExpand(password))
}

/// Point the HTTP connector's redirect at the externally visible HTTPS port.
pub fn set_confidential_port(text: &str, port: u16) -> Cow<'_, str> {
    let replacement = format!(r#"<Set name="confidentialPort">{port}</Set>"#);
    confidential_port_re().replace_all(text, NoExpand(&replacement))
}

/// Apply `edit` to `path` if it exists, keeping its permissions.
fn edit_if_present<F>(path: &Path, edit: F) -> Result<()>
where
    F: for<'a> FnOnce(&'a str) -> Cow<'a, str>,
{
    if !path.is_file() {
        debug!(path = %path.display(), "descriptor absent; skipping");
        return Ok(());
    }
    let text = std::fs::read_to_string(path)?;
    if let Cow::Owned(updated) = edit(&text) {
        io::rewrite_in_place(path, updated.as_bytes())?;
        info!(path = %path.display(), "updated descriptor");
    }
    Ok(())
}

/// Rebuild the key/trust stores and runtime secrets for a server container.
pub fn install(config: &StackConfig, toolchain: &Toolchain, https_port: u16) -> Result<()> {
    let tools = &config.tools;
    let ca_dir = paths::root_ca_dir(config);
    let leaf_dir = paths::leaf_cert_dir(config);

    toolchain.build_truststore(
        &ca_dir.join(paths::CA_CERT),
        &paths::web_file(config, paths::TRUSTSTORE),
        &tools.truststore_alias,
        &tools.keystore_password,
    )?;
    toolchain.build_keystore(
        &leaf_dir.join(paths::LEAF_CERT),
        &leaf_dir.join(paths::LEAF_KEY),
        &paths::web_file(config, paths::KEYSTORE),
        &tools.keystore_password,
    )?;
    info!("rebuilt key and trust stores");

    edit_if_present(&paths::web_file(config, paths::WEB_SSL_DESCRIPTOR), |text| {
        replace_obfuscated_passwords(text, &tools.keystore_password)
    })?;
    edit_if_present(&paths::web_file(config, paths::WEB_DESCRIPTOR), |text| {
        set_confidential_port(text, https_port)
    })?;

    let secret_dir = &config.layout.secret_dir;
    if !secret_dir.is_dir() {
        io::create_private_dir(secret_dir)?;
    }
    credentials::install_private_copy(
        &ca_dir.join(paths::SERVER_KEY),
        &paths::secret_file(config, paths::SERVER_KEY),
    )?;
    credentials::ensure_secret_bytes(
        &paths::secret_file(config, paths::SYMMETRIC_KEY),
        SYMMETRIC_KEY_LEN,
    )?;
    credentials::ensure_secret_bytes(
        &paths::secret_file(config, paths::SYMMETRIC_IV),
        SYMMETRIC_IV_LEN,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn obfuscated_passwords_replaced() {
        let xml = r#"<Set name="Password">OBF:1vny1zlo1x8e</Set>
<Set name="KeyPassword">OBF:1u2u1wml1z7s</Set>"#;
        let out = replace_obfuscated_passwords(xml, "password");
        assert_eq!(
            out,
            r#"<Set name="Password">password</Set>
<Set name="KeyPassword">password</Set>"#
        );
    }

    #[test]
    fn replacement_is_literal() {
        let out = replace_obfuscated_passwords("OBF:abc", "pa$1ss");
        assert_eq!(out, "pa$1ss");
    }

    #[test]
    fn text_without_obfuscation_is_borrowed() {
        let out = replace_obfuscated_passwords("<Configure/>", "password");
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn confidential_port_rewritten() {
        let xml = r#"<Set name="confidentialPort">8443</Set>"#;
        assert_eq!(
            set_confidential_port(xml, 443),
            r#"<Set name="confidentialPort">443</Set>"#
        );
        assert_eq!(
            set_confidential_port(r#"<Set name="confidentialPort"></Set>"#, 9443),
            r#"<Set name="confidentialPort">9443</Set>"#
        );
    }

    #[test]
    fn edit_keeps_mode_and_skips_absent_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jetty.xml");
        edit_if_present(&path, |t| set_confidential_port(t, 443)).unwrap();
        assert!(!path.exists());

        std::fs::write(&path, r#"<Set name="confidentialPort">8443</Set>"#).unwrap();
        io::set_mode(&path, 0o644).unwrap();
        edit_if_present(&path, |t| set_confidential_port(t, 4443)).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            r#"<Set name="confidentialPort">4443</Set>"#
        );
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }
}
