//! Keys, certificates, key/trust stores and other secret files.
//!
//! Source-of-truth material (root CA, leaf certificate, symmetric key, bootstrap
//! passwords) is created once; the file or directory existing is the marker.
//! Directory-shaped material is built in a sibling `.tmp` staging directory
//! and renamed into place, so a crash mid-build never leaves a directory that
//! looks finished. Key/trust stores are derived and rebuilt on every run.

use std::path::Path;
use std::process::Command;

use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use tracing::{info, warn};

use crate::config::{CommandLine, ToolsConfig};
use crate::error::Result;
use crate::io;
use crate::paths;
use crate::runner::run_checked;

pub const CA_SUBJECT: &str = "/CN=abacus-cert";
pub const SERVER_SUBJECT: &str = "/CN=localhost";
pub const DEFAULT_HOSTNAME: &str = "localhost";

const PASSWORD_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

// ---------------------------------------------------------------------------
// Toolchain
// ---------------------------------------------------------------------------

/// The external crypto toolchain (openssl + keytool).
#[derive(Debug, Clone)]
pub struct Toolchain {
    openssl: CommandLine,
    keytool: CommandLine,
    key_bits: u32,
    /// Validity of newly issued certificates.
    days: u32,
}

impl Toolchain {
    pub fn new(tools: &ToolsConfig, days: u32) -> Self {
        Self {
            openssl: tools.openssl.clone(),
            keytool: tools.keytool.clone(),
            key_bits: tools.key_bits,
            days,
        }
    }

    fn openssl(&self) -> Result<Command> {
        self.openssl.to_command()
    }

    fn keytool(&self) -> Result<Command> {
        self.keytool.to_command()
    }

    fn create_key(&self, out: &Path) -> Result<()> {
        let mut cmd = self.openssl()?;
        cmd.arg("genrsa")
            .arg("-out")
            .arg(out)
            .arg(self.key_bits.to_string());
        run_checked(&mut cmd, "openssl genrsa")?;
        io::set_mode(out, io::PRIVATE_FILE_MODE)
    }

    fn create_self_cert(&self, subject: &str, key: &Path, out: &Path) -> Result<()> {
        let mut cmd = self.openssl()?;
        cmd.args(["req", "-new", "-x509", "-key"])
            .arg(key)
            .args(["-days", &self.days.to_string(), "-subj", subject, "-out"])
            .arg(out);
        run_checked(&mut cmd, "openssl req -x509")
    }

    fn create_csr(&self, subject: &str, key: &Path, out: &Path) -> Result<()> {
        let mut cmd = self.openssl()?;
        cmd.args(["req", "-new", "-key"])
            .arg(key)
            .args(["-subj", subject, "-out"])
            .arg(out);
        run_checked(&mut cmd, "openssl req")
    }

    fn sign_cert(
        &self,
        csr: &Path,
        ca_key: &Path,
        ca_cert: &Path,
        ca_serial: &Path,
        out: &Path,
    ) -> Result<()> {
        let mut cmd = self.openssl()?;
        cmd.args(["x509", "-req", "-in"])
            .arg(csr)
            .args(["-CAcreateserial", "-days", &self.days.to_string(), "-CA"])
            .arg(ca_cert)
            .arg("-CAkey")
            .arg(ca_key)
            .arg("-CAserial")
            .arg(ca_serial)
            .arg("-out")
            .arg(out);
        run_checked(&mut cmd, "openssl x509")
    }

    /// Create the root CA and the server certificate it signs, unless `dir`
    /// already exists. Returns true if the material was generated.
    pub fn ensure_root_ca(&self, dir: &Path) -> Result<bool> {
        build_atomically(dir, |tmp| {
            let ca_key = tmp.join("ca.key");
            let ca_cert = tmp.join(paths::CA_CERT);
            let ca_serial = tmp.join("ca.srl");
            let server_key = tmp.join(paths::SERVER_KEY);
            let server_csr = tmp.join("server.csr");
            let server_cert = tmp.join("server.crt");

            self.create_key(&ca_key)?;
            self.create_key(&server_key)?;
            self.create_self_cert(CA_SUBJECT, &ca_key, &ca_cert)?;
            self.create_csr(SERVER_SUBJECT, &server_key, &server_csr)?;
            self.sign_cert(&server_csr, &ca_key, &ca_cert, &ca_serial, &server_cert)
        })
    }

    /// Create a self-signed front-end certificate for `hostname`, unless `dir`
    /// already exists. Returns true if the material was generated.
    pub fn ensure_leaf_cert(&self, dir: &Path, hostname: Option<&str>) -> Result<bool> {
        if dir.is_dir() {
            return Ok(false);
        }
        let hostname = match hostname {
            Some(h) => h,
            None => {
                warn!(
                    dir = %dir.display(),
                    "no front-end certificate and no hostname given; \
                     the generated certificate will be for {DEFAULT_HOSTNAME}"
                );
                DEFAULT_HOSTNAME
            }
        };
        build_atomically(dir, |tmp| {
            let key = tmp.join(paths::LEAF_KEY);
            let cert = tmp.join(paths::LEAF_CERT);
            self.create_key(&key)?;
            self.create_self_cert(&format!("/CN={hostname}"), &key, &cert)
        })
    }

    /// Rebuild a trust store holding `cert` under `alias`.
    pub fn build_truststore(
        &self,
        cert: &Path,
        truststore: &Path,
        alias: &str,
        password: &str,
    ) -> Result<()> {
        io::remove_file_if_exists(truststore)?;
        let mut cmd = self.keytool()?;
        cmd.args(["-importcert", "-alias", alias, "-file"])
            .arg(cert)
            .arg("-keystore")
            .arg(truststore)
            .args(["-storepass", password, "-noprompt"]);
        run_checked(&mut cmd, "keytool -importcert")
    }

    /// Rebuild a key store from `cert` + `key`.
    ///
    /// The PKCS#12 intermediate is an owner-only tempfile next to the key
    /// store, deleted when this function returns, on success or failure.
    pub fn build_keystore(
        &self,
        cert: &Path,
        key: &Path,
        keystore: &Path,
        password: &str,
    ) -> Result<()> {
        io::remove_file_if_exists(keystore)?;
        let dir = keystore.parent().unwrap_or(Path::new("."));
        io::ensure_dir(dir)?;
        let pkcs12 = tempfile::Builder::new()
            .prefix(".keystore-")
            .suffix(".pkcs12")
            .tempfile_in(dir)?;
        let passout = format!("pass:{password}");

        let mut export = self.openssl()?;
        export
            .args(["pkcs12", "-inkey"])
            .arg(key)
            .arg("-in")
            .arg(cert)
            .args(["-export", "-out"])
            .arg(pkcs12.path())
            .args(["-passout", &passout]);
        run_checked(&mut export, "openssl pkcs12")?;

        let mut import = self.keytool()?;
        import
            .arg("-importkeystore")
            .arg("-srckeystore")
            .arg(pkcs12.path())
            .args(["-srcstoretype", "PKCS12", "-destkeystore"])
            .arg(keystore)
            .args(["-srcstorepass", password, "-storepass", password, "-noprompt"]);
        run_checked(&mut import, "keytool -importkeystore")
    }
}

/// Build `dir` through its staging sibling and rename it into place.
///
/// A leftover staging directory from an interrupted run is discarded first.
fn build_atomically<F>(dir: &Path, build: F) -> Result<bool>
where
    F: FnOnce(&Path) -> Result<()>,
{
    if dir.is_dir() {
        return Ok(false);
    }
    let staging = paths::staging_dir(dir);
    if staging.exists() {
        warn!(staging = %staging.display(), "removing incomplete staging directory");
        std::fs::remove_dir_all(&staging)?;
    }
    io::create_private_dir(&staging)?;

    if let Err(e) = build(&staging) {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }
    std::fs::rename(&staging, dir)?;
    info!(dir = %dir.display(), "generated credential material");
    Ok(true)
}

// ---------------------------------------------------------------------------
// Single-file secrets
// ---------------------------------------------------------------------------

/// Write `len` random bytes to `path` unless it exists. Returns true if written.
pub fn ensure_secret_bytes(path: &Path, len: usize) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    io::write_private(path, &buf)?;
    info!(path = %path.display(), len, "generated secret");
    Ok(true)
}

pub fn generate_password(len: usize) -> String {
    (0..len)
        .map(|_| PASSWORD_ALPHABET[OsRng.gen_range(0..PASSWORD_ALPHABET.len())] as char)
        .collect()
}

/// Write a random letters-only password to `path` unless it exists.
pub fn ensure_password_file(path: &Path, len: usize) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    io::write_private(path, generate_password(len).as_bytes())?;
    info!(path = %path.display(), "generated password");
    Ok(true)
}

/// First line of a password file.
pub fn read_password(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)?;
    Ok(content.lines().next().unwrap_or("").to_string())
}

/// Copy a private key to `dest` with owner-only permissions.
pub fn install_private_copy(src: &Path, dest: &Path) -> Result<()> {
    let data = std::fs::read(src)?;
    io::write_private(dest, &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{stub_script, StubLog};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// openssl/keytool stand-in: writes a unique body to whatever `-out`,
    /// `-keystore` or `-destkeystore` names, and logs its arguments.
    fn stub_tools(dir: &TempDir, fail_on: Option<&str>) -> (ToolsConfig, StubLog) {
        let log = StubLog::new(dir.path().join("tools.log"));
        let fail = fail_on
            .map(|w| format!("case \"$*\" in *\"{w}\"*) echo refusing >&2; exit 1;; esac\n"))
            .unwrap_or_default();
        let body = format!(
            "{fail}echo \"$*\" >> '{log}'\n\
             prev=''\n\
             for a in \"$@\"; do\n\
               case \"$prev\" in -out|-keystore|-destkeystore) echo \"material $$ $*\" > \"$a\";; esac\n\
               prev=\"$a\"\n\
             done\n",
            log = log.path().display()
        );
        let script = stub_script(dir.path(), "crypto-stub", &body);
        let cmd = CommandLine::new(["/bin/sh".to_string(), script.display().to_string()]);
        let tools = ToolsConfig {
            openssl: cmd.clone(),
            keytool: cmd,
            ..ToolsConfig::default()
        };
        (tools, log)
    }

    fn mode_of(path: &Path) -> u32 {
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn root_ca_is_generated_once() {
        let dir = TempDir::new().unwrap();
        let (tools, _log) = stub_tools(&dir, None);
        let chain = Toolchain::new(&tools, 3650);
        let ca_dir = dir.path().join("conf/abacus-certs");

        assert!(chain.ensure_root_ca(&ca_dir).unwrap());
        for f in ["ca.key", "cacert.crt", "server.key", "server.csr", "server.crt"] {
            assert!(ca_dir.join(f).is_file(), "missing {f}");
        }
        assert_eq!(mode_of(&ca_dir.join("ca.key")), 0o600);
        assert!(!paths::staging_dir(&ca_dir).exists());

        let before: Vec<Vec<u8>> = ["cacert.crt", "server.crt", "server.key"]
            .iter()
            .map(|f| std::fs::read(ca_dir.join(f)).unwrap())
            .collect();
        assert!(!chain.ensure_root_ca(&ca_dir).unwrap());
        let after: Vec<Vec<u8>> = ["cacert.crt", "server.crt", "server.key"]
            .iter()
            .map(|f| std::fs::read(ca_dir.join(f)).unwrap())
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn root_ca_uses_configured_validity() {
        let dir = TempDir::new().unwrap();
        let (tools, log) = stub_tools(&dir, None);
        Toolchain::new(&tools, 30)
            .ensure_root_ca(&dir.path().join("ca"))
            .unwrap();
        let lines = log.lines();
        assert!(lines.iter().any(|l| l.contains("-x509") && l.contains("-days 30")));
        assert!(lines.iter().any(|l| l.starts_with("genrsa") && l.ends_with("4096")));
        assert!(lines.iter().any(|l| l.contains("-subj /CN=abacus-cert")));
    }

    #[test]
    fn failed_build_leaves_no_directory() {
        let dir = TempDir::new().unwrap();
        let (tools, _log) = stub_tools(&dir, Some("x509 -req"));
        let chain = Toolchain::new(&tools, 3650);
        let ca_dir = dir.path().join("abacus-certs");

        assert!(chain.ensure_root_ca(&ca_dir).is_err());
        assert!(!ca_dir.exists());
        assert!(!paths::staging_dir(&ca_dir).exists());
    }

    #[test]
    fn stale_staging_directory_is_replaced() {
        let dir = TempDir::new().unwrap();
        let (tools, _log) = stub_tools(&dir, None);
        let ca_dir = dir.path().join("abacus-certs");
        let staging = paths::staging_dir(&ca_dir);
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("half-written.key"), b"junk").unwrap();

        Toolchain::new(&tools, 3650).ensure_root_ca(&ca_dir).unwrap();
        assert!(!ca_dir.join("half-written.key").exists());
        assert!(!staging.exists());
    }

    #[test]
    fn leaf_cert_defaults_to_localhost() {
        let dir = TempDir::new().unwrap();
        let (tools, log) = stub_tools(&dir, None);
        let leaf = dir.path().join("jetty-certs");
        assert!(Toolchain::new(&tools, 3650)
            .ensure_leaf_cert(&leaf, None)
            .unwrap());
        assert!(leaf.join("jetty.key").is_file());
        assert!(leaf.join("jetty.crt").is_file());
        assert!(log.lines().iter().any(|l| l.contains("-subj /CN=localhost")));
    }

    #[test]
    fn leaf_cert_uses_hostname_and_is_not_regenerated() {
        let dir = TempDir::new().unwrap();
        let (tools, log) = stub_tools(&dir, None);
        let chain = Toolchain::new(&tools, 3650);
        let leaf = dir.path().join("jetty-certs");
        chain.ensure_leaf_cert(&leaf, Some("judge.example.org")).unwrap();
        assert!(log
            .lines()
            .iter()
            .any(|l| l.contains("-subj /CN=judge.example.org")));
        let calls = log.lines().len();
        assert!(!chain.ensure_leaf_cert(&leaf, Some("other.example.org")).unwrap());
        assert_eq!(log.lines().len(), calls);
    }

    #[test]
    fn keystore_is_rebuilt_and_intermediate_removed() {
        let dir = TempDir::new().unwrap();
        let (tools, _log) = stub_tools(&dir, None);
        let chain = Toolchain::new(&tools, 3650);
        let web = dir.path().join("web");
        std::fs::create_dir_all(&web).unwrap();
        let keystore = web.join("keystore");
        std::fs::write(&keystore, b"stale").unwrap();

        chain
            .build_keystore(Path::new("/c.crt"), Path::new("/c.key"), &keystore, "pw")
            .unwrap();
        assert_ne!(std::fs::read(&keystore).unwrap(), b"stale");
        let leftovers: Vec<_> = std::fs::read_dir(&web)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|n| n.to_string_lossy().ends_with(".pkcs12"))
            .collect();
        assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
    }

    #[test]
    fn keystore_failure_still_removes_intermediate() {
        let dir = TempDir::new().unwrap();
        let (tools, _log) = stub_tools(&dir, Some("importkeystore"));
        let chain = Toolchain::new(&tools, 3650);
        let web = dir.path().join("web");
        let keystore = web.join("keystore");

        assert!(chain
            .build_keystore(Path::new("/c.crt"), Path::new("/c.key"), &keystore, "pw")
            .is_err());
        let entries: Vec<_> = std::fs::read_dir(&web).unwrap().collect();
        assert!(entries.is_empty());
    }

    #[test]
    fn truststore_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let (tools, log) = stub_tools(&dir, None);
        let trust = dir.path().join("abacus_keystore");
        std::fs::write(&trust, b"old").unwrap();
        Toolchain::new(&tools, 3650)
            .build_truststore(Path::new("/ca.crt"), &trust, "abacuscert", "pw")
            .unwrap();
        assert_ne!(std::fs::read(&trust).unwrap(), b"old");
        assert!(log
            .lines()
            .iter()
            .any(|l| l.contains("-importcert -alias abacuscert")));
    }

    #[test]
    fn secret_bytes_written_once_and_random() {
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("rijndael.key");
        assert!(ensure_secret_bytes(&key, 32).unwrap());
        let first = std::fs::read(&key).unwrap();
        assert_eq!(first.len(), 32);
        assert_ne!(first, vec![0u8; 32]);
        assert_eq!(mode_of(&key), 0o600);

        assert!(!ensure_secret_bytes(&key, 32).unwrap());
        assert_eq!(std::fs::read(&key).unwrap(), first);
    }

    #[test]
    fn password_file_is_letters_and_stable() {
        let dir = TempDir::new().unwrap();
        let pw = dir.path().join("standings.pw");
        assert!(ensure_password_file(&pw, 16).unwrap());
        let first = read_password(&pw).unwrap();
        assert_eq!(first.len(), 16);
        assert!(first.chars().all(|c| c.is_ascii_alphabetic()));
        assert!(!ensure_password_file(&pw, 16).unwrap());
        assert_eq!(read_password(&pw).unwrap(), first);
    }

    #[test]
    fn private_copy_is_owner_only() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("server.key");
        std::fs::write(&src, b"KEY").unwrap();
        io::set_mode(&src, 0o644).unwrap();
        let dest = dir.path().join("etc/server.key");
        install_private_copy(&src, &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"KEY");
        assert_eq!(mode_of(&dest), 0o600);
    }
}
