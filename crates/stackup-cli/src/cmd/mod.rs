pub mod cache;
pub mod inichange;
pub mod marker;
pub mod server;
pub mod shell;

use stackup_core::pipeline::Handoff;

/// Exec the handoff command, or just report it when `dry` is set.
pub fn hand_off(handoff: Handoff, dry: bool) -> anyhow::Result<()> {
    if dry {
        println!("{}", handoff.command());
        return Ok(());
    }
    Err(anyhow::Error::new(handoff.exec()).context(format!("failed to exec {}", handoff.command())))
}
