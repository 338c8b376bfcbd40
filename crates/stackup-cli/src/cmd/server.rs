use anyhow::Context;
use stackup_core::config::StackConfig;
use stackup_core::pipeline::{Pipeline, ServerOptions};

pub fn run(config: StackConfig, opts: &ServerOptions, no_handoff: bool) -> anyhow::Result<()> {
    let handoff = Pipeline::new(config)
        .run_server(opts)
        .context("server provisioning failed")?;
    super::hand_off(handoff, no_handoff)
}
