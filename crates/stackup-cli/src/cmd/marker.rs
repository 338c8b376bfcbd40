use anyhow::Context;
use stackup_core::config::StackConfig;
use stackup_core::pipeline::{MarkerOptions, Pipeline};

pub fn run(config: StackConfig, opts: &MarkerOptions, no_handoff: bool) -> anyhow::Result<()> {
    let handoff = Pipeline::new(config)
        .run_marker(opts)
        .context("marker provisioning failed")?;
    super::hand_off(handoff, no_handoff)
}
