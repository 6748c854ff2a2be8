use anyhow::{Context, Result};

use overlayctl::config::load_config;
use overlayctl::BootContext;

mod workflows;

fn usage() -> &'static str {
    "Usage:\n  overlayctl status [--json]\n  overlayctl build <source.dts>... [-o <output>]\n  overlayctl validate [-c <base.dtb>] <overlay.dts|overlay.dtbo>...\n  overlayctl enable <overlay.dtbo>...\n  overlayctl disable <overlay.dtbo>... | all\n  overlayctl activate [-c <base.dtb>] <overlay.dts|overlay.dtbo>...\n  overlayctl print [<file.dtb|file.dtbo>]\n\nConfiguration is read from $OVERLAYCTL_CONFIG or /etc/overlayctl.toml."
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = workflows::parse_invocation(&args)?;
    if invocation.command == workflows::Command::Help {
        println!("{}", usage());
        return Ok(());
    }

    let config = load_config().context("loading overlayctl configuration")?;
    let ctx = BootContext::from_config(&config);
    log::debug!("boot context: {ctx:?}");

    workflows::dispatch(&invocation, &ctx)
}
