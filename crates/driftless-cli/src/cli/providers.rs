use console::style;
use driftless_common::settings::Settings;
use driftless_dns::default_backends;
use driftless_provider::default_providers;

use crate::error::DriftCliResult;

pub fn run(config: &Settings) -> DriftCliResult<()> {
    let providers = default_providers(config)?;
    let backends = default_backends()?;

    println!("{}", style("providers").bold());
    for name in providers.list() {
        println!("  {name}");
    }
    println!("{}", style("dns backends").bold());
    for name in backends.list() {
        println!("  {name}");
    }
    Ok(())
}
