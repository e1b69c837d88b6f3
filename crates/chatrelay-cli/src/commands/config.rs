use anyhow::Result;
use chatrelay_core::RelayConfig;

const REDACTED: &str = "********";

pub fn run(config: &RelayConfig) -> Result<()> {
    let mut shown = config.clone();
    if shown.model.api_key.is_some() {
        shown.model.api_key = Some(REDACTED.to_string());
    }
    print!("{}", shown.to_toml()?);
    Ok(())
}
