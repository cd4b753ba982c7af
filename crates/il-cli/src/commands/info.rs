//! Lockdown query commands

use anyhow::{Context, Result};
use il_core::LinkContext;

use crate::output::{format_value, print_json, print_success, value_to_json};

/// Print one value, one domain, or the whole default domain
pub async fn info_command(
    ctx: &LinkContext,
    key: Option<&str>,
    domain: Option<&str>,
    json: bool,
) -> Result<()> {
    let udid = ctx.select_device().await.context("No device selected")?;
    let mut lockdown = ctx
        .lockdown(&udid)
        .await
        .with_context(|| format!("Failed to open lockdown session with {}", udid))?;

    let value = match (key, domain) {
        (None, None) => lockdown.get_values().await?.raw,
        (key, domain) => lockdown.get_domain_value(domain, key).await?,
    };
    lockdown.close().await?;

    if json {
        print_json(&value_to_json(&value))?;
    } else {
        println!("{}", format_value(&value));
    }
    Ok(())
}

/// Reboot the selected device into recovery mode
pub async fn recovery_command(ctx: &LinkContext) -> Result<()> {
    let udid = ctx.select_device().await.context("No device selected")?;
    let mut lockdown = ctx
        .lockdown(&udid)
        .await
        .with_context(|| format!("Failed to open lockdown session with {}", udid))?;

    lockdown
        .enter_recovery()
        .await
        .context("Device refused to enter recovery mode")?;
    lockdown.close().await?;

    print_success(&format!("{} is entering recovery mode", udid));
    Ok(())
}
