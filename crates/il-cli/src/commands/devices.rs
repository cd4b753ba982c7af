//! Devices command implementation

use anyhow::{Context, Result};
use il_core::LinkContext;

use crate::output::{format_devices, print_json};

/// List attached devices
pub async fn devices_command(ctx: &LinkContext, json: bool) -> Result<()> {
    let mux = ctx
        .mux()
        .await
        .with_context(|| format!("Failed to connect to usbmuxd at {}", ctx.config().mux_address))?;
    let devices = mux.list_devices().await.context("Failed to list devices")?;
    mux.close();

    if json {
        print_json(&devices)?;
    } else {
        println!("{}", format_devices(&devices));
    }
    Ok(())
}
