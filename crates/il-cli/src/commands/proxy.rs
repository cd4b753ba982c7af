//! Local TCP forwarding to device-side ports

use anyhow::{Context, Result};
use il_core::lockdown::DEBUGSERVER_SERVICE;
use il_core::{serve_proxy, DeviceConnector, LinkContext};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::output::print_info;

/// Forward every connection on `local` to `port` on the selected device
pub async fn proxy_command(
    ctx: &LinkContext,
    local: &str,
    port: u16,
    shutdown: CancellationToken,
) -> Result<()> {
    let udid = ctx.select_device().await.context("No device selected")?;
    let listener = TcpListener::bind(local)
        .await
        .with_context(|| format!("Failed to listen on {}", local))?;
    print_info(&format!(
        "Forwarding {} -> {} port {}",
        listener.local_addr()?,
        udid,
        port
    ));

    let ctx = ctx.clone();
    serve_proxy(
        listener,
        move || {
            let ctx = ctx.clone();
            let udid = udid.clone();
            async move { ctx.connect(&udid, port).await }
        },
        shutdown,
    )
    .await?;
    Ok(())
}

/// Expose the device's debugserver on `local`
///
/// Each accepted connection starts the service again; the stream handed to
/// the bridge is already back in cleartext.
pub async fn debugserver_command(
    ctx: &LinkContext,
    local: &str,
    shutdown: CancellationToken,
) -> Result<()> {
    let udid = ctx.select_device().await.context("No device selected")?;
    let listener = TcpListener::bind(local)
        .await
        .with_context(|| format!("Failed to listen on {}", local))?;
    print_info(&format!(
        "debugserver for {} listening on {}",
        udid,
        listener.local_addr()?
    ));

    let ctx = ctx.clone();
    serve_proxy(
        listener,
        move || {
            let ctx = ctx.clone();
            let udid = udid.clone();
            async move {
                let client = ctx.open_service(&udid, DEBUGSERVER_SERVICE, false).await?;
                client.into_stream()
            }
        },
        shutdown,
    )
    .await?;
    Ok(())
}
