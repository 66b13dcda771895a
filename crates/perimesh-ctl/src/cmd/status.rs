//! Daemon status and shutdown commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

#[derive(Deserialize)]
struct StatusResponse {
    node: u32,
    label: String,
    exposed: usize,
    remote: usize,
    pending: usize,
}

#[derive(Deserialize)]
struct ShutdownResponse {
    message: String,
}

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  perimesh node {} ({})", resp.node, resp.label);
    println!("═══════════════════════════════════════");
    println!("  Shared locally   : {}", resp.exposed);
    println!("  Remote known     : {}", resp.remote);
    println!("  Calls in flight  : {}", resp.pending);
    Ok(())
}

pub async fn cmd_shutdown(port: u16) -> Result<()> {
    let resp: ShutdownResponse = post_json(&format!("{}/daemon/shutdown", base_url(port))).await?;
    println!("{}", resp.message);
    Ok(())
}
