//! Local and remote peripheral commands.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::http::{base_url, get_json, post_json, post_json_body};

#[derive(Deserialize)]
struct Descriptor {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    methods: Vec<String>,
}

#[derive(Deserialize)]
struct LocalResponse {
    capabilities: Vec<Descriptor>,
}

#[derive(Deserialize)]
struct RemoteResponse {
    peripherals: Vec<RemoteInfo>,
}

#[derive(Deserialize)]
struct RemoteInfo {
    key: String,
    label: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    methods: Vec<String>,
    health: Health,
}

#[derive(Deserialize)]
struct Health {
    connected: bool,
    consecutive_failures: u32,
}

#[derive(Serialize)]
struct CallRequest<'a> {
    key: &'a str,
    method: &'a str,
    args: Vec<Value>,
}

#[derive(Deserialize)]
struct CallResponse {
    results: Option<Vec<Value>>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct DiscoverResponse {
    first: Option<u32>,
    remote: usize,
}

#[derive(Deserialize)]
struct RescanResponse {
    changed: bool,
    exposed: usize,
}

pub async fn cmd_local(port: u16) -> Result<()> {
    let resp: LocalResponse = get_json(&format!("{}/local", base_url(port))).await?;
    if resp.capabilities.is_empty() {
        println!("Nothing shared from this node.");
        return Ok(());
    }
    for d in &resp.capabilities {
        println!("  {:<16} {:<18} {}", d.name, d.kind, d.methods.join(", "));
    }
    Ok(())
}

pub async fn cmd_remote(port: u16) -> Result<()> {
    let resp: RemoteResponse = get_json(&format!("{}/remote", base_url(port))).await?;
    if resp.peripherals.is_empty() {
        println!("No remote peripherals known yet. Try `perimesh-ctl discover`.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Remote Peripherals ({})", resp.peripherals.len());
    println!("═══════════════════════════════════════");
    for p in &resp.peripherals {
        let state = if p.health.connected {
            "connected".to_string()
        } else {
            format!("disconnected ({} failures)", p.health.consecutive_failures)
        };
        println!("  ┌─ {}", p.key);
        println!("  │  owner   : {}", p.label.as_deref().unwrap_or("?"));
        println!("  │  type    : {}", p.kind);
        println!("  │  methods : {}", p.methods.join(", "));
        println!("  └─ state   : {}", state);
    }
    Ok(())
}

pub async fn cmd_call(port: u16, key: &str, method: &str, args: Option<&str>) -> Result<()> {
    let args = parse_args(args)?;
    let body = CallRequest { key, method, args };
    let resp: CallResponse = post_json_body(&format!("{}/call", base_url(port)), &body).await?;
    match (resp.results, resp.error) {
        (Some(results), _) => {
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        (None, Some(error)) => anyhow::bail!("{}", error),
        (None, None) => anyhow::bail!("empty response"),
    }
}

pub async fn cmd_discover(port: u16) -> Result<()> {
    let resp: DiscoverResponse = post_json(&format!("{}/discover", base_url(port))).await?;
    match resp.first {
        Some(node) => println!("First answer from node {}; {} remote peripherals known.", node, resp.remote),
        None => println!("No node answered; {} remote peripherals known.", resp.remote),
    }
    Ok(())
}

pub async fn cmd_rescan(port: u16) -> Result<()> {
    let resp: RescanResponse = post_json(&format!("{}/rescan", base_url(port))).await?;
    let note = if resp.changed { "changed, announced" } else { "unchanged" };
    println!("{} peripherals shared ({}).", resp.exposed, note);
    Ok(())
}

/// Call arguments: a JSON array, or a single JSON value taken as one argument.
fn parse_args(raw: Option<&str>) -> Result<Vec<Value>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let value: Value = serde_json::from_str(raw).context("arguments must be JSON")?;
    Ok(match value {
        Value::Array(items) => items,
        other => vec![other],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn args_accept_array_or_scalar() {
        assert!(parse_args(None).unwrap().is_empty());
        assert_eq!(parse_args(Some("[1, \"a\"]")).unwrap(), vec![json!(1), json!("a")]);
        assert_eq!(parse_args(Some("42")).unwrap(), vec![json!(42)]);
        assert!(parse_args(Some("{not json")).is_err());
    }
}
