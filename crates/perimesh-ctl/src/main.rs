//! perimesh-ctl: command-line interface for the perimesh daemon.

mod cmd;

use anyhow::{Context, Result};

use cmd::{peripherals, status};

const DEFAULT_PORT: u16 = 9101;

fn print_usage() {
    println!("Usage: perimesh-ctl [--port N] <command>");
    println!();
    println!("Commands:");
    println!("  status                          Node summary");
    println!("  local                           Peripherals this node shares");
    println!("  remote                          Peripherals known on other nodes");
    println!("  call <key> <method> [json-args] Invoke a remote method (key: name or owner::name)");
    println!("  discover                        Ask every node for its peripherals");
    println!("  rescan                          Rescan local peripherals, announce if changed");
    println!("  shutdown                        Stop the daemon");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => status::cmd_status(port).await,
        ["local"] => peripherals::cmd_local(port).await,
        ["remote"] => peripherals::cmd_remote(port).await,
        ["call", key, method] => peripherals::cmd_call(port, key, method, None).await,
        ["call", key, method, json] => peripherals::cmd_call(port, key, method, Some(*json)).await,
        ["discover"] => peripherals::cmd_discover(port).await,
        ["rescan"] => peripherals::cmd_rescan(port).await,
        ["shutdown"] => status::cmd_shutdown(port).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
