//! htun-ctl — command-line client for the htun tunnel.

mod cmd;

use anyhow::{Context, Result};

use cmd::connect::{ConnectArgs, cmd_connect};
use cmd::keys::{cmd_keygen, cmd_pubkey};

fn print_usage() {
    println!("Usage: htun-ctl <command>");
    println!();
    println!("Commands:");
    println!("  keygen                              Generate a static key pair");
    println!("  pubkey <private-hex>                Print the public key for a private key");
    println!("  connect <url> <private-hex>         Handshake and exchange one batch");
    println!("      --ping <ipv4>                   Include an ICMP echo request to <ipv4>");
    println!("      --server-key <hex>              Refuse a server with a different key");
    println!();
    println!("Example:");
    println!("  htun-ctl connect http://127.0.0.1:8443/vpn $KEY --ping 8.8.8.8");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse options
    let mut ping = None;
    let mut server_key = None;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--ping" => {
                i += 1;
                ping = Some(
                    args.get(i)
                        .context("--ping requires an address")?
                        .parse()
                        .context("--ping must be an IPv4 address")?,
                );
            }
            "--server-key" => {
                i += 1;
                server_key = Some(args.get(i).context("--server-key requires a value")?.as_str());
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["keygen"]                      => cmd_keygen(),
        ["pubkey", private]             => cmd_pubkey(*private),
        ["connect", url, private]       => {
            cmd_connect(ConnectArgs { url: *url, private_hex: *private, ping, server_key }).await
        }
        ["help"] | ["--help"] | ["-h"] | [] => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
