//! Key management commands.

use anyhow::{Context, Result};

use htun_core::crypto::{Keypair, key_fingerprint};

pub fn cmd_keygen() -> Result<()> {
    let keypair = Keypair::generate();
    println!("private_key = \"{}\"", keypair.private_hex().as_str());
    println!("public_key  = \"{}\"", hex::encode(keypair.public));
    Ok(())
}

pub fn cmd_pubkey(private_hex: &str) -> Result<()> {
    let keypair = Keypair::from_hex(private_hex).context("private key must be 64 hex characters")?;
    println!("{}", hex::encode(keypair.public));
    eprintln!("fingerprint {}", key_fingerprint(&keypair.public));
    Ok(())
}
