//! Get Signer Addresses
//!
//! Reads the networks document and prints the admin and DVN signer addresses
//! derived from the configured keys, per network. No node is contacted.
//!
//! ## Usage
//!
//! ```bash
//! NETWORKS_CONFIG_PATH=networks.config.json cargo run --bin get_signer_addresses
//! ```

use anyhow::{Context, Result};

use lz_relayer::abi::to_hex;
use lz_relayer::config::Config;
use lz_relayer::crypto::Wallet;

fn main() -> Result<()> {
    let config = Config::load()?;

    for (name, network) in &config.networks {
        let admin = Wallet::from_hex(&network.private_key)
            .with_context(|| format!("Invalid admin key for {}", name))?;

        println!("[{}]", name);
        println!("  admin:    {}", admin.address_hex());
        println!("  endpoint: {}", to_hex(&network.endpoint));
        println!("  uln302:   {}", to_hex(&network.receive_uln302));
        if let Some(dvn) = &network.dvn {
            println!("  dvn:      {}", to_hex(dvn));
        }
        for (index, key) in network.signer_keys.iter().enumerate() {
            let signer = Wallet::from_hex(key)
                .with_context(|| format!("Invalid signer key {} for {}", index, name))?;
            println!("  signer {}: {}", index, signer.address_hex());
        }
        println!();
    }

    Ok(())
}
