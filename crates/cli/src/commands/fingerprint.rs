//! Module for the `fingerprint` subcommand.
//!
//! Fingerprints are what a manifest pins in its `fingerprint` field; printing them for an
//! unpatched image is the first step of writing one.

use super::load_host;
use async_trait::async_trait;
use clap::Args;
use hookwright_core::Fingerprint;
use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;

/// Arguments for the `fingerprint` subcommand.
#[derive(Args)]
pub struct FingerprintArgs {
    /// Host image in text form.
    pub input: PathBuf,
    /// Print a JSON object keyed by method identity.
    #[arg(long)]
    json: bool,
}

#[async_trait]
impl super::Command for FingerprintArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let host = load_host(&self.input).await?;
        let prints: BTreeMap<String, Fingerprint> = host
            .bodies()
            .map(|body| (host.method_name(body.method), Fingerprint::of(body, &host.symbols)))
            .collect();
        if self.json {
            println!("{}", serde_json::to_string_pretty(&prints)?);
        } else {
            for (method, fingerprint) in &prints {
                println!("{fingerprint}  {method}");
            }
        }
        Ok(())
    }
}
