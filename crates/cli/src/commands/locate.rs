//! Module for the `locate` subcommand, which resolves every anchor of a manifest against an
//! unpatched image and reports the matches.

use super::{load_host, load_manifest, CliError};
use async_trait::async_trait;
use clap::Args;
use hookwright_core::asm::render_instruction;
use std::error::Error;
use std::path::PathBuf;
use tracing::warn;

/// Arguments for the `locate` subcommand.
#[derive(Args)]
pub struct LocateArgs {
    /// Host image in text form.
    pub input: PathBuf,
    /// Hook manifest (JSON).
    #[arg(short, long)]
    manifest: PathBuf,
}

#[async_trait]
impl super::Command for LocateArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let mut host = load_host(&self.input).await?;
        let manifest = load_manifest(&self.manifest).await?;
        let descriptors = manifest.resolve(&mut host.symbols)?;

        let mut unresolved = 0;
        for descriptor in &descriptors {
            let method = host.method_name(descriptor.target);
            let Some(body) = host.body(descriptor.target) else {
                unresolved += 1;
                warn!("{}: {} has no body", descriptor.hook, method);
                continue;
            };
            match descriptor.anchor.resolve(&body.instructions) {
                Ok(found) => {
                    let ins = render_instruction(&body.instructions[found.index], &host.symbols);
                    println!(
                        "{}  {}  matches {:?} -> insert at {} before `{}`",
                        descriptor.hook, method, found.matches, found.index, ins
                    );
                }
                Err(err) => {
                    unresolved += 1;
                    println!("{}  {}  {}", descriptor.hook, method, err);
                }
            }
        }
        if unresolved > 0 {
            return Err(CliError::Unresolved(unresolved).into());
        }
        Ok(())
    }
}
