//! Module for the `patch` subcommand, which installs a hook manifest into an image.
//!
//! Installation is all or nothing: when any hook fails, every failure is printed, nothing is
//! written, and the command exits non-zero.

use super::{load_host, load_manifest, write_text, CliError};
use async_trait::async_trait;
use clap::Args;
use hookwright_core::asm::print_host;
use hookwright_patch::install_all;
use std::error::Error;
use std::path::PathBuf;
use tracing::info;

/// Arguments for the `patch` subcommand.
#[derive(Args)]
pub struct PatchArgs {
    /// Host image in text form.
    pub input: PathBuf,
    /// Hook manifest (JSON).
    #[arg(short, long)]
    manifest: PathBuf,
    /// Output file for the patched image (default: stdout).
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Path to emit the install report as JSON.
    #[arg(long, value_name = "PATH")]
    emit: Option<PathBuf>,
}

#[async_trait]
impl super::Command for PatchArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let PatchArgs {
            input,
            manifest,
            output,
            emit,
        } = self;

        let mut host = load_host(&input).await?;
        let manifest = load_manifest(&manifest).await?;
        let descriptors = manifest.resolve(&mut host.symbols)?;

        let report = match install_all(&mut host, &descriptors, &manifest.config) {
            Ok(report) => report,
            Err(errors) => {
                for err in errors.iter() {
                    eprintln!("{err}");
                }
                return Err(CliError::Install(errors).into());
            }
        };

        if let Some(path) = emit.as_ref() {
            write_text(path, &report.to_json()?).await?;
            info!("wrote install report to {}", path.display());
        }

        let patched = print_host(&host);
        match output.as_ref() {
            Some(path) => {
                write_text(path, &patched).await?;
                info!("wrote patched image to {}", path.display());
            }
            None => print!("{patched}"),
        }
        Ok(())
    }
}
