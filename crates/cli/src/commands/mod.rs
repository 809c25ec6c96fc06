use async_trait::async_trait;
use clap::Subcommand;
use hookwright_core::asm::parse_host;
use hookwright_core::Host;
use hookwright_patch::{InstallErrors, Manifest};
use std::error::Error;
use std::path::Path;

pub mod check;
pub mod fingerprint;
pub mod locate;
pub mod patch;
pub mod show;

use thiserror::Error;

/// Errors reported by the subcommands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Input or output file error.
    #[error("file error on {path}: {source}")]
    File {
        path: String,
        source: std::io::Error,
    },
    /// The host image does not parse.
    #[error(transparent)]
    Host(#[from] hookwright_core::Error),
    /// The manifest does not parse or resolve.
    #[error(transparent)]
    Manifest(#[from] hookwright_patch::Error),
    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    /// No method with this identity in the image.
    #[error("unknown method `{0}`")]
    UnknownMethod(String),
    /// Some bodies failed verification.
    #[error("{0} method body(ies) failed verification")]
    Verification(usize),
    /// Some anchors did not resolve.
    #[error("{0} anchor(s) failed to resolve")]
    Unresolved(usize),
    /// Installation aborted.
    #[error(transparent)]
    Install(#[from] InstallErrors),
}

/// CLI subcommands for Hookwright.
#[derive(Subcommand)]
pub enum Cmd {
    /// Parse a host image and print it in canonical form.
    Show(show::ShowArgs),
    /// Verify the stack discipline of every method body.
    Check(check::CheckArgs),
    /// Print the fingerprint of every method body.
    Fingerprint(fingerprint::FingerprintArgs),
    /// Evaluate the anchors of a hook manifest without patching.
    Locate(locate::LocateArgs),
    /// Install a hook manifest and print the patched image.
    Patch(patch::PatchArgs),
}

/// Trait for executing CLI subcommands.
///
/// Implementors read a host image, and possibly a manifest, and print their result to
/// stdout. Diagnostics go through `tracing` to stderr.
#[async_trait]
pub trait Command {
    /// Executes the subcommand.
    async fn execute(self) -> Result<(), Box<dyn Error>>;
}

#[async_trait]
impl Command for Cmd {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        match self {
            Cmd::Show(args) => args.execute().await,
            Cmd::Check(args) => args.execute().await,
            Cmd::Fingerprint(args) => args.execute().await,
            Cmd::Locate(args) => args.execute().await,
            Cmd::Patch(args) => args.execute().await,
        }
    }
}

pub(crate) async fn read_text(path: &Path) -> Result<String, CliError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CliError::File {
            path: path.display().to_string(),
            source,
        })
}

pub(crate) async fn write_text(path: &Path, text: &str) -> Result<(), CliError> {
    tokio::fs::write(path, text)
        .await
        .map_err(|source| CliError::File {
            path: path.display().to_string(),
            source,
        })
}

/// Reads and parses a host image.
pub(crate) async fn load_host(path: &Path) -> Result<Host, CliError> {
    let text = read_text(path).await?;
    Ok(parse_host(&text)?)
}

pub(crate) async fn load_manifest(path: &Path) -> Result<Manifest, CliError> {
    let text = read_text(path).await?;
    Ok(Manifest::from_json(&text)?)
}
