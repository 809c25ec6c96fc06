//! Module for the `show` subcommand, which re-prints a host image canonically.

use super::{load_host, CliError};
use async_trait::async_trait;
use clap::Args;
use hookwright_core::asm::{print_body, print_host};
use std::error::Error;
use std::path::PathBuf;

/// Arguments for the `show` subcommand.
#[derive(Args)]
pub struct ShowArgs {
    /// Host image in text form.
    pub input: PathBuf,
    /// Print only this method, e.g. `Game.Door::Open(int)`.
    #[arg(short, long)]
    method: Option<String>,
}

#[async_trait]
impl super::Command for ShowArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let host = load_host(&self.input).await?;
        match self.method {
            Some(method) => {
                let body = host
                    .body_named(&method)
                    .ok_or(CliError::UnknownMethod(method))?;
                print!("{}", print_body(body, &host.symbols));
            }
            None => print!("{}", print_host(&host)),
        }
        Ok(())
    }
}
