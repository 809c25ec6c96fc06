//! Module for the `check` subcommand, which verifies every method body of an image.

use super::{load_host, CliError};
use async_trait::async_trait;
use clap::Args;
use hookwright_core::verify::analyze;
use hookwright_core::DEFAULT_MAX_STACK;
use std::error::Error;
use std::path::PathBuf;

/// Arguments for the `check` subcommand.
#[derive(Args)]
pub struct CheckArgs {
    /// Host image in text form.
    pub input: PathBuf,
    /// Stack depth limit.
    #[arg(long, default_value_t = DEFAULT_MAX_STACK)]
    max_stack: u32,
}

#[async_trait]
impl super::Command for CheckArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let host = load_host(&self.input).await?;
        let mut failed = 0;
        for body in host.bodies() {
            let method = host.method_name(body.method);
            match analyze(body, &host.symbols, self.max_stack) {
                Ok(map) => {
                    let dead = map.unreachable();
                    if dead > 0 {
                        println!("ok    {method}  max depth {}, {dead} unreachable", map.max_depth);
                    } else {
                        println!("ok    {method}  max depth {}", map.max_depth);
                    }
                }
                Err(violation) => {
                    failed += 1;
                    println!("FAIL  {method}  {violation}");
                }
            }
        }
        if failed > 0 {
            return Err(CliError::Verification(failed).into());
        }
        Ok(())
    }
}
