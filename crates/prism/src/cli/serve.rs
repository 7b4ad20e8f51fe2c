//! The `prism serve` command.

use clap::Args;
use prism_core::{Config, Prism};
use std::sync::Arc;

use crate::server;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on; `server.bind` from config if omitted
    #[arg(short, long, env = "PRISM_BIND")]
    pub bind: Option<String>,
}

pub async fn execute(args: ServeArgs, config: Config) -> anyhow::Result<()> {
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let prism = Arc::new(Prism::new(config)?);
    server::run(prism, &bind).await
}
