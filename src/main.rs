//! sfctl - cluster control for clustered block storage
//!
//! This is the entry point for the `sfctl` command.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

use sfctl::action::{install_panic_hook, ActionContext, ActionRunner};
use sfctl::cli::Cli;
use sfctl::config::Config;
use sfctl::logging::{self, LogSettings};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let mut config = Config::load(cli.config.as_ref())
        .with_context(|| format!("Could not load configuration for {}", cli.command.name()))?;
    cli.apply_to(&mut config);

    logging::init(&LogSettings {
        debug: cli.debug,
        color: config.logging.color,
        syslog: config.logging.syslog,
        ident: config.logging.ident.clone(),
    });
    let format = cli.output_format();
    if format.is_machine_readable() {
        logging::set_silence(true);
    }
    install_panic_hook();
    debug!("Starting {}", cli.command.name());

    let ctx = ActionContext::new(Arc::new(config), format);
    let runner = ActionRunner::new().with_result_address(cli.result_address.clone());
    let code = cli.command.run(&runner, &ctx).await;
    std::process::exit(code);
}
