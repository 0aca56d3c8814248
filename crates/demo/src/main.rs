mod cli;
mod scenario;

use clap::Parser;
use cli::{Cli, Command};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	tandem_client::logging::init(cli.verbose);

	match cli.command {
		Command::Scenario { which } => {
			tracing::debug!(?which, "demo.start");
			scenario::run(which).await?;
		}
	}
	Ok(())
}
