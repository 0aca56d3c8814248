use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "tandem-demo")]
#[command(about = "Replays collaboration scenarios against in-memory collaborators")]
#[command(version)]
/// Command-line arguments.
pub struct Cli {
	/// Verbose logging
	#[arg(short, long, global = true)]
	pub verbose: bool,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Run one scenario, or all of them in order
	Scenario {
		#[arg(value_enum)]
		which: Which,
	},
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Which {
	/// Concurrent title edits resolved by last-write-wins
	A,
	/// Timed-out update rolled back
	B,
	/// Batch reorder committed as one move
	C,
	/// Editing presence expiring without heartbeats
	D,
	All,
}

impl Which {
	pub fn expand(self) -> Vec<Which> {
		match self {
			Self::All => vec![Self::A, Self::B, Self::C, Self::D],
			one => vec![one],
		}
	}
}
