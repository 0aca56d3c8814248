//! Scripted collaboration runs over an in-memory store and channel.
//!
//! Each run builds its own [`Stage`] so scenarios never observe each other.
//! Wall-clock waits are kept short through [`demo_config`]; logical time comes
//! from a [`ManualClock`] so timestamps and presence expiry are deterministic.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use chrono::Utc;
use tandem_channel::MemoryHub;
use tandem_client::{Client, ClientConfig};
use tandem_presence::PresenceType;
use tandem_primitives::{Fields, Identity, ManualClock, ResourceKey};
use tandem_sync::{Fault, MemoryRemote, Outcome, SyncError};

use crate::cli::Which;

struct Stage {
	remote: Arc<MemoryRemote>,
	hub: Arc<MemoryHub>,
	clock: ManualClock,
}

impl Stage {
	fn new() -> Self {
		Self {
			remote: Arc::new(MemoryRemote::new()),
			hub: Arc::new(MemoryHub::new()),
			clock: ManualClock::new(Utc::now()),
		}
	}

	async fn client(&self, name: &str, config: ClientConfig) -> Result<Client> {
		Client::builder(self.remote.clone(), self.hub.clone(), Identity::new(name, name.to_uppercase()))
			.config(config)
			.clock(Arc::new(self.clock.clone()))
			.sweeper(false)
			.connect()
			.await
			.with_context(|| format!("connecting {name}"))
	}

	fn seed(&self, key: &ResourceKey, value: Fields, clients: &[&Client]) -> Result<()> {
		let version = self.remote.seed(key.clone(), value.clone());
		for client in clients {
			client.hydrate(key.clone(), value.clone(), version.clone())?;
		}
		Ok(())
	}
}

fn demo_config() -> ClientConfig {
	let mut config = ClientConfig::default();
	config.sync.debounce_ms = 50;
	config.sync.commit_timeout_ms = 500;
	config
}

/// Lets broadcast forwarding catch up.
async fn settle() {
	tokio::time::sleep(Duration::from_millis(20)).await;
}

pub async fn run(which: Which) -> Result<()> {
	for scenario in which.expand() {
		match scenario {
			Which::A => concurrent_edit().await,
			Which::B => timed_out_update().await,
			Which::C => batch_reorder().await,
			Which::D => expiring_presence().await,
			Which::All => continue,
		}
		.with_context(|| format!("scenario {scenario:?}"))?;
		println!();
	}
	Ok(())
}

async fn concurrent_edit() -> Result<()> {
	println!("scenario A: concurrent title edits");
	let stage = Stage::new();
	let x = stage.client("x", demo_config()).await?;
	let y = stage.client("y", demo_config()).await?;
	let task = ResourceKey::task("T1");
	stage.seed(&task, Fields::new().with("title", "draft"), &[&x, &y])?;

	stage.clock.advance(Duration::from_secs(1));
	let from_x = x.submit(x.update(task.clone(), Fields::new().with("title", "from-x")));
	tokio::time::sleep(Duration::from_millis(10)).await;
	stage.clock.advance(Duration::from_secs(1));
	let from_y = y.submit(y.update(task.clone(), Fields::new().with("title", "from-y")));

	let committed = from_x.await?;
	println!("  x: {committed:?}");
	let id = match from_y.await {
		Err(SyncError::Conflict { id, conflict_type, .. }) => {
			println!("  y: {conflict_type} conflict {id}");
			id
		}
		other => bail!("expected y to conflict, got {other:?}"),
	};

	let record = y.get_conflicts().into_iter().find(|record| record.id == id).context("conflict not recorded")?;
	let suggestion = record.suggested_resolution.clone().context("no suggested resolution")?;
	println!("  suggested: {}", suggestion.strategy);
	let resolved = y.resolve_conflict(id, suggestion).await?;
	println!("  resolved: {resolved:?}");

	settle().await;
	ensure!(x.get(&task) == y.get(&task), "participants diverged");
	println!("  converged title: {:?}", x.get(&task).as_ref().and_then(|fields| fields.get("title")));
	Ok(())
}

async fn timed_out_update() -> Result<()> {
	println!("scenario B: update that never commits");
	let stage = Stage::new();
	let x = stage.client("x", demo_config()).await?;
	let task = ResourceKey::task("T1");
	stage.seed(&task, Fields::new().with("description", "original"), &[&x])?;
	stage.remote.inject(Fault::Hang);

	let ticket = x.submit(x.update(task.clone(), Fields::new().with("description", "rewritten")));
	println!("  optimistic: {:?}", x.get(&task).as_ref().and_then(|fields| fields.get("description")));
	match ticket.await {
		Err(error @ SyncError::Network(_)) => println!("  failed: {error}"),
		other => bail!("expected a network failure, got {other:?}"),
	}
	println!("  rolled back: {:?}", x.get(&task).as_ref().and_then(|fields| fields.get("description")));
	ensure!(!x.can_undo(), "failed update must not be undoable");
	Ok(())
}

async fn batch_reorder() -> Result<()> {
	println!("scenario C: batch reorder");
	let stage = Stage::new();
	let x = stage.client("x", demo_config()).await?;
	let y = stage.client("y", demo_config()).await?;
	let keys: Vec<ResourceKey> = ["A", "B", "C"].into_iter().map(ResourceKey::task).collect();
	for (position, key) in keys.iter().enumerate() {
		stage.seed(key, Fields::new().with("position", position as u64), &[&x, &y])?;
	}

	let outcome = x.submit_batch(vec![x.reorder(keys[0].clone(), 2), x.reorder(keys[2].clone(), 0)]).await?;
	ensure!(matches!(outcome, Outcome::BatchCommitted { count: 2 }), "unexpected outcome {outcome:?}");
	println!("  x: {outcome:?}");
	for entry in x.coordinator().history_entries() {
		println!("  history: {} ({})", entry.action, entry.description);
	}

	settle().await;
	for key in &keys {
		println!("  y sees {key} at {:?}", y.get(key).as_ref().and_then(|fields| fields.get("position")));
	}
	ensure!(x.undo(), "nothing to undo");
	println!("  undo restores A at {:?}", x.get(&keys[0]).as_ref().and_then(|fields| fields.get("position")));
	Ok(())
}

async fn expiring_presence() -> Result<()> {
	println!("scenario D: editing presence without heartbeats");
	let stage = Stage::new();
	let x = stage.client("x", demo_config()).await?;
	let y = stage.client("y", demo_config()).await?;
	let task = ResourceKey::task("T1");

	let subscription = y
		.subscribe_presence(
			&task,
			|records| {
				let actors: Vec<&str> = records.iter().map(|record| record.actor.as_str()).collect();
				println!("  y sees editors: {actors:?}");
			},
			|_| {},
		)
		.await?;

	x.announce(&task, PresenceType::Editing, Some("title")).await?;
	let ttl = y.presence().config().ttl();

	stage.clock.advance(ttl / 2);
	println!("  after {}s: {} expired", (ttl / 2).as_secs(), y.presence().sweep());

	stage.clock.advance(ttl / 2 + Duration::from_millis(1));
	println!("  after {}s: {} expired", ttl.as_secs(), y.presence().sweep());
	ensure!(y.presence().presence(&task).is_empty(), "stale editor still visible");

	subscription.release().await?;
	Ok(())
}
