//! Local checks run before any optimistic apply.

use std::collections::HashSet;

use tandem_primitives::{Fields, Operation, OperationKind, POSITION_FIELD};

use crate::error::SyncError;

/// Authorization decision consumed before submission.
///
/// The policy itself lives elsewhere; a denial carries the reason to surface.
pub trait SubmitGate: Send + Sync {
	fn authorize(&self, op: &Operation) -> Result<(), String>;
}

/// Gate that admits every operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl SubmitGate for AllowAll {
	fn authorize(&self, _op: &Operation) -> Result<(), String> {
		Ok(())
	}
}

/// Checks `op` against the resource's current visible value.
pub fn validate(op: &Operation, current: Option<&Fields>) -> Result<(), SyncError> {
	let key = &op.key;
	match op.kind {
		OperationKind::Create => {
			if op.payload.is_empty() {
				return Err(SyncError::Validation(format!("create of {key} has an empty payload")));
			}
			if current.is_some() {
				return Err(SyncError::Validation(format!("{key} already exists")));
			}
		}
		OperationKind::Update => {
			if op.payload.is_empty() {
				return Err(SyncError::Validation(format!("update of {key} changes nothing")));
			}
			if current.is_none() {
				return Err(SyncError::Validation(format!("{key} does not exist")));
			}
		}
		OperationKind::Delete => {
			if !op.payload.is_empty() {
				return Err(SyncError::Validation(format!("delete of {key} carries a payload")));
			}
			if current.is_none() {
				return Err(SyncError::Validation(format!("{key} does not exist")));
			}
		}
		OperationKind::Reorder => {
			if op.payload.len() != 1 || op.position().is_none() {
				return Err(SyncError::Validation(format!(
					"reorder of {key} needs exactly a non-negative integer `{POSITION_FIELD}`"
				)));
			}
			if current.is_none() {
				return Err(SyncError::Validation(format!("{key} does not exist")));
			}
		}
	}
	Ok(())
}

/// Batches are non-empty reorders on distinct resources.
pub fn validate_batch<'a, F>(ops: &'a [Operation], lookup: F) -> Result<(), SyncError>
where
	F: Fn(&'a Operation) -> Option<&'a Fields>,
{
	if ops.is_empty() {
		return Err(SyncError::Validation("empty batch".into()));
	}
	let mut seen = HashSet::with_capacity(ops.len());
	for op in ops {
		if op.kind != OperationKind::Reorder {
			return Err(SyncError::Validation(format!("batch item for {} is a {}, not a reorder", op.key, op.kind.as_str())));
		}
		if !seen.insert(&op.key) {
			return Err(SyncError::Validation(format!("batch touches {} twice", op.key)));
		}
		validate(op, lookup(op))?;
	}
	Ok(())
}
