// SPDX-License-Identifier: Apache-2.0

use std::collections::TryReserveError;
use std::result;

/// A pool operation error.
///
/// Only the return path can fail with an error. Allocation reports failure as
/// [`None`], since heap exhaustion and validator rejection are indistinguishable
/// to the caller.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum PoolError {
	/// A batch of free ids could not be spilled to the global free list because
	/// the heap is exhausted.
	#[error("failed to allocate a free chunk")]
	Alloc,
	/// The calling thread has no local pool and one could not be created, either
	/// because allocation failed, the thread is exiting, or the pool is already
	/// borrowed further up the stack.
	#[error("no local pool is available on this thread")]
	NoLocalPool,
}

impl From<TryReserveError> for PoolError {
	fn from(_: TryReserveError) -> Self { Self::Alloc }
}

pub type Result<T = ()> = result::Result<T, PoolError>;
