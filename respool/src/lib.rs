// Copyright 2023 Strixpyrr
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! ## How it works
//!
//! Every pooled type `T` has one process-wide [`ResourcePool`], holding values
//! of `T` addressed by 64-bit [`ResourceId`]s. Values are stored in fixed-size
//! *blocks*. A block belongs to one thread, which bump-allocates from it until it
//! fills, then claims a fresh block from the pool. Blocks are grouped into *block
//! groups* of 65536, and the groups into a fixed top-level index; together these
//! form an append-only address space. An id maps to a group, a block in that
//! group, and an offset in that block by plain arithmetic, so it can be resolved
//! from any thread, even one that never allocated anything.
//!
//! Nothing is ever freed. Returning a value doesn't drop it, and its memory stays
//! valid; its id goes to a free list to be handed out again, along with the value
//! exactly as it was left. Blocks and groups live until the process exits. A
//! reader holding a bare pointer can't be pinned, so this is what keeps it safe
//! from use-after-free.
//!
//! ### Free lists
//!
//! Each thread keeps returned ids in a local *free chunk*. When the chunk fills,
//! it's moved whole to a global, mutex-guarded list of chunks; when it empties,
//! the thread takes a whole chunk back before allocating new slots. The global
//! lock is taken once per chunk rather than once per id. When a thread exits, its
//! free chunk is flushed to the global list.
//!
//! ### Tuning
//!
//! Block size, free chunk size, and an optional validator are set per type
//! through the [`Resource`] trait, implemented with the [`resource!`] macro.
//!
//! ```
//! use respool::{get_resource, return_resource, address_resource};
//!
//! #[derive(Default)]
//! struct Session { user: u32 }
//!
//! respool::resource!(Session);
//!
//! let (id, mut session) = get_resource::<Session>().unwrap();
//! unsafe { session.as_mut().user = 7 }
//! assert_eq!(address_resource(id), Some(session));
//! return_resource(id).unwrap();
//! ```
//!
//! ### Features
//!
//! - `free-item-num` (default): counts free ids in
//!   [`ResourcePoolInfo::free_item_num`], at the cost of a shared atomic per get
//!   and return.
//! - `teardown`: enables [`teardown_resources`], which frees a fully quiesced
//!   pool's storage. Meant for tests.

mod error;
mod id;
mod pool;
mod resource;

use std::ptr::NonNull;
use cfg_if::cfg_if;
pub use error::*;
pub use id::ResourceId;
pub use pool::{ResourcePool, ResourcePoolInfo};
pub use resource::Resource;
#[doc(hidden)]
pub use pool::LocalSlot;

#[doc(hidden)]
pub mod __private {
	pub use once_cell::sync::OnceCell;
}

/// Gets a default value of `T` from its pool. See
/// [`ResourcePool::get_resource_with`].
#[inline]
pub fn get_resource<T: Resource + Default>() -> Option<(ResourceId<T>, NonNull<T>)> {
	ResourcePool::singleton()?.get_resource()
}

/// Gets a value of `T` from its pool, calling `init` if a new slot is allocated.
/// See [`ResourcePool::get_resource_with`].
#[inline]
pub fn get_resource_with<T: Resource>(init: impl FnOnce() -> T) -> Option<(ResourceId<T>, NonNull<T>)> {
	ResourcePool::singleton()?.get_resource_with(init)
}

/// Gets a value of `T` from its pool, converting `arg` if a new slot is
/// allocated. `arg` is dropped if an id is reused.
#[inline]
pub fn get_resource_from<T: Resource + From<A>, A>(arg: A) -> Option<(ResourceId<T>, NonNull<T>)> {
	get_resource_with(|| T::from(arg))
}

/// Returns an id to its pool. See [`ResourcePool::return_resource`].
#[inline]
pub fn return_resource<T: Resource>(id: ResourceId<T>) -> Result {
	ResourcePool::singleton()
		.ok_or(PoolError::Alloc)?
		.return_resource(id)
}

/// Resolves an id to its value's address, or `None` if it's out of range. See
/// [`ResourcePool::address_resource`].
#[inline]
pub fn address_resource<T: Resource>(id: ResourceId<T>) -> Option<NonNull<T>> {
	T::__pool().get()?.address_resource(id)
}

/// Retires the calling thread's local pool of `T`. See
/// [`ResourcePool::clear_resources`].
pub fn clear_resources<T: Resource>() {
	if let Some(pool) = T::__pool().get() {
		pool.clear_resources()
	}
}

/// Summarizes the pool of `T`, without creating it if it's unused. See
/// [`ResourcePool::describe_resources`].
pub fn describe_resources<T: Resource>() -> ResourcePoolInfo {
	T::__pool()
		.get()
		.map(ResourcePool::describe_resources)
		.unwrap_or_else(ResourcePoolInfo::empty::<T>)
}

cfg_if! {
	if #[cfg(feature = "teardown")] {
		/// Frees the storage of the pool of `T`. See [`ResourcePool::teardown`].
		///
		/// # Safety
		///
		/// Every other thread that used the pool must have exited, and no pointer
		/// to a value of the pool may be used afterward.
		pub unsafe fn teardown_resources<T: Resource>() -> bool {
			match T::__pool().get() {
				Some(pool) => pool.teardown(),
				None => true,
			}
		}
	}
}
