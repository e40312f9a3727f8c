// SPDX-License-Identifier: Apache-2.0

use std::cell::RefCell;
use std::ptr::{self, NonNull};
use all_asserts::debug_assert_le;
use crate::{Resource, ResourceId};
use crate::error::Result;
use super::block::Block;
use super::ResourcePool;

/// A thread's slot for its local pool of `T`, declared per type by the
/// [`resource!`](crate::resource) macro. The local pool is created on first use
/// and retired when the thread exits.
pub struct LocalSlot<T: Resource>(RefCell<Option<LocalPool<T>>>);

impl<T: Resource> LocalSlot<T> {
	#[doc(hidden)]
	pub const fn new() -> Self { Self(RefCell::new(None)) }

	/// Runs `f` on the calling thread's local pool, creating it if needed. Returns
	/// `None` if the pool couldn't be created, the thread is exiting, or the slot
	/// is already borrowed by an enclosing call.
	pub(crate) fn with<R>(
		pool: &'static ResourcePool<T>,
		f: impl FnOnce(&mut LocalPool<T>) -> R
	) -> Option<R> {
		T::__local()
			.try_with(|slot| {
				let mut local = slot.0.try_borrow_mut().ok()?;
				if local.is_none() {
					*local = Some(LocalPool::new(pool)?);
				}
				local.as_mut().map(f)
			})
			.ok()
			.flatten()
	}

	/// Retires the calling thread's local pool, if it has one.
	pub(crate) fn clear() {
		let local = T::__local()
			.try_with(|slot| slot.0.try_borrow_mut().ok()?.take())
			.ok()
			.flatten();
		// Dropped outside the slot borrow.
		drop(local)
	}
}

/// A batch of returned ids, the unit moved between local and global free lists.
/// Holds at most [`ResourcePool::FREE_CHUNK_NITEM`] ids, reused in LIFO order.
pub(crate) struct FreeChunk<T>(Vec<ResourceId<T>>);

impl<T: Resource> FreeChunk<T> {
	fn alloc() -> Option<Self> {
		let mut ids = Vec::new();
		ids.try_reserve_exact(ResourcePool::<T>::FREE_CHUNK_NITEM).ok()?;
		Some(Self(ids))
	}

	pub fn len(&self) -> usize { self.0.len() }
	pub fn is_empty(&self) -> bool { self.0.is_empty() }
	pub fn is_full(&self) -> bool { self.len() >= ResourcePool::<T>::FREE_CHUNK_NITEM }

	pub fn ids(&self) -> &[ResourceId<T>] { &self.0 }

	fn pop(&mut self) -> Option<ResourceId<T>> { self.0.pop() }

	fn push(&mut self, id: ResourceId<T>) {
		debug_assert!(!self.is_full());
		self.0.push(id)
	}

	fn clear(&mut self) { self.0.clear() }

	/// Replaces the contents with `ids`, without reallocating.
	pub fn refill(&mut self, ids: &[ResourceId<T>]) {
		debug_assert_le!(ids.len(), ResourcePool::<T>::FREE_CHUNK_NITEM);
		self.0.clear();
		self.0.extend_from_slice(ids)
	}
}

/// The allocation front-end of one thread: its current block and its free chunk.
/// Only ever touched by the owning thread.
pub(crate) struct LocalPool<T: Resource> {
	pool: &'static ResourcePool<T>,
	cur_block: Option<NonNull<Block<T>>>,
	cur_block_index: usize,
	cur_free: FreeChunk<T>,
}

impl<T: Resource> LocalPool<T> {
	fn new(pool: &'static ResourcePool<T>) -> Option<Self> {
		let cur_free = FreeChunk::alloc()?;
		pool.register_thread();
		Some(Self {
			pool,
			cur_block: None,
			cur_block_index: 0,
			cur_free,
		})
	}

	/// Gets a value, reusing a returned id if possible. `init` is only called when
	/// a new slot is allocated; reused values are handed back as they were left.
	pub fn get(&mut self, init: impl FnOnce() -> T) -> Option<(ResourceId<T>, NonNull<T>)> {
		if let Some(id) = self.cur_free.pop() {
			return Some(self.reuse(id))
		}

		if self.pool.pop_free_chunk(&mut self.cur_free) {
			if let Some(id) = self.cur_free.pop() {
				return Some(self.reuse(id))
			}
		}

		let block = match self.cur_block {
			Some(block) if !unsafe { block.as_ref() }.is_full() => block,
			_ => {
				let (block, index) = self.pool.add_block()?;
				self.cur_block = Some(block);
				self.cur_block_index = index;
				block
			}
		};

		// Safety: this thread owns the current block, which was just checked to
		// have room. Published blocks outlive the thread.
		let (offset, slot) = unsafe { Block::bump(block, init()) };
		// The slot stays consumed even if the value is rejected.
		if !T::validate(unsafe { slot.as_ref() }) {
			unsafe { ptr::drop_in_place(slot.as_ptr()) }
			return None
		}

		let value = self.cur_block_index as u64 * Block::<T>::NITEM as u64 + offset as u64;
		Some((ResourceId::new(value), slot))
	}

	fn reuse(&self, id: ResourceId<T>) -> (ResourceId<T>, NonNull<T>) {
		self.pool.sub_free(1);
		// Safety: ids in the free lists were all issued by this pool.
		(id, unsafe { self.pool.address_resource_unchecked(id) })
	}

	/// Returns an id to the local free chunk, spilling the chunk to the global list
	/// first if it's full.
	pub fn return_resource(&mut self, id: ResourceId<T>) -> Result {
		if self.cur_free.is_full() {
			self.pool.push_free_chunk(self.cur_free.ids())?;
			self.cur_free.clear();
		}

		self.cur_free.push(id);
		self.pool.add_free(1);
		Ok(())
	}
}

impl<T: Resource> Drop for LocalPool<T> {
	fn drop(&mut self) {
		if !self.cur_free.is_empty() && self.pool.push_free_chunk(self.cur_free.ids()).is_err() {
			// The ids can't be reused; stop counting them as free.
			self.pool.sub_free(self.cur_free.len());
		}
		self.pool.unregister_thread();
	}
}
