// SPDX-License-Identifier: Apache-2.0

mod block;
mod info;
mod local;

use std::any::type_name;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use cfg_if::cfg_if;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use crate::{Resource, ResourceId};
use crate::error::{PoolError, Result};
use crate::resource::free_chunk_nitem;
use block::{Block, BlockGroup, GroupIndex, GROUP_NBLOCK, GROUP_NBLOCK_NBIT, MAX_BLOCK_NGROUP};
use local::FreeChunk;
pub use info::ResourcePoolInfo;
pub use local::LocalSlot;

/// The process-wide pool of `T`.
///
/// Values are stored in blocks that are never freed or moved, so a value's
/// address is stable for as long as the process runs, and an id can be resolved
/// from any thread without synchronizing with the thread that allocated it.
/// Each thread allocates from its own block and caches returned ids locally,
/// only touching shared state once per block or once per free chunk.
///
/// Returning a value doesn't drop it. The next [`get_resource`] that reuses
/// its id hands the value back exactly as it was left, so callers must reset
/// whatever state they care about. Returning an id twice, or using a value after
/// returning it, is a logic error the pool doesn't detect.
///
/// [`get_resource`]: Self::get_resource
pub struct ResourcePool<T: Resource> {
	ngroup: AtomicUsize,
	groups: Box<GroupIndex<T>>,
	group_lock: Mutex<()>,
	free_chunks: CachePadded<Mutex<Vec<Box<[ResourceId<T>]>>>>,
	nlocal: CachePadded<AtomicUsize>,
	thread_lock: Mutex<()>,
	#[cfg(feature = "free-item-num")]
	nfree: CachePadded<AtomicUsize>,
}

impl<T: Resource> ResourcePool<T> {
	/// The number of values per block.
	pub const BLOCK_NITEM: usize = Block::<T>::NITEM;
	/// The number of ids per free chunk.
	pub const FREE_CHUNK_NITEM: usize = free_chunk_nitem::<T>();

	fn new() -> Result<Self> {
		let groups = GroupIndex::alloc().ok_or(PoolError::Alloc)?;
		Ok(Self {
			ngroup: AtomicUsize::new(0),
			groups,
			group_lock: Mutex::new(()),
			free_chunks: CachePadded::new(Mutex::new(Vec::new())),
			nlocal: CachePadded::new(AtomicUsize::new(0)),
			thread_lock: Mutex::new(()),
			#[cfg(feature = "free-item-num")]
			nfree: CachePadded::new(AtomicUsize::new(0)),
		})
	}

	/// Returns the pool of `T`, creating it on first use. Returns `None` only if
	/// the pool couldn't be allocated. The pool is never destroyed.
	#[inline]
	pub fn singleton() -> Option<&'static Self> {
		T::__pool().get_or_try_init(Self::new).ok()
	}

	/// Gets a default value. See [`get_resource_with`](Self::get_resource_with).
	#[inline]
	pub fn get_resource(&'static self) -> Option<(ResourceId<T>, NonNull<T>)>
	where T: Default {
		self.get_resource_with(T::default)
	}

	/// Gets a value and its id, or `None` if allocation failed or the validator
	/// rejected the new value.
	///
	/// When a returned id is reused, `init` isn't called; the value is handed
	/// back unchanged. Otherwise a slot is allocated and `init`'s result is moved
	/// into it and validated.
	#[inline]
	pub fn get_resource_with(
		&'static self,
		init: impl FnOnce() -> T
	) -> Option<(ResourceId<T>, NonNull<T>)> {
		LocalSlot::with(self, |local| local.get(init)).flatten()
	}

	/// Returns an id to the pool for reuse. The value isn't dropped, and its memory
	/// remains valid.
	///
	/// Fails only if a full batch of free ids could not be moved to the global
	/// free list, or the thread has no usable local pool.
	#[inline]
	pub fn return_resource(&'static self, id: ResourceId<T>) -> Result {
		LocalSlot::with(self, |local| local.return_resource(id))
			.unwrap_or(Err(PoolError::NoLocalPool))
	}

	/// Resolves an id to its value's address, or `None` if the id is outside the
	/// range of slots ever allocated. Safe with untrusted ids; a returned or
	/// rejected id still resolves to its (stale) slot.
	pub fn address_resource(&self, id: ResourceId<T>) -> Option<NonNull<T>> {
		let (group, index, offset) = Self::locate(id)?;
		let block = self.groups.get(group)?.get(index)?;
		// Safety: published blocks are never freed while the pool is in use, and
		// the offset is below the block's item count.
		let nitem = unsafe { block.as_ref() }.nitem();
		(offset < nitem).then(|| unsafe { Block::slot(block, offset) })
	}

	/// Resolves an id without bounds checking.
	///
	/// # Safety
	///
	/// The id must have been issued by this pool.
	#[inline]
	pub unsafe fn address_resource_unchecked(&self, id: ResourceId<T>) -> NonNull<T> {
		let (group, index, offset) = Self::locate(id).unwrap_unchecked();
		let block = self.groups
			.get(group)
			.and_then(|group| group.get(index))
			.unwrap_unchecked();
		Block::slot(block, offset)
	}

	/// Splits an id into its group index, block index within the group, and
	/// offset within the block.
	#[inline]
	fn locate(id: ResourceId<T>) -> Option<(usize, usize, usize)> {
		let value = id.value();
		let nitem = Self::BLOCK_NITEM as u64;
		let block_index = value / nitem;
		let group = block_index >> GROUP_NBLOCK_NBIT;
		if group >= MAX_BLOCK_NGROUP as u64 { return None }

		let index = block_index & (GROUP_NBLOCK as u64 - 1);
		let offset = value - block_index * nitem;
		Some((group as usize, index as usize, offset as usize))
	}

	/// Retires the calling thread's local pool, moving its free ids to the global
	/// free list. The unused rest of its block is not reclaimed. Other threads are
	/// unaffected.
	pub fn clear_resources(&self) {
		LocalSlot::<T>::clear()
	}

	/// Summarizes the pool. Walks every block, so avoid calling this often.
	pub fn describe_resources(&self) -> ResourcePoolInfo {
		let mut info = ResourcePoolInfo::empty::<T>();
		info.local_pool_num = self.nlocal.load(Relaxed);
		info.block_group_num = self.ngroup.load(Acquire);

		for group in (0..info.block_group_num).map_while(|i| self.groups.get(i)) {
			let nblock = group.len();
			info.block_num += nblock;
			info.item_num += (0..nblock)
				.filter_map(|i| group.get(i))
				.map(|block| unsafe { block.as_ref() }.nitem())
				.sum::<usize>();
		}

		info.total_size = info.block_num * Self::BLOCK_NITEM * size_of::<T>();
		#[cfg(feature = "free-item-num")]
		let info = ResourcePoolInfo {
			free_item_num: self.nfree.load(Relaxed),
			..info
		};
		info
	}

	/// Allocates and publishes a block, returning it with its global index.
	fn add_block(&self) -> Option<(NonNull<Block<T>>, usize)> {
		let block = Block::alloc()?;
		loop {
			let ngroup = self.ngroup.load(Acquire);
			let last = ngroup.checked_sub(1).and_then(|i| self.groups.get(i).map(|group| (i, group)));
			if let Some((group_index, group)) = last {
				if let Some(index) = group.claim() {
					group.publish(index, block);
					return Some((block, (group_index << GROUP_NBLOCK_NBIT) + index))
				}
			}

			if !self.add_block_group(ngroup) {
				// Safety: the block was never published.
				unsafe { Block::free(block) }
				return None
			}
		}
	}

	/// Publishes a new block group, unless another thread already did since the
	/// group count was `old_ngroup`. Returns `false` if the index is full or the
	/// group couldn't be allocated.
	fn add_block_group(&self, old_ngroup: usize) -> bool {
		let _lock = self.group_lock.lock();
		let ngroup = self.ngroup.load(Acquire);
		if ngroup != old_ngroup { return true }
		if ngroup >= MAX_BLOCK_NGROUP { return false }

		let Some(group) = BlockGroup::alloc() else { return false };
		self.groups.publish(ngroup, group);
		self.ngroup.store(ngroup + 1, Release);
		tracing::debug!(pool = type_name::<T>(), group = ngroup, "published block group");
		true
	}

	/// Moves a chunk from the global free list into `chunk`, returning `false` if
	/// the list is empty.
	fn pop_free_chunk(&self, chunk: &mut FreeChunk<T>) -> bool {
		let Some(ids) = self.free_chunks.lock().pop() else { return false };
		chunk.refill(&ids);
		true
	}

	/// Copies `ids` into an exactly-sized chunk and pushes it to the global list.
	fn push_free_chunk(&self, ids: &[ResourceId<T>]) -> Result {
		let mut chunk = Vec::new();
		chunk.try_reserve_exact(ids.len())?;
		chunk.extend_from_slice(ids);
		let chunk = chunk.into_boxed_slice();

		let mut chunks = self.free_chunks.lock();
		chunks.try_reserve(1)?;
		chunks.push(chunk);
		drop(chunks);

		tracing::trace!(pool = type_name::<T>(), count = ids.len(), "spilled free chunk");
		Ok(())
	}

	fn register_thread(&self) {
		let _lock = self.thread_lock.lock();
		let nlocal = self.nlocal.fetch_add(1, Relaxed) + 1;
		tracing::trace!(pool = type_name::<T>(), nlocal, "registered local pool");
	}

	fn unregister_thread(&self) {
		let _lock = self.thread_lock.lock();
		let nlocal = self.nlocal.fetch_sub(1, Relaxed) - 1;
		tracing::trace!(pool = type_name::<T>(), nlocal, "retired local pool");
	}

	cfg_if! {
		if #[cfg(feature = "free-item-num")] {
			#[inline]
			fn add_free(&self, count: usize) {
				self.nfree.fetch_add(count, Relaxed);
			}

			#[inline]
			fn sub_free(&self, count: usize) {
				self.nfree.fetch_sub(count, Relaxed);
			}
		} else {
			#[inline(always)]
			fn add_free(&self, _: usize) { }

			#[inline(always)]
			fn sub_free(&self, _: usize) { }
		}
	}

	cfg_if! {
		if #[cfg(feature = "teardown")] {
			/// Frees all storage once every thread but the caller has retired its
			/// local pool, leaving the pool empty and reusable. Retires the caller's
			/// local pool first. Returns `false`, changing nothing else, if any other
			/// thread still holds a local pool. Stored values are not dropped.
			///
			/// # Safety
			///
			/// No pointer to a value of this pool may be used afterward, and no other
			/// thread may use the pool concurrently.
			pub unsafe fn teardown(&self) -> bool {
				LocalSlot::<T>::clear();

				let _threads = self.thread_lock.lock();
				if self.nlocal.load(Relaxed) != 0 { return false }

				let _groups = self.group_lock.lock();
				self.free_chunks.lock().clear();
				#[cfg(feature = "free-item-num")]
				self.nfree.store(0, Relaxed);

				let ngroup = self.ngroup.swap(0, Acquire);
				for index in 0..ngroup {
					if let Some(group) = self.groups.take(index) {
						BlockGroup::free(group)
					}
				}

				tracing::debug!(pool = type_name::<T>(), ngroup, "tore down pool");
				true
			}
		}
	}
}
