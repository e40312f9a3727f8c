// SPDX-License-Identifier: Apache-2.0

//! The append-only storage of a pool. Values live in fixed-size *blocks*, block
//! pointers in fixed-size *block groups*, and group pointers in a fixed top-level
//! *group index*. Every pointer is published once and never retracted while the
//! process runs, so readers can follow them without locking.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::cmp::min;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};
use std::sync::atomic::AtomicPtr;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use all_asserts::debug_assert_lt;
use bytemuck::allocation::try_zeroed_box;
use bytemuck::Zeroable;
use crate::Resource;
use crate::resource::block_nitem;

pub(crate) const GROUP_NBLOCK_NBIT: u32 = 16;
/// The number of blocks in a group.
pub(crate) const GROUP_NBLOCK: usize = 1 << GROUP_NBLOCK_NBIT;
/// The number of groups in the index.
pub(crate) const MAX_BLOCK_NGROUP: usize = 1 << 16;

/// A fixed-capacity array of values, bump-allocated by the one thread that owns
/// it. The header is followed inline by its item storage, in one allocation
/// aligned to a cache line. Item storage is raw; slots below `nitem` hold a value
/// (or, for a slot rejected by the validator, a dropped one).
///
/// Items lie past the header, so they are only ever reached through a pointer to
/// the whole allocation, never through a reference to the header.
#[repr(C, align(64))]
pub(crate) struct Block<T: Resource> {
	nitem: AtomicUsize,
	_type: PhantomData<T>,
}

impl<T: Resource> Block<T> {
	pub const NITEM: usize = block_nitem::<T>();

	/// The byte offset of the first item: the header size, rounded up to the item
	/// alignment. Both are powers of two, so this is the larger of the two.
	const ITEMS_OFFSET: usize = if align_of::<T>() > size_of::<Self>() {
		align_of::<T>()
	} else {
		size_of::<Self>()
	};

	fn layout() -> Option<Layout> {
		let items = Layout::array::<T>(Self::NITEM).ok()?;
		let (layout, offset) = Layout::new::<Self>().extend(items).ok()?;
		debug_assert_eq!(offset, Self::ITEMS_OFFSET);
		Some(layout.pad_to_align())
	}

	/// Allocates an empty block, returning `None` if the heap is exhausted.
	pub fn alloc() -> Option<NonNull<Self>> {
		let layout = Self::layout()?;
		// Safety: the layout is never zero-sized, it holds at least the header. A
		// zeroed header is an empty block.
		NonNull::new(unsafe { alloc_zeroed(layout) }.cast())
	}

	/// Frees a block allocated by [`alloc`](Self::alloc). Values are not dropped.
	///
	/// # Safety
	///
	/// The block must be unreachable; no pointer into it may be used afterward.
	pub unsafe fn free(block: NonNull<Self>) {
		if let Some(layout) = Self::layout() {
			dealloc(block.as_ptr().cast(), layout)
		}
	}

	/// Returns the number of slots ever bump-allocated.
	#[inline]
	pub fn nitem(&self) -> usize { self.nitem.load(Acquire) }

	#[inline]
	pub fn is_full(&self) -> bool { self.nitem.load(Relaxed) >= Self::NITEM }

	/// Returns a pointer to the slot at `offset`.
	///
	/// # Safety
	///
	/// `block` must come from [`alloc`](Self::alloc), and `offset` must be less
	/// than [`NITEM`](Self::NITEM).
	#[inline]
	pub unsafe fn slot(block: NonNull<Self>, offset: usize) -> NonNull<T> {
		debug_assert_lt!(offset, Self::NITEM);
		let items = block.as_ptr().cast::<u8>().add(Self::ITEMS_OFFSET).cast::<T>();
		NonNull::new_unchecked(items.add(offset))
	}

	/// Moves `value` into the next free slot, returning its offset. The slot is
	/// published with release ordering after the write.
	///
	/// # Safety
	///
	/// Only the owning thread may bump a block, and the block must not be full.
	pub unsafe fn bump(block: NonNull<Self>, value: T) -> (usize, NonNull<T>) {
		let nitem = &block.as_ref().nitem;
		let offset = nitem.load(Relaxed);
		let slot = Self::slot(block, offset);
		ptr::write(slot.as_ptr(), value);
		nitem.store(offset + 1, Release);
		(offset, slot)
	}
}

/// A fixed-capacity array of published blocks, filled left to right.
pub(crate) struct BlockGroup<T: Resource> {
	nblock: AtomicUsize,
	blocks: [AtomicPtr<Block<T>>; GROUP_NBLOCK],
}

// Safety: null pointers and a zero count are valid.
unsafe impl<T: Resource> Zeroable for BlockGroup<T> { }

impl<T: Resource> BlockGroup<T> {
	/// Allocates an empty group directly on the heap.
	pub fn alloc() -> Option<NonNull<Self>> {
		try_zeroed_box::<Self>()
			.ok()
			.map(|group| NonNull::from(Box::leak(group)))
	}

	/// Frees a group and every block published in it.
	///
	/// # Safety
	///
	/// The group must be unreachable; no pointer into it or its blocks may be
	/// used afterward.
	pub unsafe fn free(group: NonNull<Self>) {
		let group = Box::from_raw(group.as_ptr());
		for block in &group.blocks[..group.len()] {
			if let Some(block) = NonNull::new(block.swap(ptr::null_mut(), Relaxed)) {
				Block::free(block)
			}
		}
	}

	/// Claims the next block slot, or returns `None` if the group is full. The
	/// counter may briefly overshoot while a racing claim is rolled back.
	pub fn claim(&self) -> Option<usize> {
		let index = self.nblock.fetch_add(1, Relaxed);
		if index < GROUP_NBLOCK {
			Some(index)
		} else {
			self.nblock.fetch_sub(1, Relaxed);
			None
		}
	}

	/// Publishes a block into a claimed slot.
	pub fn publish(&self, index: usize, block: NonNull<Block<T>>) {
		self.blocks[index].store(block.as_ptr(), Release)
	}

	/// Returns the number of claimed slots. Claimed slots may not be published yet.
	pub fn len(&self) -> usize {
		min(self.nblock.load(Relaxed), GROUP_NBLOCK)
	}

	/// Returns the block published at `index`, if any.
	#[inline]
	pub fn get(&self, index: usize) -> Option<NonNull<Block<T>>> {
		NonNull::new(self.blocks.get(index)?.load(Acquire))
	}
}

/// The top-level array of published block groups.
pub(crate) struct GroupIndex<T: Resource> {
	groups: [AtomicPtr<BlockGroup<T>>; MAX_BLOCK_NGROUP],
}

// Safety: null pointers are valid.
unsafe impl<T: Resource> Zeroable for GroupIndex<T> { }

impl<T: Resource> GroupIndex<T> {
	/// Allocates an empty index directly on the heap.
	pub fn alloc() -> Option<Box<Self>> {
		try_zeroed_box().ok()
	}

	/// Returns the group published at `index`, if any.
	#[inline]
	pub fn get(&self, index: usize) -> Option<&BlockGroup<T>> {
		let group = self.groups.get(index)?.load(Acquire);
		unsafe { group.as_ref() }
	}

	pub fn publish(&self, index: usize, group: NonNull<BlockGroup<T>>) {
		self.groups[index].store(group.as_ptr(), Release)
	}

	/// Unpublishes the group at `index`, returning it.
	#[cfg_attr(not(feature = "teardown"), allow(dead_code))]
	pub fn take(&self, index: usize) -> Option<NonNull<BlockGroup<T>>> {
		NonNull::new(self.groups[index].swap(ptr::null_mut(), Relaxed))
	}
}
