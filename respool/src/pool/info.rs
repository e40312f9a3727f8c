// SPDX-License-Identifier: Apache-2.0

use std::fmt::{self, Display, Formatter};
use crate::Resource;
use super::ResourcePool;

/// A point-in-time summary of a [`ResourcePool`], from
/// [`describe_resources`](ResourcePool::describe_resources).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct ResourcePoolInfo {
	/// The number of threads holding a local pool.
	pub local_pool_num: usize,
	/// The number of published block groups.
	pub block_group_num: usize,
	/// The number of claimed blocks.
	pub block_num: usize,
	/// The number of slots ever allocated, including reused and rejected ones.
	pub item_num: usize,
	/// The number of values per block.
	pub block_item_num: usize,
	/// The number of ids per free chunk.
	pub free_chunk_item_num: usize,
	/// The byte size of all claimed blocks' item storage.
	pub total_size: usize,
	/// The number of returned ids not yet reused, in local and global free lists.
	#[cfg(feature = "free-item-num")]
	pub free_item_num: usize,
}

impl ResourcePoolInfo {
	/// Creates an empty summary for a pool of `T`.
	pub(crate) fn empty<T: Resource>() -> Self {
		Self {
			block_item_num: ResourcePool::<T>::BLOCK_NITEM,
			free_chunk_item_num: ResourcePool::<T>::FREE_CHUNK_NITEM,
			..Self::default()
		}
	}
}

impl Display for ResourcePoolInfo {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		writeln!(f, "local_pool_num: {}", self.local_pool_num)?;
		writeln!(f, "block_group_num: {}", self.block_group_num)?;
		writeln!(f, "block_num: {}", self.block_num)?;
		writeln!(f, "item_num: {}", self.item_num)?;
		writeln!(f, "block_item_num: {}", self.block_item_num)?;
		writeln!(f, "free_chunk_item_num: {}", self.free_chunk_item_num)?;
		write!(f, "total_size: {}", self.total_size)?;
		#[cfg(feature = "free-item-num")]
		write!(f, "\nfree_item_num: {}", self.free_item_num)?;
		Ok(())
	}
}
