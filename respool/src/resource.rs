// SPDX-License-Identifier: Apache-2.0

use std::mem::size_of;
use std::thread::LocalKey;
use once_cell::sync::OnceCell;
use crate::pool::{LocalSlot, ResourcePool};

/// A type that can be pooled, along with its pool tunables.
///
/// The tunables are compile-time constants, letting every pooled type trade
/// memory for contention independently:
///
/// - [`BLOCK_MAX_SIZE`](Self::BLOCK_MAX_SIZE) and [`BLOCK_MAX_ITEM`](Self::BLOCK_MAX_ITEM)
///   bound the size of a block, the unit of storage growth. A block holds the
///   lesser of `BLOCK_MAX_ITEM` values and as many values as fit in
///   `BLOCK_MAX_SIZE` bytes, but never less than one.
/// - [`FREE_CHUNK_MAX_ITEM`](Self::FREE_CHUNK_MAX_ITEM) bounds the number of
///   returned ids a thread caches before spilling them to the shared free list,
///   capped at the block item count.
///
/// Implement this trait with the [`resource!`](crate::resource) macro, which also
/// declares the type's pool singleton and thread-local state:
///
/// ```
/// #[derive(Default)]
/// struct Connection { fd: i32 }
///
/// respool::resource!(Connection {
/// 	const BLOCK_MAX_ITEM: usize = 64;
///
/// 	fn validate(&self) -> bool { self.fd >= 0 }
/// });
///
/// let (id, _) = respool::get_resource::<Connection>().unwrap();
/// respool::return_resource(id).unwrap();
/// ```
pub trait Resource: Send + Sized + 'static {
	/// The maximum byte size of a block.
	const BLOCK_MAX_SIZE: usize = 64 * 1024;
	/// The maximum number of values in a block.
	const BLOCK_MAX_ITEM: usize = 256;
	/// The maximum number of ids in a free chunk.
	const FREE_CHUNK_MAX_ITEM: usize = 256;

	/// Checks a newly constructed value; returning `false` fails the allocation,
	/// dropping the value. Recycled values are never validated again.
	fn validate(&self) -> bool { true }

	#[doc(hidden)]
	fn __pool() -> &'static OnceCell<ResourcePool<Self>>;

	#[doc(hidden)]
	fn __local() -> &'static LocalKey<LocalSlot<Self>>;
}

const fn min(a: usize, b: usize) -> usize { if a < b { a } else { b } }
const fn max(a: usize, b: usize) -> usize { if a > b { a } else { b } }

/// Returns the number of values in a block of `T`.
pub(crate) const fn block_nitem<T: Resource>() -> usize {
	let size = size_of::<T>();
	let fits = if size == 0 {
		T::BLOCK_MAX_ITEM
	} else {
		max(T::BLOCK_MAX_SIZE / size, 1)
	};
	max(min(fits, T::BLOCK_MAX_ITEM), 1)
}

/// Returns the number of ids in a full free chunk of `T`.
pub(crate) const fn free_chunk_nitem<T: Resource>() -> usize {
	max(min(T::FREE_CHUNK_MAX_ITEM, block_nitem::<T>()), 1)
}

/// Implements [`Resource`] for one or more concrete types, declaring the pool
/// singleton and thread-local state for each.
///
/// With a trailing block, the block's contents are pasted into the impl, so
/// tunables and the validator are written as they would be by hand:
///
/// ```
/// # #[derive(Default)] struct Small(u8);
/// # #[derive(Default)] struct Plain(u64);
/// # #[derive(Default)] struct Other(u32);
/// respool::resource!(Small { const BLOCK_MAX_ITEM: usize = 4; });
/// respool::resource!(Plain, Other);
/// ```
///
/// Generic types are not supported, since each type needs its own statics.
#[macro_export]
macro_rules! resource {
	($ty:ty { $($body:tt)* }) => {
		impl $crate::Resource for $ty {
			$($body)*

			fn __pool() -> &'static $crate::__private::OnceCell<$crate::ResourcePool<Self>> {
				static POOL: $crate::__private::OnceCell<$crate::ResourcePool<$ty>> =
					$crate::__private::OnceCell::new();
				&POOL
			}

			fn __local() -> &'static ::std::thread::LocalKey<$crate::LocalSlot<Self>> {
				::std::thread_local! {
					static LOCAL: $crate::LocalSlot<$ty> = const { $crate::LocalSlot::new() };
				}
				&LOCAL
			}
		}
	};
	($($ty:ty),+ $(,)?) => {
		$($crate::resource!($ty { });)+
	};
}
