// SPDX-License-Identifier: Apache-2.0

use std::cmp::Ordering;
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// An opaque, 64-bit handle to one value in the [`ResourcePool`] of `T`.
///
/// Ids are plain values: copying or dropping one does nothing to the pool, and
/// an id may be resolved from any thread. An id is unique among the values that
/// are currently live in its pool, and may be handed out again once returned.
///
/// Ids of different types don't compare; re-typing one is always explicit, with
/// [`cast`](Self::cast).
///
/// [`ResourcePool`]: crate::ResourcePool
#[repr(transparent)]
pub struct ResourceId<T> {
	value: u64,
	_type: PhantomData<fn() -> T>,
}

impl<T> ResourceId<T> {
	/// Creates an id from its raw value.
	#[inline]
	pub const fn new(value: u64) -> Self {
		Self { value, _type: PhantomData }
	}

	/// Returns the raw value.
	#[inline]
	pub const fn value(self) -> u64 { self.value }

	/// Re-types the id. The value is unchanged; resolving the result against the
	/// pool of `U` is only meaningful if the id was issued by that pool.
	#[inline]
	pub const fn cast<U>(self) -> ResourceId<U> {
		ResourceId::new(self.value)
	}
}

impl<T> Clone for ResourceId<T> {
	#[inline]
	fn clone(&self) -> Self { *self }
}

impl<T> Copy for ResourceId<T> { }

impl<T> PartialEq for ResourceId<T> {
	#[inline]
	fn eq(&self, other: &Self) -> bool { self.value == other.value }
}

impl<T> Eq for ResourceId<T> { }

impl<T> PartialOrd for ResourceId<T> {
	#[inline]
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl<T> Ord for ResourceId<T> {
	#[inline]
	fn cmp(&self, other: &Self) -> Ordering { self.value.cmp(&other.value) }
}

impl<T> Hash for ResourceId<T> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.value.hash(state)
	}
}

impl<T> Debug for ResourceId<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("ResourceId")
		 .field(&self.value)
		 .finish()
	}
}

impl<T> Display for ResourceId<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		Display::fmt(&self.value, f)
	}
}

impl<T> From<ResourceId<T>> for u64 {
	#[inline]
	fn from(id: ResourceId<T>) -> Self { id.value }
}
