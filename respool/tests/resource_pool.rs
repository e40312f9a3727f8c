// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};
use pretty_assertions::assert_eq;
use quickcheck::TestResult;
use quickcheck_macros::quickcheck;
use respool::{
	address_resource,
	describe_resources,
	get_resource,
	get_resource_from,
	get_resource_with,
	return_resource,
	clear_resources,
	ResourceId,
	ResourcePool,
	Resource,
	PoolError,
};

#[macro_use]
mod common;

#[derive(Debug, Default)]
struct Quad(u64);

respool::resource!(Quad { const BLOCK_MAX_ITEM: usize = 4; });

#[test]
fn fifth_get_publishes_second_block() {
	let got: Vec<_> = (0..5).map(|_| get_resource::<Quad>().unwrap()).collect();
	let ids: Vec<u64> = got.iter().map(|(id, _)| id.value()).collect();
	assert_eq!(ids, [0, 1, 2, 3, 4]);

	let info = describe_resources::<Quad>();
	assert_eq!(info.block_num, 2);
	assert_eq!(info.block_group_num, 1);
	assert_eq!(info.item_num, 5);

	let (id2, ptr2) = got[2];
	return_resource(id2).unwrap();
	let (id, ptr) = get_resource::<Quad>().unwrap();
	assert_eq!(id, id2);
	assert_eq!(ptr, ptr2);
}

#[derive(Default)]
struct Echo(u32);

respool::resource!(Echo);

#[test]
fn returned_id_is_reused_first() {
	let (id, _) = get_resource::<Echo>().unwrap();
	return_resource(id).unwrap();
	let (reused, _) = get_resource::<Echo>().unwrap();
	assert_eq!(reused, id);

	// LIFO: the last id returned comes back first.
	let (other, _) = get_resource::<Echo>().unwrap();
	assert_ne!(other, reused);
	return_resource(reused).unwrap();
	return_resource(other).unwrap();
	assert_eq!(get_resource::<Echo>().unwrap().0, other);
	assert_eq!(get_resource::<Echo>().unwrap().0, reused);
}

struct Counter {
	count: u32,
}

respool::resource!(Counter);

#[test]
fn reused_values_keep_their_state() {
	let (id, mut ptr) = get_resource_with(|| Counter { count: 1 }).unwrap();
	unsafe { ptr.as_mut().count = 5 }
	return_resource(id).unwrap();

	let (reused, ptr) = get_resource_with::<Counter>(|| unreachable!("reused ids are not reconstructed")).unwrap();
	assert_eq!(reused, id);
	assert_eq!(unsafe { ptr.as_ref() }.count, 5);
}

#[derive(Default)]
struct Stable([u8; 24]);

respool::resource!(Stable { const BLOCK_MAX_ITEM: usize = 8; });

#[test]
fn addresses_are_stable() {
	let (id, ptr) = get_resource::<Stable>().unwrap();
	assert_eq!(address_resource(id), Some(ptr));

	// Still resolves, to the same stale slot, between return and reuse.
	return_resource(id).unwrap();
	assert_eq!(address_resource(id), Some(ptr));
	let (again, _) = get_resource::<Stable>().unwrap();
	assert_eq!(again, id);
	assert_eq!(address_resource(again), Some(ptr));
}

#[derive(Default)]
struct Sparse(u64);

respool::resource!(Sparse { const BLOCK_MAX_ITEM: usize = 8; });

#[test]
fn out_of_range_ids_resolve_to_none() {
	let (id, ptr) = get_resource::<Sparse>().unwrap();
	assert_eq!(id.value(), 0);
	assert_eq!(address_resource(id), Some(ptr));

	// Past the block's bump cursor, past any published block, past the index.
	assert_eq!(address_resource(ResourceId::<Sparse>::new(1)), None);
	assert_eq!(address_resource(ResourceId::<Sparse>::new(8 * 1024)), None);
	assert_eq!(address_resource(ResourceId::<Sparse>::new(u64::MAX)), None);
}

struct Untouched;

respool::resource!(Untouched);

#[test]
fn unused_pool_resolves_nothing() {
	assert_eq!(address_resource(ResourceId::<Untouched>::new(0)), None);
	clear_resources::<Untouched>();
	let info = describe_resources::<Untouched>();
	assert_eq!(info.block_num, 0);
	assert_eq!(info.local_pool_num, 0);
	assert!(Untouched::__pool().get().is_none(), "reads never create the pool");
}

struct Rejected(u8);

respool::resource!(Rejected {
	const BLOCK_MAX_ITEM: usize = 4;

	fn validate(&self) -> bool { self.0 == 0 }
});

#[test]
fn rejected_values_fail_allocation() {
	for _ in 0..3 {
		assert!(get_resource_with(|| Rejected(1)).is_none());
	}

	let info = describe_resources::<Rejected>();
	assert_eq!(info.item_num, 3, "rejected slots stay consumed");
	assert_eq!(info.block_num, 1);
}

static FLAKY_DROPS: AtomicUsize = AtomicUsize::new(0);

struct Flaky {
	valid: bool,
}

impl Drop for Flaky {
	fn drop(&mut self) {
		FLAKY_DROPS.fetch_add(1, Ordering::Relaxed);
	}
}

respool::resource!(Flaky {
	fn validate(&self) -> bool { self.valid }
});

#[test]
fn rejected_slot_is_not_reused() {
	assert!(get_resource_with(|| Flaky { valid: false }).is_none());
	assert_eq!(FLAKY_DROPS.load(Ordering::Relaxed), 1, "the rejected value is dropped");

	let (id, _) = get_resource_with(|| Flaky { valid: true }).unwrap();
	assert_eq!(id.value(), 1);
	assert_eq!(describe_resources::<Flaky>().item_num, 2);

	// Returning never drops.
	return_resource(id).unwrap();
	assert_eq!(FLAKY_DROPS.load(Ordering::Relaxed), 1);
}

#[derive(Default)]
struct Reentrant(u8);

respool::resource!(Reentrant);

#[test]
fn reentrant_init_is_refused() {
	let (outer, _) = get_resource::<Reentrant>().unwrap();

	let mut nested = None;
	let (id, ptr) = get_resource_with(|| {
		let get = get_resource_with(|| Reentrant(2)).map(|(id, _)| id);
		nested = Some((get, return_resource(outer)));
		Reentrant(1)
	}).unwrap();
	assert_eq!(nested, Some((None, Err(PoolError::NoLocalPool))));
	assert_eq!(unsafe { ptr.as_ref() }.0, 1);
	assert_eq!(describe_resources::<Reentrant>().item_num, 2, "the nested get took no slot");

	// The local pool is usable again once the outer call returns.
	return_resource(outer).unwrap();
	return_resource(id).unwrap();
	assert_eq!(get_resource::<Reentrant>().unwrap().0, id);
}

static SELF_CHECK_REFUSED: AtomicUsize = AtomicUsize::new(0);

struct SelfChecked;

respool::resource!(SelfChecked {
	fn validate(&self) -> bool {
		if get_resource_with(|| SelfChecked).is_none() {
			SELF_CHECK_REFUSED.fetch_add(1, Ordering::Relaxed);
		}
		if return_resource(ResourceId::<SelfChecked>::new(0)) == Err(PoolError::NoLocalPool) {
			SELF_CHECK_REFUSED.fetch_add(1, Ordering::Relaxed);
		}
		true
	}
});

#[test]
fn reentrant_validate_is_refused() {
	let (first, _) = get_resource_with(|| SelfChecked).unwrap();
	let (second, _) = get_resource_with(|| SelfChecked).unwrap();
	assert_eq!((first.value(), second.value()), (0, 1));
	assert_eq!(SELF_CHECK_REFUSED.load(Ordering::Relaxed), 4);
	assert_eq!(describe_resources::<SelfChecked>().item_num, 2);

	// Reused values skip validation.
	return_resource(second).unwrap();
	assert_eq!(get_resource_with(|| SelfChecked).unwrap().0, second);
	assert_eq!(SELF_CHECK_REFUSED.load(Ordering::Relaxed), 4);
}

#[derive(Debug, Eq, PartialEq)]
struct Named(String);

impl From<&str> for Named {
	fn from(value: &str) -> Self { Self(value.to_owned()) }
}

respool::resource!(Named);

#[test]
fn get_from_converts_new_values() {
	let (id, ptr) = get_resource_from::<Named, _>("first").unwrap();
	assert_eq!(unsafe { ptr.as_ref() }, &Named("first".into()));
	return_resource(id).unwrap();

	let (_, ptr) = get_resource_from::<Named, _>("second").unwrap();
	assert_eq!(unsafe { ptr.as_ref() }, &Named("first".into()), "reused values are not converted");
}

#[derive(Default)]
struct Grow(u16);

respool::resource!(Grow {
	const BLOCK_MAX_ITEM: usize = 8;
	const FREE_CHUNK_MAX_ITEM: usize = 4;
});

#[test]
fn storage_never_shrinks() {
	let mut last = describe_resources::<Grow>();
	for round in 1..=4 {
		let ids: Vec<_> = (0..round * 10).map(|_| get_resource::<Grow>().unwrap().0).collect();
		for id in ids {
			return_resource(id).unwrap();
			let info = describe_resources::<Grow>();
			assert!(info.block_num >= last.block_num);
			assert!(info.block_group_num >= last.block_group_num);
			assert!(info.item_num >= last.item_num);
			last = info;
		}
	}
	assert_eq!(last.total_size, last.block_num * 8 * std::mem::size_of::<Grow>());
}

#[derive(Default)]
struct Described(u64);

respool::resource!(Described {
	const BLOCK_MAX_ITEM: usize = 16;
	const FREE_CHUNK_MAX_ITEM: usize = 4;
});

#[test]
fn describe_reports_tunables_and_counts() {
	let (id, _) = get_resource::<Described>().unwrap();
	let info = describe_resources::<Described>();
	assert_eq!(info.block_item_num, ResourcePool::<Described>::BLOCK_NITEM);
	assert_eq!(info.block_item_num, 16);
	assert_eq!(info.free_chunk_item_num, 4);
	assert_eq!(info.local_pool_num, 1);
	assert_eq!(info.block_num, 1);
	assert_eq!(info.total_size, 16 * 8);
	#[cfg(feature = "free-item-num")]
	assert_eq!(info.free_item_num, 0);

	return_resource(id).unwrap();
	#[cfg(feature = "free-item-num")]
	assert_eq!(describe_resources::<Described>().free_item_num, 1);

	get_resource::<Described>().unwrap();
	#[cfg(feature = "free-item-num")]
	assert_eq!(describe_resources::<Described>().free_item_num, 0);

	let text = describe_resources::<Described>().to_string();
	assert!(text.starts_with("local_pool_num: 1\n"));
}

#[derive(Default)]
struct Cleared(u64);

respool::resource!(Cleared);

#[test]
fn clear_retires_local_pool() {
	let (id, _) = get_resource::<Cleared>().unwrap();
	return_resource(id).unwrap();
	assert_eq!(describe_resources::<Cleared>().local_pool_num, 1);

	clear_resources::<Cleared>();
	assert_eq!(describe_resources::<Cleared>().local_pool_num, 0);
	#[cfg(feature = "free-item-num")]
	assert_eq!(describe_resources::<Cleared>().free_item_num, 1);

	// A new local pool picks the flushed id up from the global list.
	let (reused, _) = get_resource::<Cleared>().unwrap();
	assert_eq!(reused, id);
	assert_eq!(describe_resources::<Cleared>().local_pool_num, 1);
}

#[derive(Default)]
struct Tagged(u64);

respool::resource!(Tagged {
	const BLOCK_MAX_ITEM: usize = 8;
	const FREE_CHUNK_MAX_ITEM: usize = 4;
});

/// Replays random get/return sequences, checking that live ids never collide and
/// that every live value keeps what was written to it.
#[quickcheck]
fn live_ids_are_distinct(ops: Vec<bool>) -> TestResult {
	let mut live = Vec::new();
	for (tag, get) in ops.into_iter().enumerate() {
		if get || live.is_empty() {
			let (id, mut ptr) = get_resource::<Tagged>().unwrap();
			unsafe { ptr.as_mut().0 = tag as u64 }
			live.push((id, ptr, tag as u64));
		} else {
			let (id, ..) = live.swap_remove(tag % live.len());
			return_resource(id).unwrap();
		}
	}

	let distinct = common::all_distinct(live.iter().map(|(id, ..)| *id));
	let intact = live.iter().all(|&(id, ptr, tag)|
		address_resource(id) == Some(ptr) && unsafe { ptr.as_ref() }.0 == tag
	);

	for &(id, ..) in &live {
		return_resource(id).unwrap();
	}

	if !distinct {
		return TestResult::error("an id was handed out twice")
	}
	qc_assert_eq!(intact, true, "live values were overwritten")
}
