//! Property tests for the write buffer: random admit/flush/release
//! interleavings must preserve slot conservation, sector accounting, and
//! the check-then-admit contract.

use nandsim::{SsdParams, WriteBuffer, SSD_PARTITIONS};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

const CAPACITY: u64 = 64 * 1024 * 1024 * 1024;
const LPN_SPACE: u64 = 96;

#[derive(Clone, Debug)]
enum Op {
    Allocate { lpn: u64, npages: u64, offset: u32 },
    MarkFlush { pick: usize, stamp: u64 },
    Release { stamp: u64 },
    Refill,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        5 => (0..LPN_SPACE, 1u64..=4, 0u32..8)
            .prop_map(|(lpn, npages, offset)| Op::Allocate { lpn, npages, offset }),
        3 => (0usize..16, 1u64..=4).prop_map(|(pick, stamp)| Op::MarkFlush { pick, stamp }),
        3 => (1u64..=4).prop_map(|stamp| Op::Release { stamp }),
        1 => Just(Op::Refill),
    ]
}

fn check_invariants(buf: &WriteBuffer) -> Result<(), TestCaseError> {
    // Every slot is on exactly one of the two lists
    prop_assert_eq!(
        buf.free_slot_count() + buf.used_slot_count(),
        buf.slots_per_buffer()
    );

    // free_sectors always complements the dirty bitmap
    for lpn in 0..LPN_SPACE {
        if let Some(page) = buf.search(lpn) {
            let dirty = page.sectors().iter().filter(|s| **s).count() as u32;
            prop_assert_eq!(page.free_sectors() + dirty, buf.sectors_per_page() as u32);
            prop_assert_eq!(page.lpn(), lpn);
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn buffer_ops_maintain_invariants(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let sp = SsdParams::new(CAPACITY, SSD_PARTITIONS).unwrap();
        let buf = WriteBuffer::new(sp.write_buffer_size, &sp);
        let sector = sp.sector_size as u64;
        let page = sp.page_size as u64;

        // (slot, stamp) pairs currently frozen for flushing
        let mut flushing: Vec<(usize, u64)> = Vec::new();

        for op in ops {
            match op {
                Op::Allocate { lpn, npages, offset } => {
                    let end = lpn + npages - 1;
                    let size =
                        (sp.sectors_per_page - offset) as u64 * sector + (npages - 1) * page;

                    // An uncontended admit must honor its own check
                    let admissible = buf.allocatable(lpn, end, offset, size);
                    let result = buf.allocate(lpn, end, offset, size);
                    prop_assert_eq!(admissible, result.is_ok());
                }
                Op::MarkFlush { pick, stamp } => {
                    let candidates = buf.flush_candidates();
                    if !candidates.is_empty() {
                        let sid = candidates[pick % candidates.len()];
                        buf.mark_for_flush(sid, stamp).unwrap();
                        flushing.push((sid, stamp));
                    }
                }
                Op::Release { stamp } => {
                    let expected = flushing.iter().any(|&(_, s)| s == stamp);
                    prop_assert_eq!(buf.release(stamp), expected);
                    flushing.retain(|&(_, s)| s != stamp);
                }
                Op::Refill => {
                    buf.refill();
                    flushing.clear();
                }
            }
            check_invariants(&buf)?;
        }

        // Emergency reclaim restores the pristine free list
        buf.refill();
        prop_assert_eq!(buf.used_slot_count(), 0);
        prop_assert_eq!(buf.free_slot_count(), buf.slots_per_buffer());
        prop_assert_eq!(
            buf.free_page_count(),
            buf.slots_per_buffer() * buf.pages_per_slot()
        );
    }
}
