use std::num::NonZeroU64;

use nonzero_ext::nonzero;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{BlockHandle, BufferTarget, HostDevice, Vbo, VboError, VboState};

fn layout(vbo: &Vbo) -> Vec<(u64, u64, bool)> {
    vbo.blocks()
        .map(|block| (block.offset(), block.capacity(), block.is_free()))
        .collect()
}

fn active(capacity: NonZeroU64) -> (HostDevice, Vbo) {
    let mut device = HostDevice::new();
    let mut vbo = Vbo::new(BufferTarget::Vertex, capacity);
    vbo.activate(&mut device).unwrap();
    (device, vbo)
}

#[test]
fn simple_allocate_free() {
    let (mut device, mut vbo) = active(nonzero!(1024u64));

    let block = vbo.allocate_block(&mut device, nonzero!(100u64)).unwrap();
    assert_eq!(vbo.block_offset(&block).unwrap(), 0);
    assert_eq!(block.capacity(), 100);
    assert_eq!(layout(&vbo), vec![(0, 100, false), (100, 924, true)]);

    vbo.free_block(block).unwrap();
    assert_eq!(layout(&vbo), vec![(0, 1024, true)]);
    assert_eq!(vbo.free_capacity(), 1024);
}

#[test]
fn fragmentation_and_coalescing() {
    let (mut device, mut vbo) = active(nonzero!(1024u64));

    let a = vbo.allocate_block(&mut device, nonzero!(100u64)).unwrap();
    let b = vbo.allocate_block(&mut device, nonzero!(200u64)).unwrap();
    let c = vbo.allocate_block(&mut device, nonzero!(300u64)).unwrap();
    assert_eq!(vbo.block_offset(&a).unwrap(), 0);
    assert_eq!(vbo.block_offset(&b).unwrap(), 100);
    assert_eq!(vbo.block_offset(&c).unwrap(), 300);

    vbo.free_block(b).unwrap();
    assert_eq!(
        layout(&vbo),
        vec![
            (0, 100, false),
            (100, 200, true),
            (300, 300, false),
            (600, 424, true)
        ]
    );

    vbo.free_block(a).unwrap();
    assert_eq!(
        layout(&vbo),
        vec![(0, 300, true), (300, 300, false), (600, 424, true)]
    );

    vbo.free_block(c).unwrap();
    assert_eq!(layout(&vbo), vec![(0, 1024, true)]);
}

#[test]
fn free_merges_into_previous() {
    let (mut device, mut vbo) = active(nonzero!(300u64));
    let a = vbo.allocate_block(&mut device, nonzero!(100u64)).unwrap();
    let b = vbo.allocate_block(&mut device, nonzero!(100u64)).unwrap();
    vbo.allocate_block(&mut device, nonzero!(100u64)).unwrap();

    vbo.free_block(a).unwrap();
    vbo.free_block(b).unwrap();
    assert_eq!(layout(&vbo), vec![(0, 200, true), (200, 100, false)]);
    assert_eq!(vbo.free_capacity(), 200);
    assert_eq!(vbo.free_list().len(), 1);
}

#[test]
fn best_fit() {
    let (mut device, mut vbo) = active(nonzero!(620u64));
    let blocks: Vec<BlockHandle> = [50u64, 10, 150, 10, 400]
        .into_iter()
        .map(|capacity| {
            vbo.allocate_block(&mut device, NonZeroU64::new(capacity).unwrap())
                .unwrap()
        })
        .collect();
    vbo.free_block(blocks[0]).unwrap();
    vbo.free_block(blocks[2]).unwrap();
    vbo.free_block(blocks[4]).unwrap();
    let free: Vec<u64> = vbo.free_list().iter().map(|(capacity, _)| capacity).collect();
    assert_eq!(free, vec![50, 150, 400]);

    let block = vbo.allocate_block(&mut device, nonzero!(120u64)).unwrap();
    assert_eq!(vbo.block_offset(&block).unwrap(), 60);
    assert_eq!(
        layout(&vbo),
        vec![
            (0, 50, true),
            (50, 10, false),
            (60, 120, false),
            (180, 30, true),
            (210, 10, false),
            (220, 400, true)
        ]
    );
    let free: Vec<u64> = vbo.free_list().iter().map(|(capacity, _)| capacity).collect();
    assert_eq!(free, vec![30, 50, 400]);
}

#[test]
fn growth_preserves_data() {
    let (mut device, mut vbo) = active(nonzero!(100u64));
    let old = vbo.allocate_block(&mut device, nonzero!(100u64)).unwrap();
    vbo.map(&mut device).unwrap();
    vbo.write_array(&mut device, &old, 0, &[0xAAu8; 100])
        .unwrap();
    vbo.unmap(&mut device).unwrap();

    let new = vbo.allocate_block(&mut device, nonzero!(50u64)).unwrap();
    assert_eq!(vbo.capacity(), 150);
    assert_eq!(vbo.block_offset(&old).unwrap(), 0);
    assert_eq!(vbo.block_offset(&new).unwrap(), 100);

    vbo.map(&mut device).unwrap();
    let bytes = vbo.mapped_bytes().unwrap();
    assert!(bytes[..100].iter().all(|&byte| byte == 0xAA));
    vbo.unmap(&mut device).unwrap();
    assert_eq!(device.live_buffer_count(), 1);
}

#[test]
fn growth_extends_free_tail() {
    let (mut device, mut vbo) = active(nonzero!(100u64));
    vbo.allocate_block(&mut device, nonzero!(80u64)).unwrap();

    // 20 bytes are free at the end, so only 40 more are needed: 100 -> 150.
    let block = vbo.allocate_block(&mut device, nonzero!(60u64)).unwrap();
    assert_eq!(vbo.capacity(), 150);
    assert_eq!(vbo.block_offset(&block).unwrap(), 80);
    assert_eq!(
        layout(&vbo),
        vec![(0, 80, false), (80, 60, false), (140, 10, true)]
    );
}

#[test]
fn growth_compounds_for_large_requests() {
    let (mut device, mut vbo) = active(nonzero!(100u64));
    vbo.allocate_block(&mut device, nonzero!(1000u64)).unwrap();
    // 100 -> 150 -> 225 -> 338 -> 507 -> 761 -> 1142
    assert_eq!(vbo.capacity(), 1142);
    assert_eq!(vbo.free_capacity(), 142);
}

#[test]
fn allocate_on_inactive() {
    let mut device = HostDevice::new();
    let mut vbo = Vbo::new(BufferTarget::Vertex, nonzero!(1024u64));

    let err = vbo
        .allocate_block(&mut device, nonzero!(16u64))
        .unwrap_err();
    assert!(matches!(err, VboError::AllocatorInactive));
    assert!(err.is_contract_violation());
    assert_eq!(layout(&vbo), vec![(0, 1024, true)]);
    assert_eq!(vbo.state(), VboState::Inactive);
    assert_eq!(device.created_count(), 0);
}

struct Live {
    handle: BlockHandle,
    fill: u8,
}

/// Checks that no two allocated blocks overlap and that each still holds its fill byte.
fn check_live(vbo: &mut Vbo, live: &[Live]) {
    let mut ranges: Vec<(u64, u64)> = live
        .iter()
        .map(|l| {
            let offset = vbo.block_offset(&l.handle).unwrap();
            (offset, offset + l.handle.capacity())
        })
        .collect();
    ranges.sort_unstable();
    assert!(ranges.windows(2).all(|pair| pair[0].1 <= pair[1].0));

    let bytes = vbo.mapped_bytes().unwrap().to_vec();
    for l in live {
        let offset = vbo.block_offset(&l.handle).unwrap() as usize;
        let end = offset + l.handle.capacity() as usize;
        assert!(
            bytes[offset..end].iter().all(|&byte| byte == l.fill),
            "block at {offset} lost its contents"
        );
    }
}

#[test]
fn random_operations_keep_invariants() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let (mut device, mut vbo) = active(nonzero!(256u64));
    vbo.map(&mut device).unwrap();

    let mut live: Vec<Live> = vec![];
    let mut pending: Vec<Live> = vec![];

    for step in 0..2000 {
        match rng.gen_range(0..10) {
            0..=4 => {
                let capacity = NonZeroU64::new(rng.gen_range(1..=300)).unwrap();
                let handle = vbo.allocate_block(&mut device, capacity).unwrap();
                let fill = (step % 251) as u8;
                vbo.write_array(&mut device, &handle, 0, &vec![fill; capacity.get() as usize])
                    .unwrap();
                live.push(Live { handle, fill });
            }
            5..=6 if !live.is_empty() => {
                let l = live.swap_remove(rng.gen_range(0..live.len()));
                vbo.free_block(l.handle).unwrap();
            }
            7 if !live.is_empty() => {
                let l = live.swap_remove(rng.gen_range(0..live.len()));
                vbo.enqueue_block_for_freeing(l.handle).unwrap();
                pending.push(l);
            }
            8 => {
                // Queued blocks keep their bytes until the flush.
                check_live(&mut vbo, &pending);
                vbo.free_pending_blocks().unwrap();
                pending.clear();
            }
            9 => {
                let delta = NonZeroU64::new(rng.gen_range(1..=128)).unwrap();
                vbo.unmap(&mut device).unwrap();
                vbo.increase_capacity(&mut device, delta).unwrap();
                vbo.map(&mut device).unwrap();
            }
            _ => {}
        }

        vbo.check_consistency()
            .unwrap_or_else(|e| panic!("step {step}: {e}\n{vbo:?}"));
        check_live(&mut vbo, &live);
    }

    let used: u64 = live
        .iter()
        .chain(&pending)
        .map(|l| l.handle.capacity())
        .sum();
    assert_eq!(vbo.used_capacity(), used);
    vbo.destroy(&mut device).unwrap();
    assert_eq!(device.live_buffer_count(), 0);
}
