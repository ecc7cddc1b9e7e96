use eqflow::capture::{capacity_for, RingBuffer, StoreStatus};
use eqflow::RingBufferError;
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

fn frames(start: usize, count: usize) -> Vec<Vec<f32>> {
    vec![
        (start..start + count).map(|i| i as f32).collect(),
        (start..start + count).map(|i| i as f32 + 0.5).collect(),
    ]
}

#[test]
fn two_contiguous_stores_read_back_in_order() {
    let ring = RingBuffer::new(2, 4096);
    let reader = ring.add_reader(0).unwrap();

    assert_eq!(ring.store(&frames(0, 1024), 1024, 0), Ok(StoreStatus::Contiguous));
    assert_eq!(ring.store(&frames(1024, 1024), 1024, 1024), Ok(StoreStatus::Contiguous));

    let mut out = vec![vec![0.0f32; 2048]; 2];
    assert_eq!(ring.fetch(reader, &mut out, 2048), Ok(2048));
    for i in 0..2048 {
        assert_eq!(out[0][i], i as f32);
        assert_eq!(out[1][i], i as f32 + 0.5);
    }
    assert_eq!(ring.overruns(), 0);
}

#[test]
fn capacity_follows_device_buffer_size() {
    let ring = RingBuffer::new(2, capacity_for(512, 16));
    assert_eq!(ring.capacity(), 8192);

    // non power of two sizes round up
    assert_eq!(RingBuffer::new(2, capacity_for(471, 4)).capacity(), 2048);
}

#[test]
fn lagging_reader_sees_underrun_not_stale_data() {
    let ring = RingBuffer::new(2, 1024);
    let reader = ring.add_reader(0).unwrap();

    for block in 0..4 {
        let start = block * 512;
        ring.store(&frames(start, 512), 512, start as i64).unwrap();
    }

    let mut out = vec![vec![0.0f32; 256]; 2];
    assert!(matches!(
        ring.fetch(reader, &mut out, 256),
        Err(RingBufferError::Underrun { lag: 2048, .. })
    ));
    assert!(out[0].iter().all(|&s| s == 0.0));

    let position = ring.resync(reader).unwrap();
    assert_eq!(position, 1024);
    assert_eq!(ring.fetch(reader, &mut out, 256), Ok(256));
    assert_eq!(out[0][0], 1024.0);
}

#[test]
fn back_pressure_refuses_to_overwrite_unread_frames() {
    let ring = RingBuffer::with_options(2, 1024, 4, true);
    let reader = ring.add_reader(0).unwrap();

    ring.store(&frames(0, 1024), 1024, 0).unwrap();
    assert_eq!(
        ring.store(&frames(1024, 1), 1, 1024),
        Err(RingBufferError::Overrun { reader: reader.index() })
    );
    assert_eq!(ring.overruns(), 1);

    let mut out = vec![vec![0.0f32; 512]; 2];
    ring.fetch(reader, &mut out, 512).unwrap();
    assert_eq!(ring.store(&frames(1024, 1), 1, 1024), Ok(StoreStatus::Contiguous));
}

#[test]
fn concurrent_reader_never_observes_torn_frames() {
    let ring = Arc::new(RingBuffer::new(2, 1024));
    let reader = ring.add_reader(0).unwrap();
    let total = 64 * 1024;

    let writer = {
        let ring = ring.clone();
        thread::spawn(move || {
            let mut t = 0;
            while t < total {
                ring.store(&frames(t, 128), 128, t as i64).unwrap();
                t += 128;
            }
        })
    };

    let mut out = vec![vec![0.0f32; 256]; 2];
    let mut reads = 0;
    while reads < 10_000 {
        match ring.fetch(reader, &mut out, 256) {
            Ok(n) => {
                let position = ring.reader_position(reader).unwrap() as usize;
                let first = position - n;
                for i in 0..n {
                    assert_eq!(out[0][i], (first + i) as f32);
                    assert_eq!(out[1][i], (first + i) as f32 + 0.5);
                }
                if position >= total {
                    break;
                }
            }
            Err(RingBufferError::Underrun { .. }) => {
                ring.resync(reader).unwrap();
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
        reads += 1;
    }
    writer.join().unwrap();
}

#[test]
fn rewinding_writer_never_mixes_timelines() {
    const SPAN: usize = 512;
    const ROUNDS: usize = 400;

    let ring = Arc::new(RingBuffer::new(1, 1024));
    let mut reader = ring.add_reader(0).unwrap();

    // every round rewrites times 0..SPAN with values tagged by the round
    let writer = {
        let ring = ring.clone();
        thread::spawn(move || {
            for round in 0..ROUNDS {
                let mut t = 0;
                while t < SPAN {
                    let block: Vec<f32> =
                        (t..t + 64).map(|i| (round * 10_000 + i) as f32).collect();
                    ring.store(&[block], 64, t as i64).unwrap();
                    t += 64;
                }
            }
        })
    };

    let mut out = vec![vec![0.0f32; 128]];
    while !writer.is_finished() {
        match ring.fetch(reader, &mut out, 128) {
            Ok(0) => {}
            Ok(n) => {
                let first = ring.reader_position(reader).unwrap() as usize - n;
                let round = out[0][0] as usize / 10_000;
                for i in 0..n {
                    assert_eq!(out[0][i], (round * 10_000 + first + i) as f32);
                }
                if first + n >= SPAN {
                    ring.remove_reader(reader);
                    reader = ring.add_reader(0).unwrap();
                }
            }
            Err(RingBufferError::Rewound { .. }) | Err(RingBufferError::Underrun { .. }) => {
                ring.remove_reader(reader);
                reader = ring.add_reader(0).unwrap();
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    writer.join().unwrap();
}

proptest! {
    #[test]
    fn write_cursor_is_sum_of_contiguous_stores(
        start in 0i64..100_000,
        sizes in proptest::collection::vec(1usize..300, 1..20),
    ) {
        let ring = RingBuffer::new(2, 8192);
        let reader = ring.add_reader(start).unwrap();

        let mut t = start;
        for &size in &sizes {
            let status = ring.store(&frames(t as usize, size), size, t).unwrap();
            prop_assert_eq!(status, StoreStatus::Contiguous);
            t += size as i64;
        }
        let total: usize = sizes.iter().sum();
        prop_assert_eq!(ring.write_cursor(), Some(start + total as i64));

        let mut out = vec![vec![0.0f32; total]; 2];
        prop_assert_eq!(ring.fetch(reader, &mut out, total), Ok(total));
        for i in 0..total {
            prop_assert_eq!(out[0][i], (start as usize + i) as f32);
        }
    }

    #[test]
    fn lag_beyond_capacity_always_fails(extra in 1usize..2048) {
        let ring = RingBuffer::new(1, 1024);
        let reader = ring.add_reader(0).unwrap();
        let data = vec![vec![1.0f32; 1024]];

        ring.store(&data, 1024, 0).unwrap();
        let tail = vec![vec![2.0f32; extra]];
        let mut t = 1024i64;
        let mut left = extra;
        while left > 0 {
            let n = left.min(1024);
            ring.store(&tail, n, t).unwrap();
            t += n as i64;
            left -= n;
        }

        let mut out = vec![vec![0.0f32; 16]];
        let is_underrun = matches!(
            ring.fetch(reader, &mut out, 16),
            Err(RingBufferError::Underrun { .. })
        );
        prop_assert!(is_underrun);
    }
}
