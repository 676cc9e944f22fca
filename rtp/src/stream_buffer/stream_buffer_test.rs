use std::sync::Arc;

use super::*;
use crate::frame::Expansion;

fn frame(ssrc: u32, seq: u16) -> Frame {
    Frame::encode(&Expansion {
        ssrc,
        sequence_number: seq,
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn test_new_rejects_zero_capacity() {
    assert!(StreamBuffer::new(0).is_err());
    assert!(StreamBuffer::new(1).is_ok());
}

#[test]
fn test_reorder_lookahead_get() {
    let buffer = StreamBuffer::new(10).unwrap();
    assert!(buffer.accept(1, 1));

    assert!(buffer.put(frame(1, 10)));
    assert_eq!(
        buffer.lookahead(),
        Lookahead {
            sequence_number: 10,
            frames_ready: 1
        }
    );

    assert!(buffer.put(frame(1, 13)));
    assert_eq!(
        buffer.lookahead(),
        Lookahead {
            sequence_number: 10,
            frames_ready: 1
        }
    );

    assert!(buffer.put(frame(1, 11)));
    assert_eq!(
        buffer.lookahead(),
        Lookahead {
            sequence_number: 10,
            frames_ready: 2
        }
    );

    assert!(buffer.put(frame(1, 12)));
    assert_eq!(
        buffer.lookahead(),
        Lookahead {
            sequence_number: 10,
            frames_ready: 4
        }
    );

    let mut out = Vec::new();
    assert_eq!(buffer.get(&mut out, 4), 4);
    let sequences: Vec<u16> = out.iter().map(|f| f.sequence_number()).collect();
    assert_eq!(sequences, vec![10, 11, 12, 13]);

    assert_eq!(buffer.lookahead(), Lookahead::default());
    let mut rest = Vec::new();
    assert_eq!(buffer.get(&mut rest, 4), 0);
}

#[test]
fn test_get_stops_at_gap() {
    let buffer = StreamBuffer::new(8).unwrap();
    assert!(buffer.accept(1, 1));

    assert!(buffer.put(frame(1, 20)));
    assert!(buffer.put(frame(1, 21)));
    assert!(buffer.put(frame(1, 23)));

    let mut out = Vec::new();
    assert_eq!(buffer.get(&mut out, 8), 2);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].sequence_number(), 20);
    assert_eq!(out[1].sequence_number(), 21);

    // 23 now sits two slots above the shifted window start 22
    assert_eq!(buffer.lookahead(), Lookahead::default());
    assert!(buffer.put(frame(1, 22)));
    assert_eq!(
        buffer.lookahead(),
        Lookahead {
            sequence_number: 22,
            frames_ready: 2
        }
    );
}

#[test]
fn test_admission_range_and_block() {
    let buffer = StreamBuffer::new(4).unwrap();

    // nothing admitted before accept
    assert!(!buffer.put(frame(1, 1)));

    // mis-ordered range is swapped
    assert!(buffer.accept(5, 2));
    assert!(buffer.put(frame(2, 1)));
    assert!(buffer.put(frame(5, 2)));
    assert!(!buffer.put(frame(1, 3)));
    assert!(!buffer.put(frame(6, 3)));

    // a range including SSRC 0 is refused
    assert!(!buffer.accept(0, 5));

    buffer.block(3);
    assert!(!buffer.put(frame(3, 4)));

    // blocking another SSRC unblocks the previous one
    buffer.block(4);
    assert!(buffer.put(frame(3, 4)));
    assert!(!buffer.put(frame(4, 5)));
}

#[test]
fn test_refuse_all() {
    let buffer = StreamBuffer::new(4).unwrap();
    assert!(buffer.accept(1, 10));
    assert!(buffer.put(frame(5, 1)));

    buffer.refuse_all();
    assert!(!buffer.put(frame(5, 2)));
    assert_eq!(buffer.lookahead(), Lookahead::default());
}

#[test]
fn test_duplicate_rejected() {
    let buffer = StreamBuffer::new(4).unwrap();
    assert!(buffer.accept(1, 1));

    assert!(buffer.put(frame(1, 7)));
    assert!(!buffer.put(frame(1, 7)));

    let mut out = Vec::new();
    assert_eq!(buffer.get(&mut out, 4), 1);
}

#[test]
fn test_misses_trigger_reset_to_latest_sequence() {
    let _ = env_logger::builder().is_test(true).try_init();

    let buffer = StreamBuffer::new(4).unwrap();
    assert!(buffer.accept(1, 1));

    assert!(buffer.put(frame(1, 100)));

    for seq in 1000..1004 {
        assert!(!buffer.put(frame(1, seq)));
        assert_eq!(buffer.reset_count(), 0);
    }

    // fifth consecutive miss resets the stream
    assert!(!buffer.put(frame(1, 1004)));
    assert_eq!(buffer.reset_count(), 1);
    assert_eq!(buffer.lookahead(), Lookahead::default());

    // the next admitted frame opens the window at its own sequence
    assert!(buffer.put(frame(1, 1005)));
    assert_eq!(
        buffer.lookahead(),
        Lookahead {
            sequence_number: 1005,
            frames_ready: 1
        }
    );
}

#[test]
fn test_in_window_put_clears_miss_count() {
    let buffer = StreamBuffer::new(4).unwrap();
    assert!(buffer.accept(1, 1));
    assert!(buffer.put(frame(1, 10)));

    for round in 0..3u16 {
        for seq in 0..4u16 {
            assert!(!buffer.put(frame(1, 2000 + round * 4 + seq)));
        }
        // an in-window frame resets the consecutive miss count
        assert!(buffer.put(frame(1, 11 + round)));
    }
    assert_eq!(buffer.reset_count(), 0);
}

#[test]
fn test_window_wraps_sequence_space() {
    let buffer = StreamBuffer::new(4).unwrap();
    assert!(buffer.accept(1, 1));

    assert!(buffer.put(frame(1, 65534)));
    assert!(buffer.put(frame(1, 65535)));
    assert!(buffer.put(frame(1, 0)));
    assert!(buffer.put(frame(1, 1)));

    assert_eq!(
        buffer.lookahead(),
        Lookahead {
            sequence_number: 65534,
            frames_ready: 4
        }
    );

    let mut out = Vec::new();
    assert_eq!(buffer.get(&mut out, 4), 4);
    let sequences: Vec<u16> = out.iter().map(|f| f.sequence_number()).collect();
    assert_eq!(sequences, vec![65534, 65535, 0, 1]);

    // window start wrapped to 2
    assert!(buffer.put(frame(1, 2)));
    assert_eq!(
        buffer.lookahead(),
        Lookahead {
            sequence_number: 2,
            frames_ready: 1
        }
    );
}

#[test]
fn test_each_pair_drained_at_most_once() {
    let buffer = StreamBuffer::new(16).unwrap();
    assert!(buffer.accept(1, 1));

    let puts: Vec<u16> = vec![5, 7, 5, 6, 9, 7, 8, 5, 6, 10];
    for seq in puts {
        buffer.put(frame(1, seq));
    }

    let mut out = Vec::new();
    buffer.get(&mut out, 16);

    let mut seen = std::collections::HashSet::new();
    for f in &out {
        assert!(seen.insert((f.ssrc(), f.sequence_number())));
    }
}

#[test]
fn test_random_insertion_order_drains_sorted() {
    use rand::seq::SliceRandom;

    let mut rng = rand::thread_rng();

    for _ in 0..32 {
        let buffer = StreamBuffer::new(32).unwrap();
        assert!(buffer.accept(1, 1));

        // the first frame anchors the window, the rest arrive shuffled
        assert!(buffer.put(frame(1, 300)));
        let mut sequences: Vec<u16> = (301..332).collect();
        sequences.shuffle(&mut rng);
        for seq in &sequences {
            assert!(buffer.put(frame(1, *seq)));
        }

        let mut out = Vec::new();
        assert_eq!(buffer.get(&mut out, 32), 32);
        let drained: Vec<u16> = out.iter().map(|f| f.sequence_number()).collect();
        let expected: Vec<u16> = (300..332).collect();
        assert_eq!(drained, expected);
    }
}

#[test]
fn test_parallel_put_and_get() {
    let _ = env_logger::builder().is_test(true).try_init();

    let buffer = Arc::new(StreamBuffer::new(64).unwrap());
    assert!(buffer.accept(1, 1));
    // a slow consumer must stall the producer, never reset the stream
    buffer.set_max_misses(usize::MAX);

    let producer = {
        let buffer = Arc::clone(&buffer);
        std::thread::spawn(move || {
            for seq in 0..512u16 {
                while !buffer.put(frame(1, seq)) {
                    std::thread::yield_now();
                }
            }
        })
    };

    let mut drained = 0;
    let mut out = Vec::new();
    while drained < 512 {
        let n = buffer.get(&mut out, 16);
        if n == 0 {
            std::thread::yield_now();
        }
        drained += n;
    }

    producer.join().unwrap();

    let sequences: Vec<u16> = out.iter().map(|f| f.sequence_number()).collect();
    let expected: Vec<u16> = (0..512).collect();
    assert_eq!(sequences, expected);
}
