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

fn pairs(stage: &[Frame]) -> Vec<(u32, u16)> {
    stage
        .iter()
        .map(|f| (f.ssrc(), f.sequence_number()))
        .collect()
}

#[test]
fn test_config_default() {
    assert_eq!(FrameBufferConfig::default().max_stages, 2);

    // zero falls back to the default
    let buffer = FrameBuffer::new(FrameBufferConfig { max_stages: 0 });
    assert_eq!(buffer.max_stages, DEFAULT_MAX_STAGES);
}

#[test]
fn test_insert_without_displacement() {
    let mut buffer = FrameBuffer::new(FrameBufferConfig { max_stages: 3 });

    assert!(buffer.add(frame(2, 2)).is_none());
    assert!(buffer.add(frame(1, 2)).is_none());
    assert!(buffer.add(frame(2, 1)).is_none());
    assert!(buffer.add(frame(3, 3)).is_none());

    let stage = buffer.drain().unwrap();
    assert_eq!(pairs(&stage), vec![(1, 2), (2, 1), (3, 3)]);

    // the displaced younger frame of SSRC 2 moved to the next stage
    let stage = buffer.drain().unwrap();
    assert_eq!(pairs(&stage), vec![(2, 2)]);

    assert!(buffer.drain().is_none());
}

#[test]
fn test_duplicate_returned_to_caller() {
    let mut buffer = FrameBuffer::new(FrameBufferConfig::default());

    assert!(buffer.add(frame(1, 5)).is_none());
    let duplicate = buffer.add(frame(1, 5)).unwrap();
    assert_eq!(duplicate.ssrc(), 1);
    assert_eq!(duplicate.sequence_number(), 5);

    // the original frame stays buffered
    let stage = buffer.drain().unwrap();
    assert_eq!(pairs(&stage), vec![(1, 5)]);
}

#[test]
fn test_displacement_single_stage() {
    let mut buffer = FrameBuffer::new(FrameBufferConfig { max_stages: 1 });

    assert!(buffer.add(frame(1, 10)).is_none());

    let dropped = buffer.add(frame(1, 11)).unwrap();
    assert_eq!(dropped.sequence_number(), 10);

    let stage = buffer.drain().unwrap();
    assert_eq!(pairs(&stage), vec![(1, 11)]);
}

#[test]
fn test_displacement_shifts_stream_forward() {
    let mut buffer = FrameBuffer::new(FrameBufferConfig::default());

    assert!(buffer.add(frame(1, 1)).is_none());
    assert!(buffer.add(frame(1, 2)).is_none());
    assert!(buffer.add(frame(7, 1)).is_none());

    // both stages hold SSRC 1, so its oldest frame gives way
    let dropped = buffer.add(frame(1, 3)).unwrap();
    assert_eq!(dropped.sequence_number(), 1);

    let stage = buffer.drain().unwrap();
    assert_eq!(pairs(&stage), vec![(1, 2), (7, 1)]);

    let stage = buffer.drain().unwrap();
    assert_eq!(pairs(&stage), vec![(1, 3)]);
}

#[test]
fn test_reorder_within_stages() {
    let mut buffer = FrameBuffer::new(FrameBufferConfig { max_stages: 2 });

    assert!(buffer.add(frame(1, 2)).is_none());
    // the older frame takes the stage 0 slot, pushing seq 2 onward
    assert!(buffer.add(frame(1, 1)).is_none());

    let stage = buffer.drain().unwrap();
    assert_eq!(pairs(&stage), vec![(1, 1)]);
    let stage = buffer.drain().unwrap();
    assert_eq!(pairs(&stage), vec![(1, 2)]);
}

#[test]
fn test_drain_yields_one_frame_per_ssrc_in_order() {
    let mut buffer = FrameBuffer::new(FrameBufferConfig { max_stages: 4 });

    for (ssrc, seq) in [
        (9, 100),
        (3, 7),
        (5, 20),
        (3, 8),
        (9, 99),
        (5, 21),
        (3, 9),
        (1, 1),
    ] {
        assert!(buffer.add(frame(ssrc, seq)).is_none());
    }

    let stage = buffer.drain().unwrap();
    let drained = pairs(&stage);

    // ascending SSRC order, at most one frame per SSRC
    let ssrcs: Vec<u32> = drained.iter().map(|(s, _)| *s).collect();
    let mut sorted = ssrcs.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(ssrcs, sorted);

    // every SSRC surfaces its lowest buffered sequence number
    assert_eq!(drained, vec![(1, 1), (3, 7), (5, 20), (9, 99)]);
}

#[test]
fn test_per_stream_sequences_grow_across_stages() {
    let mut buffer = FrameBuffer::new(FrameBufferConfig { max_stages: 3 });

    for seq in [4u16, 2, 3] {
        assert!(buffer.add(frame(1, seq)).is_none());
    }

    let mut last = None;
    while let Some(stage) = buffer.drain() {
        assert_eq!(stage.len(), 1);
        let seq = stage[0].sequence_number();
        if let Some(previous) = last {
            assert!(seq > previous);
        }
        last = Some(seq);
    }
}
