#[cfg(test)]
mod frame_buffer_test;

use std::collections::VecDeque;

use crate::frame::Frame;

pub const DEFAULT_MAX_STAGES: usize = 2;

#[derive(Debug, Clone, Copy)]
pub struct FrameBufferConfig {
    /// Upper bound on the number of stages buffered before the oldest
    /// frame of a stream is displaced.
    pub max_stages: usize,
}

impl Default for FrameBufferConfig {
    fn default() -> Self {
        Self {
            max_stages: DEFAULT_MAX_STAGES,
        }
    }
}

enum StageInsert {
    Inserted,
    Duplicate(Frame),
    Remainder(Frame),
}

/// Cross-stream ordering buffer.
///
/// Frames are grouped into stages: each stage holds at most one frame per
/// SSRC, sorted ascending by SSRC, and for any SSRC the sequence numbers
/// grow strictly from stage 0 upward. Draining stage 0 yields one frame
/// per active stream, ready for the mixer tick.
pub struct FrameBuffer {
    stages: VecDeque<Vec<Frame>>,
    max_stages: usize,
}

fn insert_into_stage(stage: &mut Vec<Frame>, frame: Frame) -> StageInsert {
    match stage.binary_search_by(|entry| entry.ssrc().cmp(&frame.ssrc())) {
        Err(pos) => {
            stage.insert(pos, frame);
            StageInsert::Inserted
        }
        Ok(pos) => {
            let held = stage[pos].sequence_number();
            let seq = frame.sequence_number();

            if seq == held {
                StageInsert::Duplicate(frame)
            } else if seq < held {
                // the younger frame moves on to a later stage
                let displaced = std::mem::replace(&mut stage[pos], frame);
                StageInsert::Remainder(displaced)
            } else {
                StageInsert::Remainder(frame)
            }
        }
    }
}

fn remove_from_stage(stage: &mut Vec<Frame>, ssrc: u32) -> Option<Frame> {
    stage
        .binary_search_by(|entry| entry.ssrc().cmp(&ssrc))
        .ok()
        .map(|pos| stage.remove(pos))
}

impl FrameBuffer {
    pub fn new(config: FrameBufferConfig) -> Self {
        let max_stages = if config.max_stages == 0 {
            DEFAULT_MAX_STAGES
        } else {
            config.max_stages
        };

        Self {
            stages: VecDeque::new(),
            max_stages,
        }
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Sorts a frame into the stages.
    ///
    /// Returns the frame the caller has to dispose of: the duplicate when
    /// the identical (SSRC, sequence) pair is already buffered, or the
    /// displaced oldest frame of that stream when all stages are occupied.
    /// `None` means the frame was fully absorbed.
    pub fn add(&mut self, frame: Frame) -> Option<Frame> {
        if self.stages.is_empty() {
            self.stages.push_back(Vec::new());
        }

        let mut remainder = frame;
        for stage in self.stages.iter_mut() {
            match insert_into_stage(stage, remainder) {
                StageInsert::Inserted => return None,
                StageInsert::Duplicate(duplicate) => {
                    log::debug!(
                        "duplicate frame SSRC {} seq {}",
                        duplicate.ssrc(),
                        duplicate.sequence_number()
                    );
                    return Some(duplicate);
                }
                StageInsert::Remainder(rest) => remainder = rest,
            }
        }

        if self.stages.len() < self.max_stages {
            self.stages.push_back(vec![remainder]);
            return None;
        }

        // every stage holds a younger frame of this stream; displace the
        // oldest and shift the stream one stage towards the mixer
        let ssrc = remainder.ssrc();
        let dropped = self.drop_oldest(ssrc);

        for stage in self.stages.iter_mut() {
            match insert_into_stage(stage, remainder) {
                StageInsert::Inserted => return Some(dropped),
                StageInsert::Duplicate(_) => {
                    panic!("frame buffer holds a displaced duplicate for SSRC {ssrc}")
                }
                StageInsert::Remainder(rest) => remainder = rest,
            }
        }

        panic!("frame buffer failed to re-insert the remainder for SSRC {ssrc}")
    }

    fn drop_oldest(&mut self, ssrc: u32) -> Frame {
        let dropped = match remove_from_stage(&mut self.stages[0], ssrc) {
            Some(frame) => frame,
            None => panic!("stage 0 lost its frame for SSRC {ssrc}"),
        };

        for stage_index in 1..self.stages.len() {
            let shifted = match remove_from_stage(&mut self.stages[stage_index], ssrc) {
                Some(frame) => frame,
                // there must not be holes in the stage chain
                None => panic!("stage {stage_index} lost its frame for SSRC {ssrc}"),
            };

            match insert_into_stage(&mut self.stages[stage_index - 1], shifted) {
                StageInsert::Inserted => {}
                _ => panic!("stage {} still holds SSRC {ssrc}", stage_index - 1),
            }
        }

        dropped
    }

    /// Pops stage 0: at most one frame per SSRC, ascending by SSRC.
    /// Later stages move up; `None` once no stage remains.
    pub fn drain(&mut self) -> Option<Vec<Frame>> {
        self.stages.pop_front()
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "FrameBuffer ({} stages):", self.stages.len())?;
        for (i, stage) in self.stages.iter().enumerate() {
            write!(f, "  stage {i}:")?;
            for frame in stage {
                write!(f, " (SSRC {} seq {})", frame.ssrc(), frame.sequence_number())?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
