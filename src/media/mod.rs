mod assembler;
mod graph;
mod probe;
mod sync;

pub use assembler::{AssembledVideo, EncodeJob, Encoder, EncoderOutcome, Ffmpeg, VideoAssembler};
pub use graph::{
    AudioSegment, FilterGraph, GraphInput, MIN_SEGMENT_SECONDS, Segment, VideoSegment, format_seconds,
};
pub use probe::{DurationProbe, Ffprobe};
pub use sync::pair;

#[cfg(test)]
pub(crate) use assembler::tests::FakeEncoder;
