use std::{ffi::OsString, fmt::Write as _, path::PathBuf};

use crate::{
    errors::{PipelineError, Result},
    slide::{SlideIndex, SyncedPair},
};

/// An encoder input, in the order it appears on the command line.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphInput {
    /// A still image looped for as long as its segment needs.
    LoopedImage(PathBuf),
    Audio(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoSegment {
    pub input: usize,
    pub trim_seconds: f64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub input: usize,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub index: SlideIndex,
    pub video: VideoSegment,
    pub audio: AudioSegment,
}

/// Typed trim-and-concat graph: one held image and one audio track per
/// slide, concatenated in slide order.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterGraph {
    pub inputs: Vec<GraphInput>,
    pub segments: Vec<Segment>,
}

pub const OUTPUT_VIDEO_LABEL: &str = "outv";
pub const OUTPUT_AUDIO_LABEL: &str = "outa";

/// Shortest segment the graph accepts. Trim durations are written with
/// millisecond precision and ffmpeg reads `duration=0` as unbounded.
pub const MIN_SEGMENT_SECONDS: f64 = 0.001;

impl FilterGraph {
    /// Pairs must be non-empty and at least [`MIN_SEGMENT_SECONDS`] long;
    /// the segment order is the pair order.
    pub fn from_pairs(pairs: &[SyncedPair]) -> Result<Self> {
        if pairs.is_empty() {
            return Err(PipelineError::NoUsablePairs {
                images: 0,
                audios: 0,
            });
        }

        let mut inputs = Vec::with_capacity(pairs.len() * 2);
        let mut segments = Vec::with_capacity(pairs.len());
        for (position, pair) in pairs.iter().enumerate() {
            if !(pair.duration_seconds.is_finite() && pair.duration_seconds >= MIN_SEGMENT_SECONDS)
            {
                return Err(PipelineError::InvalidInput(format!(
                    "slide {} has no usable duration ({}s)",
                    pair.index, pair.duration_seconds
                )));
            }
            let image_input = inputs.len();
            inputs.push(GraphInput::LoopedImage(pair.image.clone()));
            let audio_input = inputs.len();
            inputs.push(GraphInput::Audio(pair.audio.clone()));

            segments.push(Segment {
                index: pair.index,
                video: VideoSegment {
                    input: image_input,
                    trim_seconds: pair.duration_seconds,
                    label: format!("v{position}"),
                },
                audio: AudioSegment {
                    input: audio_input,
                    label: format!("a{position}"),
                },
            });
        }

        Ok(Self { inputs, segments })
    }

    pub fn total_seconds(&self) -> f64 {
        self.segments
            .iter()
            .map(|segment| segment.video.trim_seconds)
            .sum()
    }

    /// `-loop 1 -i img` / `-i aud` arguments, in input order.
    pub fn input_args(&self) -> Vec<OsString> {
        let mut args = Vec::with_capacity(self.inputs.len() * 4);
        for input in &self.inputs {
            match input {
                GraphInput::LoopedImage(path) => {
                    args.extend(["-loop".into(), "1".into(), "-i".into()]);
                    args.push(path.clone().into_os_string());
                }
                GraphInput::Audio(path) => {
                    args.push("-i".into());
                    args.push(path.clone().into_os_string());
                }
            }
        }
        args
    }

    /// The ffmpeg `filter_complex` text for this graph.
    pub fn render(&self) -> String {
        let mut text = String::new();
        for segment in &self.segments {
            let video = &segment.video;
            let _ = writeln!(
                text,
                "[{}:v]trim=duration={},setpts=PTS-STARTPTS,scale=trunc(iw/2)*2:trunc(ih/2)*2,setsar=1[{}];",
                video.input,
                format_seconds(video.trim_seconds),
                video.label
            );
            let audio = &segment.audio;
            let _ = writeln!(text, "[{}:a]acopy[{}];", audio.input, audio.label);
        }
        for segment in &self.segments {
            let _ = write!(text, "[{}][{}]", segment.video.label, segment.audio.label);
        }
        let _ = write!(
            text,
            "concat=n={}:v=1:a=1[{OUTPUT_VIDEO_LABEL}][{OUTPUT_AUDIO_LABEL}]",
            self.segments.len()
        );
        text
    }
}

/// Seconds with millisecond precision, trailing zeros dropped.
pub fn format_seconds(seconds: f64) -> String {
    let rendered = format!("{seconds:.3}");
    let trimmed = rendered.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(durations: &[f64]) -> Vec<SyncedPair> {
        durations
            .iter()
            .enumerate()
            .map(|(offset, duration)| {
                let index = SlideIndex::from_offset(offset).unwrap();
                SyncedPair {
                    index,
                    image: PathBuf::from(format!("page_{index}.png")),
                    audio: PathBuf::from(format!("slide_{index}.mp3")),
                    duration_seconds: *duration,
                }
            })
            .collect()
    }

    #[test]
    fn renders_trim_and_concat_per_segment() {
        let graph = FilterGraph::from_pairs(&pairs(&[2.0, 45.0, 3.0])).unwrap();
        assert_eq!(graph.inputs.len(), 6);
        assert!((graph.total_seconds() - 50.0).abs() < 1e-9);

        let text = graph.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "[0:v]trim=duration=2,setpts=PTS-STARTPTS,scale=trunc(iw/2)*2:trunc(ih/2)*2,setsar=1[v0];"
        );
        assert_eq!(lines[1], "[1:a]acopy[a0];");
        assert!(lines[2].starts_with("[2:v]trim=duration=45,"));
        assert_eq!(lines[5], "[5:a]acopy[a2];");
        assert_eq!(lines[6], "[v0][a0][v1][a1][v2][a2]concat=n=3:v=1:a=1[outv][outa]");
    }

    #[test]
    fn input_args_loop_images_only() {
        let graph = FilterGraph::from_pairs(&pairs(&[1.5])).unwrap();
        let args: Vec<String> = graph
            .input_args()
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, vec!["-loop", "1", "-i", "page_1.png", "-i", "slide_1.mp3"]);
    }

    #[test]
    fn rejects_empty_and_non_positive_durations() {
        assert!(matches!(
            FilterGraph::from_pairs(&[]),
            Err(PipelineError::NoUsablePairs { .. })
        ));
        assert!(matches!(
            FilterGraph::from_pairs(&pairs(&[1.0, 0.0])),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn sub_millisecond_segments_never_render_an_open_trim() {
        assert!(matches!(
            FilterGraph::from_pairs(&pairs(&[2.0, 0.0004])),
            Err(PipelineError::InvalidInput(_))
        ));

        let graph = FilterGraph::from_pairs(&pairs(&[MIN_SEGMENT_SECONDS])).unwrap();
        let rendered = graph.render();
        assert!(rendered.contains("trim=duration=0.001,"));
        assert!(!rendered.contains("trim=duration=0,"));
    }

    #[test]
    fn seconds_keep_millisecond_precision() {
        assert_eq!(format_seconds(2.0), "2");
        assert_eq!(format_seconds(45.0234), "45.023");
        assert_eq!(format_seconds(0.5), "0.5");
        assert_eq!(format_seconds(12.3456), "12.346");
    }
}
