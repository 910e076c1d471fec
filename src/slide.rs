use std::{fmt, num::NonZeroU32, path::PathBuf, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, Result};

static TRAILING_INDEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<prefix>[A-Za-z]+)_(?P<index>\d+)(?:[_.].*)?$")
        .expect("artifact name pattern should compile")
});

/// 1-based position of a slide in the deck. The only join key between
/// images, scripts and audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlideIndex(NonZeroU32);

impl SlideIndex {
    pub fn new(value: u32) -> Result<Self> {
        NonZeroU32::new(value)
            .map(Self)
            .ok_or_else(|| PipelineError::other("slide index must be 1-based"))
    }

    /// Index for the zero-based position `offset` in an ordered deck.
    pub fn from_offset(offset: usize) -> Result<Self> {
        let value = u32::try_from(offset + 1)
            .map_err(|_| PipelineError::other(format!("slide offset {offset} out of range")))?;
        Self::new(value)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Parses names such as `page_12.png` or `slide_3_script.txt`. The
    /// prefix must match exactly; anything else yields `None`.
    pub fn from_file_name(prefix: &str, file_name: &str) -> Option<Self> {
        let caps = TRAILING_INDEX.captures(file_name)?;
        if &caps["prefix"] != prefix {
            return None;
        }
        let digits = &caps["index"];
        // "page_01" and "page_1" would collide, so only canonical digits are accepted.
        if digits.len() > 1 && digits.starts_with('0') {
            return None;
        }
        digits.parse::<u32>().ok().and_then(|value| Self::new(value).ok())
    }

    pub fn position(self, total: usize) -> PositionClass {
        PositionClass::classify(self, total)
    }
}

impl fmt::Display for SlideIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a slide sits in the deck; selects the narration policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionClass {
    First,
    Middle,
    Last,
}

impl PositionClass {
    /// A single-slide deck is classified `First`.
    pub fn classify(index: SlideIndex, total: usize) -> Self {
        let position = index.get() as usize;
        if position == 1 {
            PositionClass::First
        } else if position == total {
            PositionClass::Last
        } else {
            PositionClass::Middle
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionClass::First => "first",
            PositionClass::Middle => "middle",
            PositionClass::Last => "last",
        }
    }
}

impl fmt::Display for PositionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideImage {
    pub index: SlideIndex,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub index: SlideIndex,
    pub text: String,
}

impl Script {
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub index: SlideIndex,
    pub path: PathBuf,
    pub duration_seconds: f64,
}

/// One slide's image and narration, ready for assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedPair {
    pub index: SlideIndex,
    pub image: PathBuf,
    pub audio: PathBuf,
    pub duration_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(value: u32) -> SlideIndex {
        SlideIndex::new(value).unwrap()
    }

    #[test]
    fn zero_is_not_a_slide_index() {
        assert!(SlideIndex::new(0).is_err());
        assert_eq!(SlideIndex::from_offset(0).unwrap(), idx(1));
    }

    #[test]
    fn parses_indices_from_artifact_names() {
        assert_eq!(SlideIndex::from_file_name("page", "page_12.png"), Some(idx(12)));
        assert_eq!(SlideIndex::from_file_name("slide", "slide_3.mp3"), Some(idx(3)));
        assert_eq!(
            SlideIndex::from_file_name("slide", "slide_3_script.txt"),
            Some(idx(3))
        );
        assert_eq!(SlideIndex::from_file_name("slide", "page_3.png"), None);
        assert_eq!(SlideIndex::from_file_name("page", "page_0.png"), None);
        assert_eq!(SlideIndex::from_file_name("page", "page_07.png"), None);
        assert_eq!(SlideIndex::from_file_name("page", "cover.png"), None);
    }

    #[test]
    fn classifies_positions() {
        assert_eq!(idx(1).position(5), PositionClass::First);
        assert_eq!(idx(3).position(5), PositionClass::Middle);
        assert_eq!(idx(5).position(5), PositionClass::Last);
        assert_eq!(idx(2).position(2), PositionClass::Last);
    }

    #[test]
    fn single_slide_deck_uses_first_policy() {
        assert_eq!(idx(1).position(1), PositionClass::First);
    }
}
