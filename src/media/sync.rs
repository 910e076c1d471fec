use std::cmp::Ordering;

use tracing::{debug, info};

use crate::{
    errors::{PipelineError, Result},
    slide::{AudioClip, SlideImage, SyncedPair},
};

/// Joins images and audio clips on slide index.
///
/// Both sides are sorted ascending and walked together; an index present on
/// only one side is dropped, never paired with a neighbour. The result is
/// strictly increasing and has no duplicates. Empty input, or no common
/// index, is an error.
pub fn pair(images: &[SlideImage], audios: &[AudioClip]) -> Result<Vec<SyncedPair>> {
    let no_pairs = || PipelineError::NoUsablePairs {
        images: images.len(),
        audios: audios.len(),
    };
    if images.is_empty() || audios.is_empty() {
        return Err(no_pairs());
    }

    let mut images: Vec<&SlideImage> = images.iter().collect();
    let mut audios: Vec<&AudioClip> = audios.iter().collect();
    images.sort_by_key(|image| image.index);
    audios.sort_by_key(|audio| audio.index);

    let mut pairs: Vec<SyncedPair> = Vec::with_capacity(images.len().min(audios.len()));
    let (mut i, mut a) = (0, 0);
    while i < images.len() && a < audios.len() {
        let (image, audio) = (images[i], audios[a]);
        match image.index.cmp(&audio.index) {
            Ordering::Less => {
                debug!(target: "synchronizer", slide = image.index.get(), "no audio; dropped");
                i += 1;
            }
            Ordering::Greater => {
                debug!(target: "synchronizer", slide = audio.index.get(), "no image; dropped");
                a += 1;
            }
            Ordering::Equal => {
                if pairs.last().is_some_and(|last| last.index == image.index) {
                    debug!(target: "synchronizer", slide = image.index.get(), "duplicate index; dropped");
                } else {
                    pairs.push(SyncedPair {
                        index: image.index,
                        image: image.path.clone(),
                        audio: audio.path.clone(),
                        duration_seconds: audio.duration_seconds,
                    });
                }
                i += 1;
                a += 1;
            }
        }
    }

    if pairs.is_empty() {
        return Err(no_pairs());
    }

    info!(
        target: "synchronizer",
        pairs = pairs.len(),
        images = images.len(),
        audios = audios.len(),
        "synchronized slides"
    );
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::slide::SlideIndex;

    fn image(index: u32) -> SlideImage {
        SlideImage {
            index: SlideIndex::new(index).unwrap(),
            path: PathBuf::from(format!("images/page_{index}.png")),
        }
    }

    fn audio(index: u32, duration_seconds: f64) -> AudioClip {
        AudioClip {
            index: SlideIndex::new(index).unwrap(),
            path: PathBuf::from(format!("audio/slide_{index}.mp3")),
            duration_seconds,
        }
    }

    fn indices(pairs: &[SyncedPair]) -> Vec<u32> {
        pairs.iter().map(|pair| pair.index.get()).collect()
    }

    #[test]
    fn missing_audio_drops_only_that_slide() {
        let pairs = pair(
            &[image(1), image(2), image(3)],
            &[audio(1, 2.0), audio(3, 3.0)],
        )
        .unwrap();
        assert_eq!(indices(&pairs), vec![1, 3]);
        assert_eq!(pairs[1].image, PathBuf::from("images/page_3.png"));
        assert_eq!(pairs[1].audio, PathBuf::from("audio/slide_3.mp3"));
        assert_eq!(pairs[1].duration_seconds, 3.0);
    }

    #[test]
    fn unordered_listings_are_sorted_numerically() {
        let images: Vec<SlideImage> = [10, 2, 1].into_iter().map(image).collect();
        let audios = vec![audio(2, 1.0), audio(10, 1.0), audio(1, 1.0)];
        assert_eq!(indices(&pair(&images, &audios).unwrap()), vec![1, 2, 10]);
    }

    #[test]
    fn output_is_bounded_and_strictly_increasing() {
        let images: Vec<SlideImage> = (1..=6).map(image).collect();
        let audios = vec![audio(2, 1.0), audio(2, 1.5), audio(5, 1.0), audio(9, 1.0)];
        let pairs = pair(&images, &audios).unwrap();
        assert_eq!(indices(&pairs), vec![2, 5]);
        assert!(pairs.len() <= images.len().min(audios.len()));
        assert!(pairs.windows(2).all(|w| w[0].index < w[1].index));
    }

    #[test]
    fn empty_or_disjoint_inputs_are_errors() {
        assert!(matches!(
            pair(&[], &[audio(1, 1.0)]),
            Err(PipelineError::NoUsablePairs { images: 0, audios: 1 })
        ));
        assert!(matches!(
            pair(&[image(1)], &[]),
            Err(PipelineError::NoUsablePairs { .. })
        ));
        assert!(matches!(
            pair(&[image(1), image(2)], &[audio(3, 1.0)]),
            Err(PipelineError::NoUsablePairs { images: 2, audios: 1 })
        ));
    }
}
