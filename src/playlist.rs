use crate::sample_buffer::{SampleBuffer, StereoBlock};
use std::collections::VecDeque;

/// Ordered queue of sample buffers drained by the playback callback.
///
/// An item leaves the front only once a read has exhausted it; a partially
/// drained item goes back to the front and is continued on the next fill.
#[derive(Default)]
pub struct Playlist {
    items: VecDeque<Box<dyn SampleBuffer>>,
}

impl Playlist {
    pub fn new() -> Self {
        Playlist {
            items: VecDeque::new(),
        }
    }

    /// Queue an item at the tail.
    pub fn push(&mut self, item: Box<dyn SampleBuffer>) {
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Produce exactly `frames` frames, consuming items in order. Silence is
    /// only appended once the queue runs dry.
    pub fn fill(&mut self, frames: usize) -> StereoBlock {
        let mut out = StereoBlock::with_capacity(frames);

        while out.len() < frames {
            let Some(mut item) = self.items.pop_front() else {
                break;
            };
            let block = item.read(frames - out.len());
            out.extend(&block);
            if item.remaining() > 0 {
                self.items.push_front(item);
                break;
            }
        }

        out.pad_to(frames);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_buffer::ToneBuffer;
    use std::time::Duration;

    fn tone(millis: u64, frequency: f64) -> ToneBuffer {
        ToneBuffer::new(8000, frequency, Duration::from_millis(millis), -3.0)
    }

    fn reference(millis: u64, frequency: f64) -> StereoBlock {
        let mut t = tone(millis, frequency);
        let frames = t.remaining();
        t.read(frames)
    }

    #[test]
    fn new_playlist_is_empty() {
        let mut pl = Playlist::new();
        assert!(pl.is_empty());
        assert_eq!(pl.fill(16), StereoBlock::silent(16));
    }

    #[test]
    fn chunked_drain_reproduces_tone_without_gaps() {
        let expected = reference(100, 440.0);
        let mut pl = Playlist::new();
        pl.push(Box::new(tone(100, 440.0)));

        let mut out = StereoBlock::default();
        for chunk in [7, 128, 1, 300, 364] {
            out.extend(&pl.fill(chunk));
        }
        assert_eq!(out.len(), 800);
        assert_eq!(out, expected);
        assert!(pl.is_empty());
    }

    #[test]
    fn partially_read_item_is_requeued_at_front() {
        let mut pl = Playlist::new();
        pl.push(Box::new(tone(10, 440.0)));
        pl.push(Box::new(tone(10, 880.0)));

        pl.fill(50);
        assert_eq!(pl.len(), 2);
        assert_eq!(&pl.fill(110).left[..30], &reference(10, 440.0).left[50..]);
        assert!(pl.is_empty());
    }

    #[test]
    fn consecutive_items_are_joined_without_silence() {
        let mut expected = reference(10, 440.0);
        expected.extend(&reference(10, 880.0));

        let mut pl = Playlist::new();
        pl.push(Box::new(tone(10, 440.0)));
        pl.push(Box::new(tone(10, 880.0)));

        let out = pl.fill(160);
        assert_eq!(out, expected);
        assert!(pl.is_empty());
    }

    #[test]
    fn exhausted_queue_is_zero_padded() {
        let mut pl = Playlist::new();
        pl.push(Box::new(tone(10, 440.0)));
        let out = pl.fill(100);
        assert_eq!(out.len(), 100);
        assert_eq!(&out.left[80..], &[0; 20]);
        assert!(pl.is_empty());
    }
}
