//! Pending-track FIFO owned by a single subscription worker.

use std::collections::VecDeque;
use std::sync::Arc;

use jukebox_types::TrackSummary;
use rand::Rng;
use rand::seq::SliceRandom;

use crate::track::Track;

#[derive(Debug, Default)]
pub struct Queue {
    tracks: VecDeque<Arc<Track>>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, track: Arc<Track>) {
        self.tracks.push_back(track);
    }

    /// Append in the given order.
    pub fn enqueue_many(&mut self, tracks: impl IntoIterator<Item = Arc<Track>>) {
        self.tracks.extend(tracks);
    }

    pub fn peek_next(&self) -> Option<&Arc<Track>> {
        self.tracks.front()
    }

    pub fn pop_next(&mut self) -> Option<Arc<Track>> {
        self.tracks.pop_front()
    }

    /// Uniform permutation of the pending tracks.
    pub fn shuffle(&mut self) {
        self.shuffle_with(&mut rand::thread_rng());
    }

    pub fn shuffle_with<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.tracks.make_contiguous().shuffle(rng);
    }

    /// First `limit` entries without consuming them.
    pub fn snapshot(&self, limit: usize) -> Vec<TrackSummary> {
        self.tracks
            .iter()
            .take(limit)
            .map(|track| track.summary())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Drop every pending track. Their hooks never run.
    pub fn clear(&mut self) -> usize {
        let dropped = self.tracks.len();
        self.tracks.clear();
        dropped
    }
}
