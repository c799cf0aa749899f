//! Ordered track queue with loop modes and a balanced shuffle.

use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use rand::prelude::SliceRandom;

use crate::model::Track;
use crate::{Error, Result};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
/// Loop behavior applied by [`Queue::poll`].
pub enum LoopMode {
    #[default]
    /// Advance through the queue once.
    None,
    /// Repeat the current track.
    Track,
    /// Re-append finished tracks to the tail.
    Queue,
}

impl Display for LoopMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LoopMode::None => write!(f, "none"),
            LoopMode::Track => write!(f, "track"),
            LoopMode::Queue => write!(f, "queue"),
        }
    }
}

impl FromStr for LoopMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(LoopMode::None),
            "track" => Ok(LoopMode::Track),
            "queue" => Ok(LoopMode::Queue),
            other => Err(format!("unknown loop mode: {}", other)),
        }
    }
}

#[derive(Debug, Default, Clone)]
/// An ordered track list plus the current and previous track.
///
/// The queue never talks to a node; [`crate::Player`] drives it and issues the
/// REST calls.
pub struct Queue {
    tracks: VecDeque<Track>,
    current: Option<Track>,
    previous: Option<Track>,
    loop_mode: LoopMode,
}

#[derive(Debug, Clone)]
/// A snapshot of queue metrics, returned by [`Queue::get_summary`].
pub struct QueueSummary {
    /// Queued track count, excluding the current track.
    pub size: usize,
    /// Total length of queued tracks in milliseconds.
    pub duration: u64,
    /// [`QueueSummary::duration`] plus the current track when it is not a stream.
    pub total_duration: u64,
    /// Whether no tracks are queued.
    pub is_empty: bool,
    /// The current track.
    pub current: Option<Track>,
    /// The previously played track.
    pub previous: Option<Track>,
    /// The loop mode in effect.
    pub loop_mode: LoopMode,
    /// Distinct authors among queued tracks.
    pub unique_authors: usize,
    /// Distinct source names among queued tracks.
    pub unique_sources: usize,
}

impl Queue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a track to the tail.
    pub fn add(&mut self, track: Track) {
        self.tracks.push_back(track);
    }

    /// Append several tracks to the tail, returning how many were added.
    pub fn add_many(&mut self, tracks: Vec<Track>) -> usize {
        let count = tracks.len();
        self.tracks.extend(tracks);
        count
    }

    /// Insert a track at `index`, shifting successors right. `index` may equal
    /// the queue length to append.
    pub fn insert(&mut self, index: usize, track: Track) -> Result<()> {
        if index > self.tracks.len() {
            return Err(Error::InvalidPosition);
        }

        self.tracks.insert(index, track);

        Ok(())
    }

    /// Remove and return the track at `index`, shifting successors left.
    pub fn remove(&mut self, index: usize) -> Option<Track> {
        self.tracks.remove(index)
    }

    /// Advance the queue and return the new current track.
    ///
    /// Under [`LoopMode::Track`] the current track is returned unchanged.
    /// Under [`LoopMode::Queue`] the finished track is re-appended to the tail.
    pub fn poll(&mut self) -> Option<Track> {
        if self.loop_mode == LoopMode::Track && self.current.is_some() {
            return self.current.clone();
        }

        self.previous = self.current.take();
        self.current = self.tracks.pop_front();

        if self.loop_mode == LoopMode::Queue {
            if let (Some(previous), Some(_)) = (&self.previous, &self.current) {
                self.tracks.push_back(previous.clone());
            }
        }

        self.current.clone()
    }

    /// The next queued track, without advancing.
    pub fn peek(&self) -> Option<&Track> {
        self.tracks.front()
    }

    /// The current track.
    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    /// The previously played track.
    pub fn previous(&self) -> Option<&Track> {
        self.previous.as_ref()
    }

    /// Forget the current track, e.g. after an explicit stop.
    pub fn clear_current(&mut self) {
        self.previous = self.current.take();
    }

    /// Queued track count, excluding the current track.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Whether no tracks are queued.
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Iterate over the queued tracks in order.
    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    /// Drop all queued tracks.
    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    /// Uniform Fisher-Yates shuffle of the queued tracks.
    pub fn shuffle(&mut self) {
        self.tracks.make_contiguous().shuffle(&mut rand::rng());
    }

    /// Balanced shuffle that avoids queuing the same author twice in a row.
    ///
    /// Tracks are grouped by author (trimmed, case-folded), each group is
    /// shuffled, then groups are drained largest-first, never emitting the
    /// same author consecutively while another group still has tracks.
    pub fn smart_shuffle(&mut self) {
        if self.tracks.len() < 2 {
            return;
        }

        let mut rng = rand::rng();
        let mut buckets: HashMap<String, Vec<Track>> = HashMap::new();

        for track in self.tracks.drain(..) {
            let key = track.info.author.trim().to_lowercase();
            buckets.entry(key).or_default().push(track);
        }

        let mut heap: BinaryHeap<(usize, String)> = BinaryHeap::new();

        for (key, bucket) in buckets.iter_mut() {
            bucket.shuffle(&mut rng);
            heap.push((bucket.len(), key.clone()));
        }

        let mut last_key: Option<String> = None;

        while let Some((len, key)) = heap.pop() {
            // Same author as the previous pick: defer to the next-largest
            // bucket when one exists.
            let (_, key) = if last_key.as_deref() == Some(key.as_str()) {
                match heap.pop() {
                    Some(next) => {
                        heap.push((len, key));
                        next
                    }
                    None => (len, key),
                }
            } else {
                (len, key)
            };

            let Some(bucket) = buckets.get_mut(&key) else {
                continue;
            };
            let Some(track) = bucket.pop() else {
                continue;
            };

            self.tracks.push_back(track);

            if !bucket.is_empty() {
                heap.push((bucket.len(), key.clone()));
            }

            last_key = Some(key);
        }
    }

    /// Drop the first `index` queued tracks, then advance. The track formerly
    /// at `index` becomes the current track.
    pub fn skip_to(&mut self, index: usize) -> Option<Track> {
        if index >= self.tracks.len() {
            return None;
        }

        self.tracks.drain(..index);
        self.poll()
    }

    /// The queued track at `index`.
    pub fn at(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    /// Move the track at `from` to position `to`.
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<()> {
        if from >= self.tracks.len() || to >= self.tracks.len() {
            return Err(Error::InvalidPosition);
        }

        if let Some(track) = self.tracks.remove(from) {
            self.tracks.insert(to, track);
        }

        Ok(())
    }

    /// Swap the tracks at `a` and `b`.
    pub fn swap(&mut self, a: usize, b: usize) -> Result<()> {
        if a >= self.tracks.len() || b >= self.tracks.len() {
            return Err(Error::InvalidPosition);
        }

        self.tracks.swap(a, b);

        Ok(())
    }

    /// The first queued track matching the predicate.
    pub fn find(&self, mut predicate: impl FnMut(&Track) -> bool) -> Option<&Track> {
        self.tracks.iter().find(|t| predicate(t))
    }

    /// The index of the first queued track matching the predicate.
    pub fn find_index(&self, mut predicate: impl FnMut(&Track) -> bool) -> Option<usize> {
        self.tracks.iter().position(|t| predicate(t))
    }

    /// All queued tracks matching the predicate.
    pub fn filter(&self, mut predicate: impl FnMut(&Track) -> bool) -> Vec<&Track> {
        self.tracks.iter().filter(|t| predicate(t)).collect()
    }

    /// Drop queued tracks whose identifier already appeared earlier, keeping
    /// the first occurrence.
    pub fn remove_duplicates(&mut self) {
        let mut seen = HashSet::new();
        self.tracks
            .retain(|t| seen.insert(t.info.identifier.clone()));
    }

    /// Queued tracks whose author contains `author`, case-insensitively.
    pub fn filter_by_author(&self, author: &str) -> Vec<&Track> {
        let needle = author.to_lowercase();
        self.filter(|t| t.info.author.to_lowercase().contains(&needle))
    }

    /// Queued tracks no longer than `max_ms`.
    pub fn filter_by_duration(&self, max_ms: u64) -> Vec<&Track> {
        self.filter(|t| t.info.length <= max_ms)
    }

    /// Queued tracks from the given source, case-insensitively.
    pub fn filter_by_source(&self, source: &str) -> Vec<&Track> {
        self.filter(|t| {
            t.info
                .source_name
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(source))
        })
    }

    /// Remove queued tracks whose author contains `author` (case-insensitive
    /// substring), returning how many were removed.
    pub fn remove_by_author(&mut self, author: &str) -> usize {
        let needle = author.to_lowercase();
        let before = self.tracks.len();
        self.tracks
            .retain(|t| !t.info.author.to_lowercase().contains(&needle));
        before - self.tracks.len()
    }

    /// Reverse the queued tracks.
    pub fn reverse(&mut self) {
        self.tracks.make_contiguous().reverse();
    }

    /// Clone the queued tracks in `[start, end)`, clamped to the queue length.
    /// `end` defaults to the queue length.
    pub fn slice(&self, start: usize, end: Option<usize>) -> Vec<Track> {
        let end = end.unwrap_or(self.tracks.len()).min(self.tracks.len());

        if start >= end {
            return Vec::new();
        }

        self.tracks.range(start..end).cloned().collect()
    }

    /// The loop mode in effect.
    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    /// Set the loop mode.
    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    /// Toggle between [`LoopMode::None`] and [`LoopMode::Queue`], returning the
    /// new mode.
    pub fn toggle_loop(&mut self) -> LoopMode {
        self.loop_mode = match self.loop_mode {
            LoopMode::None => LoopMode::Queue,
            _ => LoopMode::None,
        };
        self.loop_mode
    }

    /// Total length of queued tracks in milliseconds, excluding the current
    /// track.
    pub fn duration(&self) -> u64 {
        self.tracks.iter().map(|t| t.info.length).sum()
    }

    /// [`Queue::duration`] plus the current track's length when it is not a
    /// stream.
    pub fn total_duration(&self) -> u64 {
        let current = match &self.current {
            Some(t) if !t.info.is_stream => t.info.length,
            _ => 0,
        };

        self.duration() + current
    }

    /// A snapshot of queue metrics.
    pub fn get_summary(&self) -> QueueSummary {
        let unique_authors = self
            .tracks
            .iter()
            .map(|t| t.info.author.trim().to_lowercase())
            .collect::<HashSet<_>>()
            .len();

        let unique_sources = self
            .tracks
            .iter()
            .filter_map(|t| t.info.source_name.as_deref())
            .map(str::to_lowercase)
            .collect::<HashSet<_>>()
            .len();

        QueueSummary {
            size: self.tracks.len(),
            duration: self.duration(),
            total_duration: self.total_duration(),
            is_empty: self.tracks.is_empty(),
            current: self.current.clone(),
            previous: self.previous.clone(),
            loop_mode: self.loop_mode,
            unique_authors,
            unique_sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::model::TrackInfo;

    use super::*;

    fn track(identifier: &str, author: &str) -> Track {
        Track {
            encoded: format!("enc:{}", identifier),
            info: TrackInfo {
                identifier: identifier.to_owned(),
                is_seekable: true,
                author: author.to_owned(),
                length: 200_000,
                is_stream: false,
                position: 0,
                title: identifier.to_owned(),
                uri: None,
                artwork_url: None,
                isrc: None,
                source_name: Some("youtube".to_owned()),
            },
            plugin_info: HashMap::new(),
            user_data: HashMap::new(),
        }
    }

    fn ids(queue: &Queue) -> Vec<String> {
        queue.iter().map(|t| t.info.identifier.clone()).collect()
    }

    #[test]
    fn poll_returns_insertion_order_then_none() {
        let mut queue = Queue::new();
        queue.add(track("a", "x"));
        queue.add_many(vec![track("b", "x"), track("c", "y")]);

        assert_eq!(queue.poll().map(|t| t.info.identifier), Some("a".into()));
        assert_eq!(queue.poll().map(|t| t.info.identifier), Some("b".into()));
        assert_eq!(queue.poll().map(|t| t.info.identifier), Some("c".into()));
        assert_eq!(queue.poll(), None);
        assert_eq!(queue.previous().map(|t| &t.info.identifier[..]), Some("c"));
    }

    #[test]
    fn track_loop_repeats_without_mutation() {
        let mut queue = Queue::new();
        queue.add(track("a", "x"));
        queue.add(track("b", "x"));
        queue.set_loop_mode(LoopMode::Track);

        assert_eq!(queue.poll().map(|t| t.info.identifier), Some("a".into()));

        for _ in 0..10 {
            assert_eq!(queue.poll().map(|t| t.info.identifier), Some("a".into()));
        }

        assert_eq!(queue.len(), 1);
        assert_eq!(ids(&queue), vec!["b"]);
    }

    #[test]
    fn queue_loop_keeps_the_multiset() {
        let mut queue = Queue::new();
        queue.add(track("a", "x"));
        queue.add(track("b", "x"));
        queue.set_loop_mode(LoopMode::Queue);

        assert_eq!(queue.poll().map(|t| t.info.identifier), Some("a".into()));
        assert_eq!(ids(&queue), vec!["b"]);

        assert_eq!(queue.poll().map(|t| t.info.identifier), Some("b".into()));
        assert_eq!(ids(&queue), vec!["a"]);

        assert_eq!(queue.poll().map(|t| t.info.identifier), Some("a".into()));
        assert_eq!(ids(&queue), vec!["b"]);
    }

    #[test]
    fn remove_shifts_successors_left() {
        let mut queue = Queue::new();
        queue.add_many(vec![track("a", "x"), track("b", "x"), track("c", "x")]);

        let removed = queue.remove(1);

        assert_eq!(removed.map(|t| t.info.identifier), Some("b".into()));
        assert_eq!(ids(&queue), vec!["a", "c"]);
    }

    #[test]
    fn insert_bounds_are_inclusive_of_len() {
        let mut queue = Queue::new();
        queue.add(track("a", "x"));

        queue.insert(1, track("b", "x")).expect("append via insert");
        assert!(queue.insert(5, track("c", "x")).is_err());
        assert_eq!(ids(&queue), vec!["a", "b"]);
    }

    #[test]
    fn skip_to_drops_prefix_and_polls() {
        let mut queue = Queue::new();
        queue.add_many(vec![track("a", "x"), track("b", "x"), track("c", "x")]);

        let current = queue.skip_to(2);

        assert_eq!(current.map(|t| t.info.identifier), Some("c".into()));
        assert!(queue.is_empty());
        assert_eq!(queue.current().map(|t| &t.info.identifier[..]), Some("c"));

        assert_eq!(queue.skip_to(0), None);
    }

    #[test]
    fn remove_duplicates_keeps_first() {
        let mut queue = Queue::new();
        queue.add_many(vec![
            track("a", "one"),
            track("b", "two"),
            track("a", "three"),
            track("c", "one"),
        ]);

        queue.remove_duplicates();

        assert_eq!(ids(&queue), vec!["a", "b", "c"]);
        assert_eq!(
            queue.at(0).map(|t| &t.info.author[..]),
            Some("one"),
            "first occurrence wins"
        );
    }

    #[test]
    fn author_filters_are_case_insensitive_substrings() {
        let mut queue = Queue::new();
        queue.add_many(vec![
            track("a", "Rick Astley"),
            track("b", "rick astley"),
            track("c", "Someone Else"),
        ]);

        assert_eq!(queue.filter_by_author("RICK").len(), 2);
        assert_eq!(queue.remove_by_author("astley"), 2);
        assert_eq!(ids(&queue), vec!["c"]);
    }

    #[test]
    fn move_and_swap_reorder() {
        let mut queue = Queue::new();
        queue.add_many(vec![track("a", "x"), track("b", "x"), track("c", "x")]);

        queue.move_track(2, 0).expect("move");
        assert_eq!(ids(&queue), vec!["c", "a", "b"]);

        queue.swap(0, 2).expect("swap");
        assert_eq!(ids(&queue), vec!["b", "a", "c"]);

        assert!(queue.move_track(0, 9).is_err());
        assert!(queue.swap(9, 0).is_err());
    }

    #[test]
    fn slice_clamps_and_defaults_to_len() {
        let mut queue = Queue::new();
        queue.add_many(vec![track("a", "x"), track("b", "x"), track("c", "x")]);

        let tail = queue.slice(1, None);
        assert_eq!(tail.len(), 2);

        let clamped = queue.slice(1, Some(99));
        assert_eq!(clamped.len(), 2);

        assert!(queue.slice(3, None).is_empty());
    }

    #[test]
    fn durations_skip_streams() {
        let mut queue = Queue::new();
        queue.add(track("a", "x"));
        queue.add(track("b", "x"));
        queue.poll();

        assert_eq!(queue.duration(), 200_000);
        assert_eq!(queue.total_duration(), 400_000);

        let mut stream_queue = Queue::new();
        let mut live = track("live", "x");
        live.info.is_stream = true;
        stream_queue.add(live);
        stream_queue.poll();

        assert_eq!(stream_queue.total_duration(), 0);
    }

    #[test]
    fn summary_counts_unique_authors_and_sources() {
        let mut queue = Queue::new();
        queue.add_many(vec![
            track("a", " Rick Astley "),
            track("b", "rick astley"),
            track("c", "Someone Else"),
        ]);
        queue.set_loop_mode(LoopMode::Queue);

        let summary = queue.get_summary();

        assert_eq!(summary.size, 3);
        assert_eq!(summary.unique_authors, 2);
        assert_eq!(summary.unique_sources, 1);
        assert_eq!(summary.loop_mode, LoopMode::Queue);
        assert!(!summary.is_empty);
    }

    #[test]
    fn toggle_loop_flips_between_none_and_queue() {
        let mut queue = Queue::new();

        assert_eq!(queue.toggle_loop(), LoopMode::Queue);
        assert_eq!(queue.toggle_loop(), LoopMode::None);

        queue.set_loop_mode(LoopMode::Track);
        assert_eq!(queue.toggle_loop(), LoopMode::None);
    }

    #[test]
    fn loop_mode_parses_names() {
        assert_eq!("none".parse::<LoopMode>(), Ok(LoopMode::None));
        assert_eq!(" Track ".parse::<LoopMode>(), Ok(LoopMode::Track));
        assert_eq!("QUEUE".parse::<LoopMode>(), Ok(LoopMode::Queue));
        assert!("forever".parse::<LoopMode>().is_err());
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut queue = Queue::new();
        for i in 0..32 {
            queue.add(track(&format!("t{}", i), "x"));
        }

        let mut before = ids(&queue);
        queue.shuffle();
        let mut after = ids(&queue);

        before.sort();
        after.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn smart_shuffle_is_a_permutation_without_adjacent_authors() {
        let mut queue = Queue::new();
        queue.add_many(vec![
            track("a1", "A"),
            track("a2", "A"),
            track("a3", "A"),
            track("b1", "B"),
            track("c1", "C"),
        ]);

        for _ in 0..50 {
            queue.smart_shuffle();

            let mut sorted = ids(&queue);
            sorted.sort();
            assert_eq!(sorted, vec!["a1", "a2", "a3", "b1", "c1"]);

            let authors: Vec<String> = queue
                .iter()
                .map(|t| t.info.author.trim().to_lowercase())
                .collect();
            for pair in authors.windows(2) {
                assert_ne!(pair[0], pair[1], "adjacent authors in {:?}", authors);
            }
        }
    }

    #[test]
    fn smart_shuffle_folds_author_case_and_whitespace() {
        let mut queue = Queue::new();
        queue.add_many(vec![
            track("a1", "Artist"),
            track("a2", " artist "),
            track("b1", "Other"),
        ]);

        queue.smart_shuffle();

        let authors: Vec<String> = queue
            .iter()
            .map(|t| t.info.author.trim().to_lowercase())
            .collect();
        for pair in authors.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test]
    fn smart_shuffle_single_track_is_a_noop() {
        let mut queue = Queue::new();
        queue.add(track("only", "x"));

        queue.smart_shuffle();

        assert_eq!(ids(&queue), vec!["only"]);
    }
}
