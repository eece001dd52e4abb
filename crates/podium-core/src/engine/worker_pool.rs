//! Worker pool for multi-core track processing
//!
//! Tracks are mutually independent within a chunk, so the engine can fan
//! them out across cores. The pool wraps a dedicated rayon thread pool;
//! each chunk is one fork-join: the audio thread forks per-track jobs and
//! resumes when the last worker finishes. Workers follow the same
//! discipline as the audio thread (the jobs themselves never allocate,
//! lock or block).
//!
//! With one core configured there is no pool at all and tracks run inline
//! on the audio thread.

use rayon::prelude::*;

use crate::error::{EngineError, EngineResult};
use crate::track::Track;

/// A fixed set of worker threads processing whole tracks.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    cores: usize,
}

impl WorkerPool {
    /// Build a pool with one thread per core. `cores` must be at least 2;
    /// single-core configurations bypass the pool entirely.
    pub fn new(cores: usize) -> EngineResult<Self> {
        if cores < 2 {
            return Err(EngineError::NotEnabled);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cores)
            .thread_name(|index| format!("audio-worker-{}", index))
            .build()
            .map_err(|error| {
                log::error!("worker pool construction failed: {}", error);
                EngineError::NotEnabled
            })?;
        Ok(Self { pool, cores })
    }

    pub fn cores(&self) -> usize {
        self.cores
    }

    /// Process every track for the current chunk and wait for all of them.
    pub fn process_tracks(&self, tracks: &mut [Box<Track>]) {
        self.pool.install(|| {
            tracks.par_iter_mut().for_each(|track| track.process_chunk());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SampleBuffer;
    use crate::processor::test_support::TestGainProcessor;
    use crate::processor::Processor;

    fn build_tracks(count: usize) -> Vec<Box<Track>> {
        (0..count)
            .map(|i| {
                let mut track = Track::new(&format!("wp_track_{}", i), 2).unwrap();
                let gain = TestGainProcessor::new(&format!("wp_gain_{}", i));
                gain.gain.set_domain((i + 1) as f32);
                assert!(track.add_processor(Box::new(gain), None).is_ok());
                Box::new(track)
            })
            .collect()
    }

    fn feed_and_render(tracks: &mut [Box<Track>], parallel: Option<&WorkerPool>) -> Vec<f32> {
        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(0.1);
        input.channel_mut(1).fill(0.1);

        for track in tracks.iter_mut() {
            track.input_staging_mut().view_mut(2).copy_from(&input.view(2));
        }
        match parallel {
            Some(pool) => pool.process_tracks(tracks),
            None => tracks.iter_mut().for_each(|track| track.process_chunk()),
        }
        tracks.iter().map(|track| track.output_staging().channel(0)[0]).collect()
    }

    #[test]
    fn test_single_core_is_rejected() {
        assert!(WorkerPool::new(1).is_err());
        assert!(WorkerPool::new(0).is_err());
    }

    #[test]
    fn test_parallel_matches_inline() {
        let pool = WorkerPool::new(4).unwrap();
        assert_eq!(pool.cores(), 4);

        let mut inline_tracks = build_tracks(4);
        let mut pooled_tracks = build_tracks(4);

        let inline = feed_and_render(&mut inline_tracks, None);
        let pooled = feed_and_render(&mut pooled_tracks, Some(&pool));
        assert_eq!(inline, pooled);
        assert!((inline[0] - 0.1).abs() < 1e-6);
        assert!((inline[3] - 0.4).abs() < 1e-6);
    }
}
