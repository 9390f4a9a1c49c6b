//! [`PreviousCycle`] – aggregate observables of the last completed cycle.
//!
//! Written only by the real-time thread at the end of every successful
//! `update`, read without locking from any thread.  A sequence counter makes
//! readers retry while a publish is in flight, so a reader never mixes the
//! force of one cycle with the counts of another.  The real-time thread also
//! reads it back as its fallback output when the mechanism bank is busy.

use std::hint;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering, fence};

#[derive(Debug)]
pub struct PreviousCycle {
    seq: AtomicU64,
    nb_mechanisms: AtomicUsize,
    on_guide: AtomicUsize,
    force: Box<[AtomicU64]>,
    stale_cycles: AtomicU64,
}

/// Consistent copy of the published scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreviousCounts {
    pub nb_mechanisms: usize,
    pub on_guide: usize,
    /// Completed, non-stale cycles.
    pub cycles: u64,
}

impl PreviousCycle {
    /// Zeroed observables for a `dim`-dimensional force.
    pub fn new(dim: usize) -> Self {
        Self {
            seq: AtomicU64::new(0),
            nb_mechanisms: AtomicUsize::new(0),
            on_guide: AtomicUsize::new(0),
            force: (0..dim).map(|_| AtomicU64::new(0.0f64.to_bits())).collect(),
            stale_cycles: AtomicU64::new(0),
        }
    }

    pub fn dim(&self) -> usize {
        self.force.len()
    }

    /// Publish one cycle.  Single writer: the real-time thread.
    pub fn publish(&self, nb_mechanisms: usize, on_guide: usize, force: &[f64]) {
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        self.nb_mechanisms.store(nb_mechanisms, Ordering::Relaxed);
        self.on_guide.store(on_guide, Ordering::Relaxed);
        for (slot, f) in self.force.iter().zip(force) {
            slot.store(f.to_bits(), Ordering::Relaxed);
        }
        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Copy the last published force into `out` and return the matching
    /// counts.
    pub fn read_into(&self, out: &mut [f64]) -> PreviousCounts {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                hint::spin_loop();
                continue;
            }
            let nb_mechanisms = self.nb_mechanisms.load(Ordering::Relaxed);
            let on_guide = self.on_guide.load(Ordering::Relaxed);
            for (o, slot) in out.iter_mut().zip(self.force.iter()) {
                *o = f64::from_bits(slot.load(Ordering::Relaxed));
            }
            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == before {
                return PreviousCounts {
                    nb_mechanisms,
                    on_guide,
                    cycles: before / 2,
                };
            }
        }
    }

    pub fn counts(&self) -> PreviousCounts {
        self.read_into(&mut [])
    }

    pub fn force(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.dim()];
        self.read_into(&mut out);
        out
    }

    /// Count one cycle served from these values; returns the running total.
    pub fn record_stale(&self) -> u64 {
        self.stale_cycles.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn stale_cycles(&self) -> u64 {
        self.stale_cycles.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_zeroed() {
        let prev = PreviousCycle::new(3);
        assert_eq!(prev.force(), vec![0.0; 3]);
        assert_eq!(prev.counts(), PreviousCounts::default());
    }

    #[test]
    fn publish_is_visible_to_readers() {
        let prev = PreviousCycle::new(2);
        prev.publish(4, 1, &[1.5, -2.0]);
        let mut out = [0.0; 2];
        let counts = prev.read_into(&mut out);
        assert_eq!(out, [1.5, -2.0]);
        assert_eq!(counts.nb_mechanisms, 4);
        assert_eq!(counts.on_guide, 1);
        assert_eq!(counts.cycles, 1);
    }

    #[test]
    fn stale_counter_accumulates() {
        let prev = PreviousCycle::new(1);
        assert_eq!(prev.record_stale(), 1);
        assert_eq!(prev.record_stale(), 2);
        assert_eq!(prev.stale_cycles(), 2);
    }

    #[test]
    fn readers_never_see_torn_cycles() {
        let prev = Arc::new(PreviousCycle::new(4));
        let writer = {
            let prev = Arc::clone(&prev);
            thread::spawn(move || {
                for i in 0..20_000usize {
                    let v = i as f64;
                    prev.publish(i, i, &[v, v, v, v]);
                }
            })
        };
        let mut out = [0.0; 4];
        for _ in 0..20_000 {
            let counts = prev.read_into(&mut out);
            assert!(out.iter().all(|v| *v == out[0]));
            assert_eq!(counts.nb_mechanisms as f64, out[0]);
        }
        writer.join().expect("writer");
    }
}
