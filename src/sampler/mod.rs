use rand::Rng;

/// Bounded-memory weighted reservoir over a stream of float samples.
///
/// Each incoming value receives a random priority skewed by an aging weight
/// `exp(delta * index)`, so later samples are slightly favored while the
/// overall sample stays approximately uniform. Memory is fixed at
/// `capacity` entries regardless of stream length.
#[derive(Debug)]
pub struct ReservoirSampler {
    capacity: usize,
    delta: f64,
    seen: u64,
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    priority: f64,
    seq: u64,
    value: f32,
}

impl ReservoirSampler {
    /// Creates a sampler holding at most `capacity` values.
    pub fn new(capacity: usize, delta: f64) -> Self {
        Self {
            capacity: capacity.max(1),
            delta,
            seen: 0,
            entries: Vec::with_capacity(capacity.max(1)),
        }
    }

    /// Offers one value to the reservoir.
    pub fn add(&mut self, value: f32) {
        let weight = (self.delta * self.seen as f64).exp();
        let priority = rand::thread_rng().gen::<f64>().powf(1.0 / weight);
        let entry = Entry {
            priority,
            seq: self.seen,
            value,
        };
        self.seen += 1;

        if self.entries.len() < self.capacity {
            self.entries.push(entry);
            return;
        }

        // Replace the lowest-priority survivor if the newcomer outranks it.
        let mut min_idx = 0;
        for (idx, candidate) in self.entries.iter().enumerate() {
            if candidate.priority < self.entries[min_idx].priority {
                min_idx = idx;
            }
        }
        if entry.priority > self.entries[min_idx].priority {
            self.entries[min_idx] = entry;
        }
    }

    /// Returns the sampled values in stream order.
    pub fn sample(&self) -> Vec<f32> {
        let mut ordered: Vec<Entry> = self.entries.clone();
        ordered.sort_by_key(|e| e.seq);
        ordered.into_iter().map(|e| e.value).collect()
    }

    /// Total values offered, including evicted ones.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
