//! # Cache Statistics
//!
//! Per-shard counters and their store-wide aggregation. Shards maintain these
//! as atomics on the hot path; this struct is the point-in-time snapshot form.

/// Statistics for one shard, or the sum across all healthy shards.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// `get` calls that returned a live value
    pub hits: u64,
    /// `get` calls that returned absent (including expired entries)
    pub misses: u64,
    /// Entries removed because their TTL deadline passed
    pub expired: u64,
    /// Entries removed to make room at capacity
    pub evictions: u64,
    pub puts: u64,
    pub removes: u64,
    pub current_size: usize,
    pub capacity: usize,
    /// Largest size this shard has reached
    pub peak_size: usize,

    // Timestamps are epoch milliseconds; zero means "never".
    pub start_time_ms: u64,
    pub last_access_time_ms: u64,
    pub last_hit_time_ms: u64,
    pub last_miss_time_ms: u64,
}

impl CacheStats {
    pub fn total_gets(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total_gets();
        if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Fraction of misses explained by TTL expiry.
    pub fn expiry_rate(&self) -> f64 {
        if self.misses > 0 {
            self.expired as f64 / self.misses as f64
        } else {
            0.0
        }
    }

    pub fn usage_rate(&self) -> f64 {
        if self.capacity > 0 {
            self.current_size as f64 / self.capacity as f64
        } else {
            0.0
        }
    }

    /// Fold another shard's counters into this aggregate. Timestamps keep
    /// the earliest start and the latest activity.
    pub fn merge(&mut self, other: &CacheStats) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.expired += other.expired;
        self.evictions += other.evictions;
        self.puts += other.puts;
        self.removes += other.removes;
        self.current_size += other.current_size;
        self.capacity += other.capacity;
        self.peak_size += other.peak_size;

        if self.start_time_ms == 0 || (other.start_time_ms != 0 && other.start_time_ms < self.start_time_ms) {
            self.start_time_ms = other.start_time_ms;
        }
        self.last_access_time_ms = self.last_access_time_ms.max(other.last_access_time_ms);
        self.last_hit_time_ms = self.last_hit_time_ms.max(other.last_hit_time_ms);
        self.last_miss_time_ms = self.last_miss_time_ms.max(other.last_miss_time_ms);
    }
}
