//! Rate-limited timed queue.
//!
//! An ordered set keyed by node name: FIFO among distinct keys, set
//! semantics on insert, and a token-bucket limiter gating how fast entries
//! may be attempted. Failed attempts are requeued in place with a deferral
//! hint from the worker, so the head of the queue also acts as the earliest
//! retry deadline for the whole queue.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::clock::{chrono_delta, Clock};

/// Token bucket limiter: refills at `qps` tokens per second up to `burst`.
///
/// The bucket starts full, so the first attempt after a quiet period never
/// waits.
#[derive(Debug)]
pub struct TokenBucket {
    qps: f32,
    burst: f64,
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(qps: f32, burst: u32, now: DateTime<Utc>) -> Self {
        Self {
            qps,
            burst: f64::from(burst),
            tokens: f64::from(burst),
            last_refill: now,
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> bool {
        let elapsed = (now - self.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed * f64::from(self.qps)).min(self.burst);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// A queued node, remembering when it first entered the queue and when it
/// may next be attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedEntry {
    /// Node name; the queue's set key.
    pub node_name: String,
    /// Instant the node entered the queue. Preserved across retries.
    pub added_at: DateTime<Utc>,
    /// Earliest instant the entry may be attempted again.
    pub process_at: DateTime<Utc>,
}

/// FIFO queue of unique node names gated by a [`TokenBucket`].
#[derive(Debug)]
pub struct RateLimitedTimedQueue {
    entries: VecDeque<TimedEntry>,
    members: HashSet<String>,
    limiter: TokenBucket,
}

impl RateLimitedTimedQueue {
    /// Create an empty queue with the given limiter.
    pub fn new(limiter: TokenBucket) -> Self {
        Self {
            entries: VecDeque::new(),
            members: HashSet::new(),
            limiter,
        }
    }

    /// Insert a node. Returns false if it is already queued; the existing
    /// entry keeps its original timestamps.
    pub fn add(&mut self, node_name: &str, now: DateTime<Utc>) -> bool {
        if !self.members.insert(node_name.to_string()) {
            return false;
        }
        self.entries.push_back(TimedEntry {
            node_name: node_name.to_string(),
            added_at: now,
            process_at: now,
        });
        true
    }

    /// Remove a node. Returns true if it was queued.
    pub fn remove(&mut self, node_name: &str) -> bool {
        if !self.members.remove(node_name) {
            return false;
        }
        self.entries.retain(|e| e.node_name != node_name);
        true
    }

    /// Whether the node is currently queued.
    pub fn contains(&self, node_name: &str) -> bool {
        self.members.contains(node_name)
    }

    /// Number of queued nodes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queued node names in FIFO order.
    pub fn node_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.node_name.clone()).collect()
    }

    /// Attempt the queued entries in FIFO order, spending one token per
    /// attempt.
    ///
    /// The worker returns `(processed, retry_after)`. A processed entry is
    /// dropped; a failed one is requeued in place with its original
    /// `added_at`, deferred by `retry_after` (plus a nanosecond, so that a
    /// zero-delay retry still waits for the next drain pass). A deferred
    /// head ends the pass, as does token exhaustion - the outer loop calls
    /// again after its own period.
    pub async fn try_process<F, Fut>(&mut self, clock: &dyn Clock, mut worker: F)
    where
        F: FnMut(TimedEntry) -> Fut,
        Fut: Future<Output = (bool, Duration)>,
    {
        while let Some(head) = self.entries.front().cloned() {
            if !self.limiter.try_acquire(clock.now()) {
                break;
            }
            if clock.now() < head.process_at {
                break;
            }
            let (processed, retry_after) = worker(head.clone()).await;
            if processed {
                self.members.remove(&head.node_name);
                self.entries.pop_front();
            } else if let Some(front) = self.entries.front_mut() {
                front.process_at =
                    clock.now() + chrono_delta(retry_after) + TimeDelta::nanoseconds(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn queue_with(qps: f32, burst: u32, clock: &FakeClock) -> RateLimitedTimedQueue {
        RateLimitedTimedQueue::new(TokenBucket::new(qps, burst, clock.now()))
    }

    #[test]
    fn add_is_set_semantic() {
        let clock = FakeClock::new(Utc::now());
        let mut q = queue_with(10.0, 1, &clock);

        assert!(q.add("n1", clock.now()));
        let first_added_at = q.entries.front().unwrap().added_at;

        clock.advance(Duration::from_secs(5));
        // Re-adding must not refresh the timestamp
        assert!(!q.add("n1", clock.now()));
        assert_eq!(q.entries.front().unwrap().added_at, first_added_at);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn remove_reports_presence() {
        let clock = FakeClock::new(Utc::now());
        let mut q = queue_with(10.0, 1, &clock);

        q.add("n1", clock.now());
        assert!(q.remove("n1"));
        assert!(!q.remove("n1"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn processes_in_fifo_order() {
        let clock = FakeClock::new(Utc::now());
        // Burst large enough that tokens are not the limiter here
        let mut q = queue_with(10.0, 100, &clock);
        q.add("n1", clock.now());
        q.add("n2", clock.now());
        q.add("n3", clock.now());

        let mut seen = Vec::new();
        q.try_process(&clock, |entry| {
            seen.push(entry.node_name.clone());
            async { (true, Duration::ZERO) }
        })
        .await;

        assert_eq!(seen, vec!["n1", "n2", "n3"]);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn token_exhaustion_yields_immediately() {
        let clock = FakeClock::new(Utc::now());
        // burst 1, slow refill: only one attempt per pass
        let mut q = queue_with(0.1, 1, &clock);
        q.add("n1", clock.now());
        q.add("n2", clock.now());

        let mut seen = Vec::new();
        q.try_process(&clock, |entry| {
            seen.push(entry.node_name.clone());
            async { (true, Duration::ZERO) }
        })
        .await;
        assert_eq!(seen, vec!["n1"]);
        assert_eq!(q.node_names(), vec!["n2"]);

        // After 1/QPS the next token is available
        clock.advance(Duration::from_secs(10));
        q.try_process(&clock, |entry| {
            seen.push(entry.node_name.clone());
            async { (true, Duration::ZERO) }
        })
        .await;
        assert_eq!(seen, vec!["n1", "n2"]);
    }

    #[tokio::test]
    async fn failed_entry_keeps_added_at_and_defers() {
        let clock = FakeClock::new(Utc::now());
        let mut q = queue_with(10.0, 100, &clock);
        q.add("n1", clock.now());
        let added_at = q.entries.front().unwrap().added_at;

        clock.advance(Duration::from_secs(3));
        q.try_process(&clock, |_| async { (false, Duration::from_secs(7)) })
            .await;

        let entry = q.entries.front().unwrap();
        assert_eq!(entry.added_at, added_at);
        assert!(entry.process_at > clock.now() + TimeDelta::seconds(6));

        // Not yet due: the pass must not attempt it
        let mut attempts = 0;
        q.try_process(&clock, |_| {
            attempts += 1;
            async { (true, Duration::ZERO) }
        })
        .await;
        assert_eq!(attempts, 0);

        // Past the deferral it is attempted again
        clock.advance(Duration::from_secs(8));
        q.try_process(&clock, |_| {
            attempts += 1;
            async { (true, Duration::ZERO) }
        })
        .await;
        assert_eq!(attempts, 1);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn zero_delay_failure_waits_for_next_pass() {
        let clock = FakeClock::new(Utc::now());
        let mut q = queue_with(10.0, 100, &clock);
        q.add("n1", clock.now());

        let mut attempts = 0;
        q.try_process(&clock, |_| {
            attempts += 1;
            async { (false, Duration::ZERO) }
        })
        .await;
        // One attempt, then the nanosecond deferral ends the pass
        assert_eq!(attempts, 1);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn token_bucket_starts_full_and_refills() {
        let clock = FakeClock::new(Utc::now());
        let mut bucket = TokenBucket::new(0.1, 1, clock.now());

        assert!(bucket.try_acquire(clock.now()));
        assert!(!bucket.try_acquire(clock.now()));

        clock.advance(Duration::from_secs(5));
        assert!(!bucket.try_acquire(clock.now()));

        clock.advance(Duration::from_secs(5));
        assert!(bucket.try_acquire(clock.now()));
    }

    #[test]
    fn token_bucket_caps_at_burst() {
        let clock = FakeClock::new(Utc::now());
        let mut bucket = TokenBucket::new(1.0, 1, clock.now());
        assert!(bucket.try_acquire(clock.now()));

        // A long quiet period must not bank more than `burst` tokens
        clock.advance(Duration::from_secs(3600));
        assert!(bucket.try_acquire(clock.now()));
        assert!(!bucket.try_acquire(clock.now()));
    }
}
