use crate::error::{Result, SecureBytesError};
use crate::util::scramble;
use log::{trace, warn};
use once_cell::sync::OnceCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use zeroize::Zeroize;

/// Default reservoir capacity in bytes.
pub const DEFAULT_POOL_CAPACITY: usize = 4096;

// Number of independently sampled batches folded into one refill.
const FOLD_ROUNDS: usize = 8;

// Delay between blocking-read retries (milliseconds).
const RETRY_DELAY_MS: u64 = 1;

// Retry ceiling for blocking reads.
const MAX_RETRIES: usize = 5000;

// Producer wait slice while the reservoir is full (milliseconds). Bounded
// so a shutdown signal is observed promptly.
const PRODUCER_IDLE_MS: u64 = 50;

static GLOBAL_POOL: OnceCell<EntropyPool> = OnceCell::new();

/// Source of harvested entropy, the seam injected into key generation.
///
/// Implemented by [`EntropyPool`]; tests may substitute a deterministic
/// source.
pub trait EntropySource: Send + Sync {
    /// Blocking read of exactly `count` bytes.
    fn get_bytes(&self, count: usize) -> Result<Vec<u8>>;

    /// Non-blocking, best-effort read of up to `max` bytes.
    fn get_available_bytes(&self, max: usize) -> Result<Vec<u8>>;
}

struct PoolShared {
    reservoir: Mutex<VecDeque<u8>>,
    bytes_ready: Condvar,
    space_free: Condvar,
    running: AtomicBool,
    capacity: usize,
    max_retries: usize,
}

/// Bounded reservoir of scheduler-jitter entropy with an owned producer.
///
/// The producer thread harvests timing noise from a spinning counter thread,
/// folds [`FOLD_ROUNDS`] independently sampled batches together by XOR, and
/// appends the result to the reservoir until it is full. Consumers drain the
/// reservoir through [`EntropySource`]; every byte is handed out exactly
/// once. The harvested bytes strengthen OS randomness (see
/// [`mixed_key_material`]) and are never used as the sole key source.
///
/// The pool is an explicit service: construct it with [`EntropyPool::new`],
/// stop it with [`EntropyPool::shutdown`] (also run on drop), or use the
/// process-wide instance behind [`EntropyPool::global`]. Producer faults are
/// logged and swallowed; consumers only ever observe `EntropyUnavailable`.
///
/// # Examples
///
/// ```rust,no_run
/// use securebytes::entropy::{EntropyPool, EntropySource};
///
/// let pool = EntropyPool::new(1024).unwrap();
/// let seed = pool.get_bytes(32).unwrap();
/// assert_eq!(seed.len(), 32);
/// pool.shutdown();
/// ```
pub struct EntropyPool {
    shared: Arc<PoolShared>,
    producer: Mutex<Option<JoinHandle<()>>>,
}

impl EntropyPool {
    /// Creates a pool with the given reservoir capacity and starts its
    /// producer thread.
    ///
    /// # Errors
    ///
    /// * `SecureBytesError::MissingArgument` - If `capacity` is zero.
    /// * `SecureBytesError::OperationFailed` - If the producer thread cannot
    ///   be spawned.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::build(capacity, MAX_RETRIES, true)
    }

    /// The process-wide pool, created on first use with the default
    /// capacity.
    ///
    /// # Errors
    ///
    /// Propagates construction failures from the first call.
    pub fn global() -> Result<&'static EntropyPool> {
        GLOBAL_POOL.get_or_try_init(|| Self::new(DEFAULT_POOL_CAPACITY))
    }

    fn build(capacity: usize, max_retries: usize, spawn_producer: bool) -> Result<Self> {
        if capacity == 0 {
            return Err(SecureBytesError::MissingArgument(
                "pool capacity must be positive".to_string(),
            ));
        }

        let shared = Arc::new(PoolShared {
            reservoir: Mutex::new(VecDeque::with_capacity(capacity)),
            bytes_ready: Condvar::new(),
            space_free: Condvar::new(),
            running: AtomicBool::new(true),
            capacity,
            max_retries,
        });

        let producer = if spawn_producer {
            let producer_shared = shared.clone();
            let handle = thread::Builder::new()
                .name("securebytes-entropy".to_string())
                .spawn(move || producer_loop(&producer_shared))
                .map_err(|e| {
                    SecureBytesError::OperationFailed(format!(
                        "failed to spawn entropy producer: {}",
                        e
                    ))
                })?;
            Some(handle)
        } else {
            None
        };

        Ok(Self {
            shared,
            producer: Mutex::new(producer),
        })
    }

    /// Reservoir capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Current reservoir fill level in bytes.
    ///
    /// # Errors
    ///
    /// * `SecureBytesError::OperationFailed` - If the reservoir lock is
    ///   poisoned.
    pub fn available(&self) -> Result<usize> {
        let reservoir = self.lock_reservoir()?;
        Ok(reservoir.len())
    }

    /// Stops the producer, joins it, and wipes any unconsumed bytes.
    ///
    /// Safe to call more than once; subsequent blocking reads fail with
    /// `EntropyUnavailable`.
    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.space_free.notify_all();
        self.shared.bytes_ready.notify_all();

        if let Ok(mut slot) = self.producer.lock() {
            if let Some(handle) = slot.take() {
                if handle.join().is_err() {
                    warn!("Entropy producer thread panicked before shutdown");
                }
            }
        }

        if let Ok(mut reservoir) = self.shared.reservoir.lock() {
            reservoir.make_contiguous().zeroize();
            reservoir.clear();
        }
    }

    /// Stops the process-wide pool if it was ever created.
    ///
    /// Intended for deterministic teardown at process shutdown; the global
    /// accessor keeps returning the stopped pool afterwards.
    pub fn shutdown_global() {
        if let Some(pool) = GLOBAL_POOL.get() {
            pool.shutdown();
        }
    }

    fn lock_reservoir(&self) -> Result<std::sync::MutexGuard<'_, VecDeque<u8>>> {
        self.shared
            .reservoir
            .lock()
            .map_err(|_| SecureBytesError::OperationFailed("entropy reservoir lock poisoned".to_string()))
    }

    #[cfg(test)]
    fn new_idle(capacity: usize, max_retries: usize) -> Self {
        Self::build(capacity, max_retries, false).expect("failed to build idle pool")
    }

    #[cfg(test)]
    fn seed_for_test(&self, bytes: &[u8]) {
        let mut reservoir = self.shared.reservoir.lock().expect("reservoir lock");
        reservoir.extend(bytes.iter().copied());
    }
}

impl EntropySource for EntropyPool {
    /// Drains exactly `count` bytes, waiting for the producer as needed.
    ///
    /// Spurious wake-ups re-check the fill level; nothing is drained until
    /// the full request can be satisfied, so a failed call leaves the
    /// reservoir untouched.
    ///
    /// # Errors
    ///
    /// * `SecureBytesError::MissingArgument` - If `count` is zero.
    /// * `SecureBytesError::EntropyUnavailable` - If `count` exceeds the
    ///   capacity, the pool is shut down, or the retry ceiling elapses.
    fn get_bytes(&self, count: usize) -> Result<Vec<u8>> {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        if count == 0 {
            return Err(SecureBytesError::MissingArgument(
                "requested byte count must be positive".to_string(),
            ));
        }
        if count > self.shared.capacity {
            return Err(SecureBytesError::EntropyUnavailable(format!(
                "request for {} bytes exceeds pool capacity {}",
                count, self.shared.capacity
            )));
        }

        let mut reservoir = self.lock_reservoir()?;
        let mut retries = 0_usize;
        while reservoir.len() < count {
            if !self.shared.running.load(Ordering::Relaxed) {
                return Err(SecureBytesError::EntropyUnavailable(
                    "pool is shut down".to_string(),
                ));
            }
            if retries >= self.shared.max_retries {
                return Err(SecureBytesError::EntropyUnavailable(format!(
                    "{} bytes not available after {} retries",
                    count, retries
                )));
            }
            let (guard, _timeout) = self
                .shared
                .bytes_ready
                .wait_timeout(reservoir, Duration::from_millis(RETRY_DELAY_MS))
                .map_err(|_| {
                    SecureBytesError::OperationFailed(
                        "entropy reservoir lock poisoned".to_string(),
                    )
                })?;
            reservoir = guard;
            retries += 1;
        }

        let bytes: Vec<u8> = reservoir.drain(..count).collect();
        drop(reservoir);
        self.shared.space_free.notify_one();
        trace!("Drained {} bytes from entropy pool", count);

        #[cfg(feature = "metrics")]
        metrics::histogram!("securebytes.entropy.get_bytes_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        Ok(bytes)
    }

    /// Drains up to `max` currently available bytes without waiting.
    ///
    /// May return fewer bytes than requested, including none.
    ///
    /// # Errors
    ///
    /// * `SecureBytesError::OperationFailed` - If the reservoir lock is
    ///   poisoned.
    fn get_available_bytes(&self, max: usize) -> Result<Vec<u8>> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let mut reservoir = self.lock_reservoir()?;
        let take = max.min(reservoir.len());
        let bytes: Vec<u8> = reservoir.drain(..take).collect();
        drop(reservoir);

        if take > 0 {
            self.shared.space_free.notify_one();
            trace!("Drained {} of {} requested available bytes", take, max);
        }
        Ok(bytes)
    }
}

impl Drop for EntropyPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn producer_loop(shared: &Arc<PoolShared>) {
    let batch_len = (shared.capacity / FOLD_ROUNDS).max(1);

    while shared.running.load(Ordering::Relaxed) {
        // Wait for room, bounded so the running flag is re-checked.
        {
            let mut reservoir = match shared.reservoir.lock() {
                Ok(guard) => guard,
                Err(_) => {
                    warn!("Entropy producer exiting: reservoir lock poisoned");
                    return;
                }
            };
            while reservoir.len() >= shared.capacity {
                if !shared.running.load(Ordering::Relaxed) {
                    return;
                }
                reservoir = match shared
                    .space_free
                    .wait_timeout(reservoir, Duration::from_millis(PRODUCER_IDLE_MS))
                {
                    Ok((guard, _timeout)) => guard,
                    Err(_) => {
                        warn!("Entropy producer exiting: reservoir lock poisoned");
                        return;
                    }
                };
            }
        }

        // Sample outside the lock; consumers stay unblocked meanwhile.
        let batch = match sample_folded_batch(batch_len) {
            Ok(batch) => batch,
            Err(e) => {
                // Producer faults never propagate; a starving pool surfaces
                // to consumers as EntropyUnavailable.
                warn!("Entropy batch generation failed: {}", e);
                thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
                continue;
            }
        };

        if !shared.running.load(Ordering::Relaxed) {
            return;
        }

        match shared.reservoir.lock() {
            Ok(mut reservoir) => {
                let room = shared.capacity.saturating_sub(reservoir.len());
                reservoir.extend(batch.iter().take(room).copied());
                drop(reservoir);
                shared.bytes_ready.notify_all();
            }
            Err(_) => {
                warn!("Entropy producer exiting: reservoir lock poisoned");
                return;
            }
        }
    }
}

// XOR-folds independently sampled batches so a weak round cannot thin the
// result below the strongest round.
fn sample_folded_batch(len: usize) -> Result<Vec<u8>> {
    let mut folded = vec![0_u8; len];
    for _ in 0..FOLD_ROUNDS {
        let batch = sample_jitter_batch(len)?;
        for (dst, src) in folded.iter_mut().zip(batch.iter()) {
            *dst ^= src;
        }
    }
    Ok(folded)
}

// Harvests timing noise: a companion thread spins on a counter while the
// sampler observes it across yield points, folding counter values and
// deltas into each output byte.
fn sample_jitter_batch(len: usize) -> Result<Vec<u8>> {
    let counter = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    let spinner_counter = counter.clone();
    let spinner_stop = stop.clone();
    let spinner = thread::Builder::new()
        .name("securebytes-jitter".to_string())
        .spawn(move || {
            while !spinner_stop.load(Ordering::Relaxed) {
                spinner_counter.fetch_add(1, Ordering::Relaxed);
            }
        })
        .map_err(|e| {
            SecureBytesError::OperationFailed(format!("failed to spawn jitter thread: {}", e))
        })?;

    let mut out = vec![0_u8; len];
    let mut last = counter.load(Ordering::Relaxed);
    for byte in out.iter_mut() {
        let mut acc: u8 = 0;
        for _ in 0..2 {
            thread::yield_now();
            let now = counter.load(Ordering::Relaxed);
            let delta = now.wrapping_sub(last);
            acc = acc.rotate_left(3) ^ (now as u8) ^ (delta as u8).rotate_left(5);
            last = now;
        }
        *byte = acc;
    }

    stop.store(true, Ordering::Relaxed);
    if spinner.join().is_err() {
        warn!("Jitter thread panicked during harvest");
    }
    Ok(out)
}

/// [`EntropySource`] backed by the process-wide pool.
///
/// A stateless handle; every read goes through [`EntropyPool::global`].
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalEntropySource;

impl EntropySource for GlobalEntropySource {
    fn get_bytes(&self, count: usize) -> Result<Vec<u8>> {
        EntropyPool::global()?.get_bytes(count)
    }

    fn get_available_bytes(&self, max: usize) -> Result<Vec<u8>> {
        EntropyPool::global()?.get_available_bytes(max)
    }
}

/// Key material mixed from OS randomness and harvested pool entropy.
///
/// The OS CSPRNG provides the baseline; best-effort pool bytes are folded in
/// by XOR, so the result is never weaker than either source alone. The
/// material wipes itself when dropped.
///
/// # Errors
///
/// * `SecureBytesError::MissingArgument` - If `len` is zero.
/// * `SecureBytesError::OperationFailed` - If the OS random source fails.
pub fn mixed_key_material(
    source: &dyn EntropySource,
    len: usize,
) -> Result<zeroize::Zeroizing<Vec<u8>>> {
    if len == 0 {
        return Err(SecureBytesError::MissingArgument(
            "key material length must be positive".to_string(),
        ));
    }

    let mut material = zeroize::Zeroizing::new(vec![0_u8; len]);
    scramble(&mut material)?;

    let mut strengthener = source.get_available_bytes(len)?;
    for (dst, src) in material.iter_mut().zip(strengthener.iter()) {
        *dst ^= src;
    }
    strengthener.zeroize();

    Ok(material)
}
