//! Fixed-size pool of broker publish channels.
//!
//! The pool is filled once at startup and never grows, which caps the number of
//! concurrent publishes the HTTP layer can put on the broker. A caller borrows a
//! channel through [`PooledChannel`]; the guard puts it back when dropped, on
//! every exit path, whether or not the publish succeeded.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The pool was closed while the caller was waiting, or before it asked.
    #[error("publish channel pool is closed")]
    Closed,

    #[error("no publish channel became available within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug)]
struct PoolState<C> {
    idle: Vec<C>,
    closed: bool,
}

#[derive(Debug)]
pub struct PublishChannelPool<C> {
    state: Mutex<PoolState<C>>,
    returned: Condvar,
    capacity: usize,
}

impl<C> PublishChannelPool<C> {
    pub fn new(channels: Vec<C>) -> Self {
        let capacity = channels.len();
        Self {
            state: Mutex::new(PoolState {
                idle: channels,
                closed: false,
            }),
            returned: Condvar::new(),
            capacity,
        }
    }

    /// Build `size` channels up front. Any factory failure aborts the whole pool.
    pub fn open<F, E>(size: usize, mut factory: F) -> Result<Self, E>
    where
        F: FnMut(usize) -> Result<C, E>,
    {
        let channels = (0..size).map(&mut factory).collect::<Result<Vec<_>, E>>()?;
        Ok(Self::new(channels))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Channels currently idle in the pool.
    pub fn available(&self) -> usize {
        self.lock().idle.len()
    }

    /// Block until a channel is free.
    pub fn acquire(&self) -> Result<PooledChannel<'_, C>, PoolError> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(channel) = state.idle.pop() {
                return Ok(PooledChannel::new(self, channel));
            }
            state = self
                .returned
                .wait(state)
                .unwrap_or_else(|p| p.into_inner());
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<PooledChannel<'_, C>, PoolError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(channel) = state.idle.pop() {
                return Ok(PooledChannel::new(self, channel));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::Timeout(timeout));
            }
            state = self
                .returned
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|p| p.into_inner())
                .0;
        }
    }

    /// Fail current and future acquirers with [`PoolError::Closed`].
    pub fn close(&self) {
        self.lock().closed = true;
        self.returned.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn give_back(&self, channel: C) {
        self.lock().idle.push(channel);
        self.returned.notify_one();
    }

    // The idle list stays valid even if a holder panicked.
    fn lock(&self) -> MutexGuard<'_, PoolState<C>> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Exclusive use of one pooled channel.
#[derive(Debug)]
pub struct PooledChannel<'a, C> {
    pool: &'a PublishChannelPool<C>,
    channel: Option<C>,
}

impl<'a, C> PooledChannel<'a, C> {
    fn new(pool: &'a PublishChannelPool<C>, channel: C) -> Self {
        Self {
            pool,
            channel: Some(channel),
        }
    }

    /// Return the channel now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl<C> Deref for PooledChannel<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Only `Drop` takes the channel out.
        self.channel.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<C> DerefMut for PooledChannel<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.channel.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<C> Drop for PooledChannel<'_, C> {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            self.pool.give_back(channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn open_builds_every_channel() {
        let pool = PublishChannelPool::open(4, |i| Ok::<_, ()>(i)).unwrap();
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.available(), 4);

        let failed = PublishChannelPool::open(4, |i| if i == 2 { Err("boom") } else { Ok(i) });
        assert_eq!(failed.err(), Some("boom"));
    }

    #[test]
    fn guard_returns_channel_on_every_path() {
        let pool = PublishChannelPool::new(vec![0u32, 1]);

        {
            let mut ch = pool.acquire().unwrap();
            *ch += 10;
            assert_eq!(pool.available(), 1);
        }
        assert_eq!(pool.available(), 2);

        let result: Result<(), &str> = (|| {
            let _ch = pool.acquire().map_err(|_| "pool")?;
            Err("publish failed")
        })();
        assert!(result.is_err());
        assert_eq!(pool.available(), 2);

        let ch = pool.acquire().unwrap();
        ch.release();
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn guard_returns_channel_when_holder_panics() {
        let pool = Arc::new(PublishChannelPool::new(vec![()]));
        let p = Arc::clone(&pool);
        let joined = thread::spawn(move || {
            let _ch = p.acquire().unwrap();
            panic!("publish blew up");
        })
        .join();

        assert!(joined.is_err());
        assert_eq!(pool.available(), 1);
        assert!(pool.acquire_timeout(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn acquire_blocks_until_release() {
        let pool = Arc::new(PublishChannelPool::new(vec![7u8]));
        let held = pool.acquire().unwrap();

        let p = Arc::clone(&pool);
        let waiter = thread::spawn(move || *p.acquire().unwrap());
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.join().unwrap(), 7);
    }

    #[test]
    fn acquire_timeout_expires() {
        let pool = PublishChannelPool::new(vec![()]);
        let _held = pool.acquire().unwrap();
        assert_eq!(
            pool.acquire_timeout(Duration::from_millis(20)).err(),
            Some(PoolError::Timeout(Duration::from_millis(20)))
        );
    }

    #[test]
    fn close_wakes_blocked_acquirers() {
        let pool = Arc::new(PublishChannelPool::new(vec![()]));
        let _held = pool.acquire().unwrap();

        let p = Arc::clone(&pool);
        let waiter = thread::spawn(move || p.acquire().map(|_| ()));
        thread::sleep(Duration::from_millis(30));
        pool.close();

        assert_eq!(waiter.join().unwrap(), Err(PoolError::Closed));
        assert!(pool.is_closed());
    }

    /// Publish through a pooled channel; `fail` bails out with the guard still held.
    fn publish_through(
        pool: &PublishChannelPool<usize>,
        in_use: &AtomicUsize,
        max_seen: &AtomicUsize,
        fail: bool,
    ) -> Result<(), String> {
        let ch = pool.acquire().map_err(|e| e.to_string())?;
        let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
        max_seen.fetch_max(now, Ordering::SeqCst);
        in_use.fetch_sub(1, Ordering::SeqCst);
        if fail {
            return Err(format!("publish on channel {} failed", *ch));
        }
        Ok(())
    }

    #[test]
    fn never_shrinks_under_concurrent_failures() {
        const SIZE: usize = 4;
        let pool = Arc::new(PublishChannelPool::open(SIZE, |i| Ok::<_, ()>(i)).unwrap());
        let in_use = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..16)
            .map(|w| {
                let pool = Arc::clone(&pool);
                let in_use = Arc::clone(&in_use);
                let max_seen = Arc::clone(&max_seen);
                let failures = Arc::clone(&failures);
                thread::spawn(move || {
                    for i in 0..200 {
                        let fail = (w + i) % 3 == 0;
                        if publish_through(&pool, &in_use, &max_seen, fail).is_err() {
                            failures.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        assert!(failures.load(Ordering::SeqCst) > 1000);
        assert_eq!(pool.available(), SIZE);
        assert!(max_seen.load(Ordering::SeqCst) <= SIZE);
    }
}
