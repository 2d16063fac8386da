//! Blocking access gate guarding a value.
//!
//! A `ConcurrencyGate<T>` hands out tokens that dereference to the guarded
//! value.  Three modes are supported:
//!
//! - `Exclusive`: one holder at a time.
//! - `Bounded(n)`: up to `n` shared holders, or one exclusive holder.
//!   Writers that are waiting block new readers so they are not starved.
//! - `Reentrant`: one owning thread at a time, which may nest shared
//!   acquisitions.  Nested exclusive acquisition is refused because it
//!   would alias a mutable borrow.
//!
//! In the non-reentrant modes a thread that already holds a token and asks
//! for another gets `ReentrantAcquire` immediately instead of deadlocking.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::ops::{Deref, DerefMut};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::errors::{Result, StrongboxError};

/// How many holders a gate admits at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    Exclusive,
    Bounded(NonZeroUsize),
    Reentrant,
}

/// Whether a permit was granted for shared or exclusive access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Held {
    Shared,
    Exclusive,
}

#[derive(Debug, Default)]
struct GateState {
    /// Outstanding permits per thread.
    holders: HashMap<ThreadId, usize>,
    shared: usize,
    exclusive_owner: Option<ThreadId>,
    exclusive_depth: usize,
    /// The exclusive owner holds write access.
    writing: bool,
    writers_waiting: usize,
}

struct Permits {
    mode: GateMode,
    state: Mutex<GateState>,
    released: Condvar,
}

impl Permits {
    fn can_enter(&self, state: &GateState, held: Held) -> bool {
        match held {
            Held::Shared => {
                let capacity = match self.mode {
                    GateMode::Bounded(n) => n.get(),
                    GateMode::Exclusive | GateMode::Reentrant => 0,
                };
                state.exclusive_owner.is_none()
                    && state.writers_waiting == 0
                    && state.shared < capacity
            }
            Held::Exclusive => state.exclusive_owner.is_none() && state.shared == 0,
        }
    }

    fn acquire(&self, wants_write: bool, timeout: Option<Duration>) -> Result<Permit<'_>> {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if self.mode == GateMode::Reentrant && state.exclusive_owner == Some(me) {
            // Nesting under a write token would alias its mutable borrow.
            if wants_write || state.writing {
                return Err(StrongboxError::ReentrantAcquire);
            }
            state.exclusive_depth += 1;
            *state.holders.entry(me).or_insert(0) += 1;
            return Ok(Permit::new(self, Held::Exclusive));
        }
        if state.holders.contains_key(&me) {
            return Err(StrongboxError::ReentrantAcquire);
        }

        // Exclusive and reentrant gates never hand out shared permits.
        let held = match self.mode {
            GateMode::Bounded(_) if !wants_write => Held::Shared,
            _ => Held::Exclusive,
        };

        // A timeout too large to represent means no deadline at all.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        if held == Held::Exclusive {
            state.writers_waiting += 1;
        }

        while !self.can_enter(&state, held) {
            match deadline {
                Some(deadline) => {
                    let timed_out = self.released.wait_until(&mut state, deadline).timed_out();
                    if timed_out && !self.can_enter(&state, held) {
                        if held == Held::Exclusive {
                            state.writers_waiting -= 1;
                            drop(state);
                            // Readers parked behind this writer may proceed now.
                            self.released.notify_all();
                        }
                        return Err(StrongboxError::GateTimeout(timeout.unwrap_or_default()));
                    }
                }
                None => self.released.wait(&mut state),
            }
        }

        match held {
            Held::Shared => state.shared += 1,
            Held::Exclusive => {
                state.writers_waiting -= 1;
                state.exclusive_owner = Some(me);
                state.exclusive_depth = 1;
                state.writing = wants_write;
            }
        }
        *state.holders.entry(me).or_insert(0) += 1;

        Ok(Permit::new(self, held))
    }

    fn release(&self, held: Held) {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if let Some(count) = state.holders.get_mut(&me) {
            *count -= 1;
            if *count == 0 {
                state.holders.remove(&me);
            }
        }

        match held {
            Held::Shared => state.shared = state.shared.saturating_sub(1),
            Held::Exclusive => {
                state.exclusive_depth = state.exclusive_depth.saturating_sub(1);
                if state.exclusive_depth == 0 {
                    state.exclusive_owner = None;
                    state.writing = false;
                }
            }
        }

        drop(state);
        self.released.notify_all();
    }
}

/// A granted permit.  Returning it is tied to drop so it happens on every
/// exit path, including unwinding.
struct Permit<'a> {
    permits: &'a Permits,
    held: Held,
    // Permits are tracked per thread and must be returned on the same one.
    _not_send: PhantomData<*const ()>,
}

impl<'a> Permit<'a> {
    fn new(permits: &'a Permits, held: Held) -> Self {
        Self {
            permits,
            held,
            _not_send: PhantomData,
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.permits.release(self.held);
    }
}

/// A blocking gate guarding a value of type `T`.
pub struct ConcurrencyGate<T> {
    permits: Permits,
    // Never contended: the permit protocol decides who may touch it.
    value: RwLock<T>,
}

impl<T> ConcurrencyGate<T> {
    /// Create a gate in the given mode.
    pub fn new(mode: GateMode, value: T) -> Self {
        Self {
            permits: Permits {
                mode,
                state: Mutex::new(GateState::default()),
                released: Condvar::new(),
            },
            value: RwLock::new(value),
        }
    }

    /// One holder at a time.
    pub fn exclusive(value: T) -> Self {
        Self::new(GateMode::Exclusive, value)
    }

    /// Up to `readers` shared holders (at least one).
    pub fn bounded(readers: usize, value: T) -> Self {
        let readers = NonZeroUsize::new(readers).unwrap_or(NonZeroUsize::MIN);
        Self::new(GateMode::Bounded(readers), value)
    }

    /// One owning thread, which may nest shared acquisitions.
    pub fn reentrant(value: T) -> Self {
        Self::new(GateMode::Reentrant, value)
    }

    pub fn mode(&self) -> GateMode {
        self.permits.mode
    }

    /// Block until read access is granted.
    ///
    /// In `Bounded` mode this is a shared permit; otherwise the caller holds
    /// the gate alone.
    pub fn acquire(&self) -> Result<GateToken<'_, T>> {
        let permit = self.permits.acquire(false, None)?;
        Ok(GateToken {
            guard: self.value.read_recursive(),
            permit,
        })
    }

    /// Like `acquire`, but gives up with `GateTimeout` after `timeout`.
    pub fn try_acquire(&self, timeout: Duration) -> Result<GateToken<'_, T>> {
        let permit = self.permits.acquire(false, Some(timeout))?;
        Ok(GateToken {
            guard: self.value.read_recursive(),
            permit,
        })
    }

    /// Block until this thread is the only holder, then grant write access.
    pub fn acquire_exclusive(&self) -> Result<ExclusiveToken<'_, T>> {
        let permit = self.permits.acquire(true, None)?;
        Ok(ExclusiveToken {
            guard: self.value.write(),
            permit,
        })
    }

    /// Like `acquire_exclusive`, but gives up with `GateTimeout` after `timeout`.
    pub fn try_acquire_exclusive(&self, timeout: Duration) -> Result<ExclusiveToken<'_, T>> {
        let permit = self.permits.acquire(true, Some(timeout))?;
        Ok(ExclusiveToken {
            guard: self.value.write(),
            permit,
        })
    }

    /// Read access, honouring an optional timeout.
    pub fn acquire_within(&self, timeout: Option<Duration>) -> Result<GateToken<'_, T>> {
        match timeout {
            Some(t) => self.try_acquire(t),
            None => self.acquire(),
        }
    }

    /// Write access, honouring an optional timeout.
    pub fn acquire_exclusive_within(
        &self,
        timeout: Option<Duration>,
    ) -> Result<ExclusiveToken<'_, T>> {
        match timeout {
            Some(t) => self.try_acquire_exclusive(t),
            None => self.acquire_exclusive(),
        }
    }

    /// Return a token.  Equivalent to dropping it.
    pub fn release(&self, token: GateToken<'_, T>) {
        drop(token);
    }

    /// Direct access when the caller already owns the gate outright.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T> fmt::Debug for ConcurrencyGate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.permits.state.lock();
        f.debug_struct("ConcurrencyGate")
            .field("mode", &self.permits.mode)
            .field("shared", &state.shared)
            .field("exclusive", &state.exclusive_owner.is_some())
            .finish_non_exhaustive()
    }
}

/// Read access granted by a gate.
pub struct GateToken<'a, T> {
    // Field order matters: the guard is dropped before the permit is returned.
    guard: RwLockReadGuard<'a, T>,
    #[allow(dead_code)]
    permit: Permit<'a>,
}

impl<T> GateToken<'_, T> {
    /// Give access back to the gate.
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for GateToken<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

/// Write access granted by a gate.
pub struct ExclusiveToken<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
    #[allow(dead_code)]
    permit: Permit<'a>,
}

impl<T> ExclusiveToken<'_, T> {
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for ExclusiveToken<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for ExclusiveToken<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    const SHORT: Duration = Duration::from_millis(20);

    #[test]
    fn exclusive_gate_times_out_while_held() {
        let gate = ConcurrencyGate::exclusive(0u32);
        let token = gate.acquire_exclusive().unwrap();

        thread::scope(|s| {
            s.spawn(|| {
                let err = gate.try_acquire(SHORT).err().unwrap();
                assert!(matches!(err, StrongboxError::GateTimeout(_)));
                assert!(err.is_retryable());
            });
        });

        drop(token);
        assert!(gate.try_acquire(SHORT).is_ok());
    }

    #[test]
    fn huge_timeout_behaves_like_blocking_acquire() {
        let gate = ConcurrencyGate::exclusive(0u32);
        assert!(gate.try_acquire(Duration::MAX).is_ok());

        let token = gate.acquire_exclusive().unwrap();
        let holding = Barrier::new(2);
        thread::scope(|s| {
            let waiter = s.spawn(|| {
                holding.wait();
                *gate.try_acquire(Duration::MAX).unwrap()
            });
            holding.wait();
            thread::sleep(SHORT);
            drop(token);
            assert_eq!(waiter.join().unwrap(), 0);
        });

        assert!(gate.try_acquire_exclusive(Duration::MAX).is_ok());
    }

    #[test]
    fn exclusive_token_mutates_guarded_value() {
        let gate = ConcurrencyGate::exclusive(Vec::new());
        {
            let mut token = gate.acquire_exclusive().unwrap();
            token.push(7u8);
        }
        let token = gate.acquire().unwrap();
        assert_eq!(*token, vec![7u8]);
        gate.release(token);
    }

    #[test]
    fn same_thread_reacquire_fails_fast_in_exclusive_mode() {
        let gate = ConcurrencyGate::exclusive(());
        let _held = gate.acquire().unwrap();
        assert!(matches!(
            gate.acquire(),
            Err(StrongboxError::ReentrantAcquire)
        ));
        assert!(matches!(
            gate.try_acquire_exclusive(SHORT),
            Err(StrongboxError::ReentrantAcquire)
        ));
    }

    #[test]
    fn same_thread_reacquire_fails_fast_in_bounded_mode() {
        let gate = ConcurrencyGate::bounded(4, ());
        let _held = gate.acquire().unwrap();
        assert!(matches!(
            gate.acquire(),
            Err(StrongboxError::ReentrantAcquire)
        ));
    }

    #[test]
    fn reentrant_gate_allows_nested_reads_by_owner() {
        let gate = ConcurrencyGate::reentrant(5u8);
        let outer = gate.acquire().unwrap();
        let inner = gate.acquire().unwrap();
        assert_eq!(*outer + *inner, 10);

        // A nested write would alias the outer borrow.
        assert!(matches!(
            gate.acquire_exclusive(),
            Err(StrongboxError::ReentrantAcquire)
        ));

        drop(inner);
        thread::scope(|s| {
            s.spawn(|| assert!(gate.try_acquire(SHORT).is_err()));
        });
        drop(outer);

        thread::scope(|s| {
            s.spawn(|| assert!(gate.try_acquire(SHORT).is_ok()));
        });
    }

    #[test]
    fn reentrant_owner_cannot_read_under_its_own_write() {
        let gate = ConcurrencyGate::reentrant(0u8);
        let writer = gate.acquire_exclusive().unwrap();
        assert!(matches!(
            gate.acquire(),
            Err(StrongboxError::ReentrantAcquire)
        ));
        drop(writer);

        let reader = gate.acquire().unwrap();
        assert!(gate.acquire().is_ok());
        drop(reader);
    }

    #[test]
    fn bounded_gate_admits_exactly_n_readers() {
        let gate = ConcurrencyGate::bounded(3, ());
        let holding = Barrier::new(4);
        let done = Barrier::new(4);

        thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    let _token = gate.acquire().unwrap();
                    holding.wait();
                    done.wait();
                });
            }

            holding.wait();
            s.spawn(|| {
                assert!(matches!(
                    gate.try_acquire(SHORT),
                    Err(StrongboxError::GateTimeout(_))
                ));
            })
            .join()
            .unwrap();
            done.wait();
        });

        assert!(gate.try_acquire(SHORT).is_ok());
    }

    #[test]
    fn writer_excludes_readers_and_other_writers() {
        let gate = ConcurrencyGate::bounded(8, 0usize);
        let max_seen = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        let mut token = gate.acquire_exclusive().unwrap();
                        *token += 1;
                        let snapshot = *token;
                        thread::yield_now();
                        // No one else may have touched the value meanwhile.
                        assert_eq!(*token, snapshot);
                        max_seen.fetch_max(snapshot, Ordering::Relaxed);
                    }
                });
            }
        });

        assert_eq!(gate.into_inner(), 400);
        assert_eq!(max_seen.load(Ordering::Relaxed), 400);
    }

    #[test]
    fn timed_out_writer_does_not_block_later_readers() {
        let gate = ConcurrencyGate::bounded(2, ());
        let reader = gate.acquire().unwrap();

        thread::scope(|s| {
            s.spawn(|| {
                assert!(gate.try_acquire_exclusive(SHORT).is_err());
            })
            .join()
            .unwrap();
            s.spawn(|| {
                assert!(gate.try_acquire(SHORT).is_ok());
            });
        });

        reader.release();
    }
}
