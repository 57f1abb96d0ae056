use crate::{AmlError, Handler, table::Facs};
use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};
use spinning_top::Spinlock;

/// AML encodes "wait forever" as a timeout of `0xffff` milliseconds.
pub const TIMEOUT_FOREVER: u16 = 0xffff;

const NANOS_PER_MILLI: u64 = 1_000_000;

/// The mutex primitive backing both AML `Mutex` objects and the per-method
/// serialization of `Serialized` methods. Recursive with respect to the
/// owning thread; blocking acquisition polls with a host sleep so the
/// processor is relinquished at this suspension point.
pub struct AmlMutex {
    state: Spinlock<OwnerState>,
}

#[derive(Clone, Copy, Default)]
struct OwnerState {
    owner: Option<u64>,
    depth: u32,
}

impl AmlMutex {
    pub fn new() -> AmlMutex {
        AmlMutex { state: Spinlock::new(OwnerState::default()) }
    }

    /// Try to acquire the mutex on behalf of the current thread, waiting up
    /// to `timeout_ms` milliseconds (`0xffff` waits forever). Returns whether
    /// the mutex was acquired.
    pub fn acquire<H>(&self, handler: &H, timeout_ms: u16) -> bool
    where
        H: Handler,
    {
        let thread = handler.current_thread_id();
        let deadline = handler.nanos_since_boot().wrapping_add(timeout_ms as u64 * NANOS_PER_MILLI);

        loop {
            {
                let mut state = self.state.lock();
                match state.owner {
                    Some(owner) if owner == thread => {
                        state.depth += 1;
                        return true;
                    }
                    None => {
                        state.owner = Some(thread);
                        state.depth = 1;
                        return true;
                    }
                    Some(_) => (),
                }
            }

            if timeout_ms != TIMEOUT_FOREVER && handler.nanos_since_boot() >= deadline {
                return false;
            }
            handler.sleep(1);
        }
    }

    pub fn release(&self, thread: u64) -> Result<(), AmlError> {
        let mut state = self.state.lock();
        if state.owner != Some(thread) {
            return Err(AmlError::MutexNotOwned);
        }

        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
        }
        Ok(())
    }

    pub fn is_held_by(&self, thread: u64) -> bool {
        self.state.lock().owner == Some(thread)
    }
}

impl Default for AmlMutex {
    fn default() -> Self {
        AmlMutex::new()
    }
}

impl fmt::Debug for AmlMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        write!(f, "AmlMutex {{ owner: {:?}, depth: {} }}", state.owner, state.depth)
    }
}

/// The counting event primitive behind AML `Event` objects. `Signal`
/// increments the count, `Wait` consumes one unit, `Reset` zeroes it.
pub struct AmlEvent {
    count: AtomicU64,
}

impl AmlEvent {
    pub fn new() -> AmlEvent {
        AmlEvent { count: AtomicU64::new(0) }
    }

    pub fn signal(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }

    /// Wait for the event to be signalled, consuming one signal. Timeouts of
    /// `0xffff` and above wait forever. Returns whether a signal was
    /// consumed.
    pub fn wait<H>(&self, handler: &H, timeout_ms: u64) -> bool
    where
        H: Handler,
    {
        let forever = timeout_ms >= TIMEOUT_FOREVER as u64;
        let deadline = handler.nanos_since_boot().wrapping_add(timeout_ms * NANOS_PER_MILLI);

        loop {
            let taken = self
                .count
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
                .is_ok();
            if taken {
                return true;
            }

            if !forever && handler.nanos_since_boot() >= deadline {
                return false;
            }
            handler.sleep(1);
        }
    }
}

impl Default for AmlEvent {
    fn default() -> Self {
        AmlEvent::new()
    }
}

impl fmt::Debug for AmlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AmlEvent {{ count: {} }}", self.count.load(Ordering::Relaxed))
    }
}

/// Bit 0 of the FACS global-lock dword: set by an acquirer that found the
/// lock owned, to request a release signal.
pub const GLOBAL_LOCK_PENDING: u32 = 1 << 0;
/// Bit 1: the lock is owned (by either OSPM or the firmware).
pub const GLOBAL_LOCK_OWNED: u32 = 1 << 1;

/// The ACPI global lock: a mutex shared with the firmware through a dword in
/// the FACS. Process-local contention is resolved first (the lock has
/// exactly one OS-side owner), and only the winning thread runs the
/// firmware handshake.
///
/// On firmware-less configurations (no FACS), the lock degrades to a plain
/// process-local recursive mutex.
pub struct GlobalLock {
    facs: Spinlock<Option<&'static Facs>>,
    state: Spinlock<OwnerState>,
}

impl GlobalLock {
    pub(crate) fn new() -> GlobalLock {
        GlobalLock { facs: Spinlock::new(None), state: Spinlock::new(OwnerState::default()) }
    }

    pub(crate) fn set_facs(&self, facs: &'static Facs) {
        *self.facs.lock() = Some(facs);
    }

    /// Acquire the global lock. Spins briefly on the firmware handshake and
    /// then polls with a host sleep. Returns whether the lock was acquired
    /// within `timeout_ms`.
    pub(crate) fn acquire<H>(&self, handler: &H, timeout_ms: u16) -> bool
    where
        H: Handler,
    {
        let thread = handler.current_thread_id();
        let deadline = handler.nanos_since_boot().wrapping_add(timeout_ms as u64 * NANOS_PER_MILLI);

        // Resolve OS-side contention: exactly one owning thread at a time
        loop {
            {
                let mut state = self.state.lock();
                match state.owner {
                    Some(owner) if owner == thread => {
                        state.depth += 1;
                        return true;
                    }
                    None => {
                        state.owner = Some(thread);
                        state.depth = 1;
                        break;
                    }
                    Some(_) => (),
                }
            }

            if timeout_ms != TIMEOUT_FOREVER && handler.nanos_since_boot() >= deadline {
                return false;
            }
            handler.sleep(1);
        }

        // Now negotiate with the firmware
        let facs = *self.facs.lock();
        if let Some(facs) = facs {
            loop {
                if Self::take_hardware_lock(facs) {
                    return true;
                }

                if timeout_ms != TIMEOUT_FOREVER && handler.nanos_since_boot() >= deadline {
                    Self::clear_pending(facs);
                    let mut state = self.state.lock();
                    state.owner = None;
                    state.depth = 0;
                    return false;
                }
                // The firmware owns the lock; our pending bit is set, and the
                // global-lock-release event will clear the owner bit.
                handler.sleep(1);
            }
        }

        true
    }

    /// Release the global lock. Returns `true` when the firmware requested
    /// the lock while we held it; the caller must then raise `GBL_RLS` to
    /// signal it.
    pub(crate) fn release<H>(&self, handler: &H) -> Result<bool, AmlError>
    where
        H: Handler,
    {
        let thread = handler.current_thread_id();

        {
            let mut state = self.state.lock();
            if state.owner != Some(thread) {
                return Err(AmlError::MutexNotOwned);
            }
            state.depth -= 1;
            if state.depth > 0 {
                return Ok(false);
            }
            state.owner = None;
        }

        let facs = *self.facs.lock();
        if let Some(facs) = facs {
            let old = facs.global_lock.fetch_and(!(GLOBAL_LOCK_OWNED | GLOBAL_LOCK_PENDING), Ordering::AcqRel);
            return Ok(old & GLOBAL_LOCK_PENDING != 0);
        }

        Ok(false)
    }

    /// One round of the acquisition dance from §5.2.10.1 of the ACPI spec:
    /// take the lock if it is free, otherwise mark ourselves pending.
    /// Returns whether the lock was taken.
    fn take_hardware_lock(facs: &Facs) -> bool {
        loop {
            let old = facs.global_lock.load(Ordering::Relaxed);
            let (new, acquired) = if old & GLOBAL_LOCK_OWNED == 0 {
                ((old | GLOBAL_LOCK_OWNED) & !GLOBAL_LOCK_PENDING, true)
            } else {
                (old | GLOBAL_LOCK_PENDING, false)
            };

            match facs.global_lock.compare_exchange(old, new, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return acquired,
                Err(_) => continue,
            }
        }
    }

    fn clear_pending(facs: &Facs) {
        facs.global_lock.fetch_and(!GLOBAL_LOCK_PENDING, Ordering::AcqRel);
    }
}

impl fmt::Debug for GlobalLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        write!(f, "GlobalLock {{ owner: {:?}, depth: {} }}", state.owner, state.depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestHandler;

    #[test]
    fn mutex_is_recursive() {
        let handler = TestHandler::new();
        let mutex = AmlMutex::new();

        assert!(mutex.acquire(&handler, 0));
        assert!(mutex.acquire(&handler, 0));
        assert!(mutex.is_held_by(handler.current_thread_id()));

        mutex.release(handler.current_thread_id()).unwrap();
        assert!(mutex.is_held_by(handler.current_thread_id()));
        mutex.release(handler.current_thread_id()).unwrap();
        assert!(!mutex.is_held_by(handler.current_thread_id()));
    }

    #[test]
    fn mutex_release_requires_ownership() {
        let handler = TestHandler::new();
        let mutex = AmlMutex::new();
        assert_eq!(mutex.release(handler.current_thread_id()), Err(AmlError::MutexNotOwned));
    }

    #[test]
    fn event_counts_signals() {
        let handler = TestHandler::new();
        let event = AmlEvent::new();

        // No signal: a zero-timeout wait fails
        assert!(!event.wait(&handler, 0));

        event.signal();
        event.signal();
        assert!(event.wait(&handler, 0));
        assert!(event.wait(&handler, 0));
        assert!(!event.wait(&handler, 0));

        event.signal();
        event.reset();
        assert!(!event.wait(&handler, 0));
    }
}
