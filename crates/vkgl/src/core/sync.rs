//! Fences, semaphores and events
//!
//! Submissions complete before `queue_submit` returns, so these objects only
//! carry host-visible state. Fence waits still block on a condition variable
//! so a thread waiting on a fence wakes when another thread's submission
//! signals it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ash::vk;
use parking_lot::{Condvar, Mutex};

use crate::core::error::{VulkanError, VulkanResult};

/// Slice of a multi-fence wait spent blocked on one fence
const POLL_SLICE: Duration = Duration::from_millis(1);

fn deadline(timeout_ns: u64) -> Option<Instant> {
    if timeout_ns == u64::MAX {
        None
    } else {
        Instant::now().checked_add(Duration::from_nanos(timeout_ns))
    }
}

/// One `VkFence`
#[derive(Debug, Default)]
pub struct FenceObject {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl FenceObject {
    /// Fence, optionally created signaled
    pub fn new(signaled: bool) -> Self {
        Self {
            signaled: Mutex::new(signaled),
            cond: Condvar::new(),
        }
    }

    /// Signal and wake every waiter
    pub fn signal(&self) {
        *self.signaled.lock() = true;
        self.cond.notify_all();
    }

    /// `vkResetFences`
    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    /// Whether the fence is signaled
    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }

    /// `vkGetFenceStatus`
    pub fn status(&self) -> vk::Result {
        if self.is_signaled() {
            vk::Result::SUCCESS
        } else {
            vk::Result::NOT_READY
        }
    }

    fn wait_until(&self, until: Option<Instant>) -> bool {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            match until {
                None => self.cond.wait(&mut signaled),
                Some(until) => {
                    if self.cond.wait_until(&mut signaled, until).timed_out() {
                        return *signaled;
                    }
                }
            }
        }
        true
    }

    /// Block until signaled; `SUCCESS` or `TIMEOUT`
    pub fn wait(&self, timeout_ns: u64) -> vk::Result {
        if self.wait_until(deadline(timeout_ns)) {
            vk::Result::SUCCESS
        } else {
            vk::Result::TIMEOUT
        }
    }
}

/// `vkWaitForFences`
pub fn wait_for_fences(fences: &[Arc<FenceObject>], wait_all: bool, timeout_ns: u64) -> vk::Result {
    let until = deadline(timeout_ns);
    if wait_all {
        for fence in fences {
            if !fence.wait_until(until) {
                return vk::Result::TIMEOUT;
            }
        }
        return vk::Result::SUCCESS;
    }
    loop {
        if fences.iter().any(|fence| fence.is_signaled()) {
            return vk::Result::SUCCESS;
        }
        let now = Instant::now();
        if until.is_some_and(|until| now >= until) {
            return vk::Result::TIMEOUT;
        }
        let slice = until.map_or(now + POLL_SLICE, |until| until.min(now + POLL_SLICE));
        if let Some(fence) = fences.first() {
            fence.wait_until(Some(slice));
        } else {
            return vk::Result::SUCCESS;
        }
    }
}

/// One binary `VkSemaphore`
#[derive(Debug, Default)]
pub struct SemaphoreObject {
    signaled: AtomicBool,
}

impl SemaphoreObject {
    /// Unsignaled semaphore
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal operation
    pub fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }

    /// Whether a wait would succeed
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Wait operation; waiting on an unsignaled binary semaphore would never complete
    pub fn consume(&self) -> VulkanResult<()> {
        if self.signaled.swap(false, Ordering::AcqRel) {
            Ok(())
        } else {
            Err(VulkanError::contract(
                "wait on a semaphore with no pending signal",
            ))
        }
    }
}

/// One `VkEvent`
#[derive(Debug, Default)]
pub struct EventObject {
    signaled: AtomicBool,
}

impl EventObject {
    /// Unsignaled event
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or reset from the host or from replay
    pub fn set(&self, signaled: bool) {
        self.signaled.store(signaled, Ordering::Release);
    }

    /// `vkGetEventStatus`
    pub fn status(&self) -> vk::Result {
        if self.signaled.load(Ordering::Acquire) {
            vk::Result::EVENT_SET
        } else {
            vk::Result::EVENT_RESET
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fence_wait_times_out() {
        let fence = FenceObject::new(false);
        assert_eq!(fence.status(), vk::Result::NOT_READY);
        assert_eq!(fence.wait(1_000_000), vk::Result::TIMEOUT);
        assert_eq!(fence.wait(0), vk::Result::TIMEOUT);
    }

    #[test]
    fn test_fence_signal_wakes_waiter() {
        let fence = Arc::new(FenceObject::new(false));
        let waiter = {
            let fence = Arc::clone(&fence);
            thread::spawn(move || fence.wait(u64::MAX))
        };
        thread::sleep(Duration::from_millis(10));
        fence.signal();
        assert_eq!(waiter.join().unwrap(), vk::Result::SUCCESS);

        fence.reset();
        assert!(!fence.is_signaled());
    }

    #[test]
    fn test_wait_any_and_all() {
        let fences = vec![Arc::new(FenceObject::new(false)), Arc::new(FenceObject::new(true))];
        assert_eq!(wait_for_fences(&fences, false, 5_000_000), vk::Result::SUCCESS);
        assert_eq!(wait_for_fences(&fences, true, 5_000_000), vk::Result::TIMEOUT);
        fences[0].signal();
        assert_eq!(wait_for_fences(&fences, true, 0), vk::Result::SUCCESS);
    }

    #[test]
    fn test_semaphore_consumed_once() {
        let semaphore = SemaphoreObject::new();
        assert!(semaphore.consume().is_err());
        semaphore.signal();
        semaphore.consume().unwrap();
        assert!(!semaphore.is_signaled());
    }

    #[test]
    fn test_event_status() {
        let event = EventObject::new();
        assert_eq!(event.status(), vk::Result::EVENT_RESET);
        event.set(true);
        assert_eq!(event.status(), vk::Result::EVENT_SET);
    }
}
