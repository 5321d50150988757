//! Context handle and scoped, re-entrant context lock
//!
//! A legacy context may be current on one thread at a time and every other
//! piece of the engine is only valid to touch while it is. [`ContextHandle`]
//! owns the context and its [`GlState`]; [`ContextHandle::lock`] returns a
//! [`ContextLock`] guard. The outermost guard on a thread makes the context
//! current and its drop releases it; nested guards on the same thread only
//! bump a depth counter, so helpers can lock freely.

use std::cell::{Cell, RefCell, RefMut};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::backends::gl::driver::DriverInfo;
use crate::backends::gl::GlState;
use crate::backends::{BackendKind, Capabilities, ContextProvider, PlatformError};
use crate::core::error::{VulkanError, VulkanResult};

struct ContextCell {
    depth: Cell<u32>,
    provider: RefCell<Box<dyn ContextProvider>>,
    state: RefCell<Option<GlState>>,
}

/// One legacy execution context and the engine state bound to it
pub struct ContextHandle {
    cell: ReentrantMutex<ContextCell>,
    kind: BackendKind,
    caps: Capabilities,
    info: DriverInfo,
}

impl ContextHandle {
    /// Load the driver through `provider` and check it against the backend's
    /// feature level.
    pub fn new(
        provider: Box<dyn ContextProvider>,
        kind: BackendKind,
        geometry_warn_threshold: Option<usize>,
    ) -> VulkanResult<Self> {
        let mut handle = Self {
            cell: ReentrantMutex::new(ContextCell {
                depth: Cell::new(0),
                provider: RefCell::new(provider),
                state: RefCell::new(None),
            }),
            kind,
            caps: Capabilities::empty(),
            info: DriverInfo {
                vendor: String::new(),
                renderer: String::new(),
                version: (0, 0),
                extensions: Vec::new(),
            },
        };

        let (caps, info) = {
            let lock = handle.lock()?;
            let driver = lock.with_provider(|provider| provider.load_driver())?;
            let info = driver.info().clone();
            if let Some((major, minor)) = kind.required_version() {
                if !info.at_least(major, minor) {
                    return Err(VulkanError::IncompatibleDriver(format!(
                        "{} backend needs GL {major}.{minor}, driver '{}' reports {}.{}",
                        kind, info.renderer, info.version.0, info.version.1
                    )));
                }
            }
            let caps = Capabilities::detect(&info, kind);
            log::info!(
                "Context created: {} {} (GL {}.{}), {} backend, capabilities {:?}",
                info.vendor,
                info.renderer,
                info.version.0,
                info.version.1,
                kind,
                caps
            );

            let mut state = GlState::new(driver, caps, geometry_warn_threshold);
            state.initialize();
            *lock.cell().state.borrow_mut() = Some(state);
            (caps, info)
        };
        handle.caps = caps;
        handle.info = info;
        Ok(handle)
    }

    /// Backend variant the context was created for
    pub const fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Features detected at creation
    pub const fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Identification of the loaded driver
    pub const fn driver_info(&self) -> &DriverInfo {
        &self.info
    }

    /// Acquire the context, blocking while another thread holds it
    pub fn lock(&self) -> VulkanResult<ContextLock<'_>> {
        ContextLock::enter(self.cell.lock())
    }

    /// Acquire the context only if no other thread holds it
    pub fn try_lock(&self) -> Option<VulkanResult<ContextLock<'_>>> {
        self.cell.try_lock().map(ContextLock::enter)
    }
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        // Engine objects must be deleted while the context is current
        match self.lock() {
            Ok(lock) => {
                if let Ok(mut state) = lock.state() {
                    state.release();
                }
            }
            Err(err) => log::error!("Context teardown failed: {err}"),
        }
    }
}

/// Scoped proof that the context is current on this thread
pub struct ContextLock<'a> {
    guard: ReentrantMutexGuard<'a, ContextCell>,
}

impl<'a> ContextLock<'a> {
    fn enter(guard: ReentrantMutexGuard<'a, ContextCell>) -> VulkanResult<Self> {
        let depth = guard.depth.get();
        if depth == 0 {
            guard
                .provider
                .try_borrow_mut()
                .map_err(|_| VulkanError::contract("context provider re-entered"))?
                .make_current()?;
            log::trace!("Context made current");
        }
        guard.depth.set(depth + 1);
        Ok(Self { guard })
    }

    fn cell(&self) -> &ContextCell {
        &self.guard
    }

    /// Nesting depth of this guard (1 for the outermost)
    pub fn depth(&self) -> u32 {
        self.guard.depth.get()
    }

    /// Mutable engine state.
    ///
    /// Fails if the state is already borrowed further up this thread's stack.
    pub fn state(&self) -> VulkanResult<RefMut<'_, GlState>> {
        let state = self
            .guard
            .state
            .try_borrow_mut()
            .map_err(|_| VulkanError::contract("context state is already in use on this thread"))?;
        RefMut::filter_map(state, Option::as_mut)
            .map_err(|_| VulkanError::InitializationFailed("context has no driver".to_string()))
    }

    /// Run `f` with the platform context provider
    pub fn with_provider<R>(
        &self,
        f: impl FnOnce(&mut dyn ContextProvider) -> Result<R, PlatformError>,
    ) -> VulkanResult<R> {
        let mut provider = self
            .guard
            .provider
            .try_borrow_mut()
            .map_err(|_| VulkanError::contract("context provider re-entered"))?;
        Ok(f(provider.as_mut())?)
    }
}

impl Drop for ContextLock<'_> {
    fn drop(&mut self) {
        let depth = self.guard.depth.get().saturating_sub(1);
        self.guard.depth.set(depth);
        if depth == 0 {
            match self.guard.provider.try_borrow_mut() {
                Ok(mut provider) => {
                    if let Err(err) = provider.release_current() {
                        log::error!("Failed to release context: {err}");
                    } else {
                        log::trace!("Context released");
                    }
                }
                Err(_) => log::error!("Context provider busy during release"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::noop::NoopPlatform;
    use crate::backends::Platform;
    use std::sync::Arc;

    fn handle(platform: &NoopPlatform) -> ContextHandle {
        let provider = platform.create_context().unwrap();
        ContextHandle::new(provider, BackendKind::Noop, None).unwrap()
    }

    #[test]
    fn test_nested_lock_makes_current_once() {
        let platform = NoopPlatform::new();
        let probe = platform.probe();
        let context = handle(&platform);
        let baseline = probe.context_counters();

        {
            let outer = context.lock().unwrap();
            assert_eq!(outer.depth(), 1);
            {
                let inner = context.lock().unwrap();
                assert_eq!(inner.depth(), 2);
            }
            assert_eq!(outer.depth(), 1);
        }

        let counters = probe.context_counters();
        assert_eq!(counters.make_current - baseline.make_current, 1);
        assert_eq!(counters.release_current - baseline.release_current, 1);
    }

    #[test]
    fn test_state_is_not_reentrant() {
        let platform = NoopPlatform::new();
        let context = handle(&platform);
        let outer = context.lock().unwrap();
        let _state = outer.state().unwrap();
        let inner = context.lock().unwrap();
        assert!(matches!(inner.state().err(), Some(err) if err.is_contract_violation()));
    }

    #[test]
    fn test_other_threads_block() {
        let platform = NoopPlatform::new();
        let context = Arc::new(handle(&platform));
        let held = context.lock().unwrap();

        let other = Arc::clone(&context);
        let acquired = std::thread::spawn(move || other.try_lock().is_some())
            .join()
            .unwrap();
        assert!(!acquired);

        drop(held);
        let other = Arc::clone(&context);
        let acquired = std::thread::spawn(move || other.try_lock().is_some())
            .join()
            .unwrap();
        assert!(acquired);
    }

    #[test]
    fn test_feature_level_is_checked() {
        let platform = NoopPlatform::with_version((3, 3));
        let provider = platform.create_context().unwrap();
        let err = ContextHandle::new(provider, BackendKind::LegacyCore45, None).err();
        assert!(matches!(err, Some(VulkanError::IncompatibleDriver(_))));
    }
}
