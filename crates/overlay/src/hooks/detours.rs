use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};

use super::native::{
    CursorHandle, NativeFn, PresentCall, PresentFn, ResizeBuffersFn, ResizeCall, SetCursorFn,
    SwapChainHandle, DXGI_ERROR_INVALID_CALL,
};
use super::record::{HookInstallError, HookRecord, SlotWriter};

/// Receiver of intercepted calls. Each method must call `original` exactly
/// once unless it deliberately suppresses the call.
pub trait FrameHooks: Send + Sync {
    fn on_present(&self, call: PresentCall, original: PresentFn) -> i32;
    fn on_resize_buffers(&self, call: ResizeCall, original: ResizeBuffersFn) -> i32;
    fn on_set_cursor(&self, cursor: CursorHandle, original: SetCursorFn) -> CursorHandle;
}

static ACTIVE: RwLock<Option<Arc<dyn FrameHooks>>> = parking_lot::const_rwlock(None);

// Originals outlive the interceptor so a detour that is mid-flight during
// uninstall can still forward.
static ORIGINAL_PRESENT: AtomicUsize = AtomicUsize::new(0);
static ORIGINAL_RESIZE_BUFFERS: AtomicUsize = AtomicUsize::new(0);
static ORIGINAL_SET_CURSOR: AtomicUsize = AtomicUsize::new(0);

fn load_original<F: NativeFn>(slot: &AtomicUsize) -> Option<F> {
    match slot.load(Ordering::Acquire) {
        0 => None,
        addr => Some(unsafe { F::from_addr(addr) }),
    }
}

fn active_hooks() -> Option<Arc<dyn FrameHooks>> {
    ACTIVE.read().clone()
}

unsafe extern "system" fn present_detour(swap_chain: *mut c_void, sync_interval: u32, flags: u32) -> i32 {
    let Some(original) = load_original::<PresentFn>(&ORIGINAL_PRESENT) else {
        return DXGI_ERROR_INVALID_CALL;
    };
    match active_hooks() {
        Some(hooks) => hooks.on_present(
            PresentCall {
                swap_chain: SwapChainHandle::from_raw(swap_chain),
                sync_interval,
                flags,
            },
            original,
        ),
        None => original(swap_chain, sync_interval, flags),
    }
}

unsafe extern "system" fn resize_buffers_detour(
    swap_chain: *mut c_void,
    buffer_count: u32,
    width: u32,
    height: u32,
    format: u32,
    flags: u32,
) -> i32 {
    let Some(original) = load_original::<ResizeBuffersFn>(&ORIGINAL_RESIZE_BUFFERS) else {
        return DXGI_ERROR_INVALID_CALL;
    };
    match active_hooks() {
        Some(hooks) => hooks.on_resize_buffers(
            ResizeCall {
                swap_chain: SwapChainHandle::from_raw(swap_chain),
                buffer_count,
                width,
                height,
                format,
                flags,
            },
            original,
        ),
        None => original(swap_chain, buffer_count, width, height, format, flags),
    }
}

unsafe extern "system" fn set_cursor_detour(cursor: *mut c_void) -> *mut c_void {
    let Some(original) = load_original::<SetCursorFn>(&ORIGINAL_SET_CURSOR) else {
        return std::ptr::null_mut();
    };
    match active_hooks() {
        Some(hooks) => hooks
            .on_set_cursor(CursorHandle::from_raw(cursor), original)
            .as_raw(),
        None => original(cursor),
    }
}

/// Function-pointer slots to patch. The cursor slot is optional.
#[derive(Debug, Clone, Copy)]
pub struct DetourTargets {
    pub present: *mut usize,
    pub resize_buffers: *mut usize,
    pub set_cursor: Option<*mut usize>,
}

/// The installed present, resize-buffers and cursor hooks. Only one may be
/// active per process; dropping it restores every slot.
#[derive(Debug)]
pub struct PresentInterceptor {
    present: HookRecord<PresentFn>,
    resize_buffers: HookRecord<ResizeBuffersFn>,
    set_cursor: Option<HookRecord<SetCursorFn>>,
}

impl PresentInterceptor {
    /// Installs and enables the hooks, routing intercepted calls to `hooks`.
    ///
    /// Present and resize failures are returned; a cursor hook that cannot
    /// be installed is logged and left out.
    ///
    /// # Safety
    ///
    /// Every slot in `targets` must be null or point to a live slot holding
    /// a function of the matching signature, valid until the interceptor is
    /// dropped.
    pub unsafe fn install(
        targets: DetourTargets,
        writer: Arc<dyn SlotWriter>,
        hooks: Arc<dyn FrameHooks>,
    ) -> Result<Self, HookInstallError> {
        let mut active = ACTIVE.write();
        if active.is_some() {
            return Err(HookInstallError::AlreadyActive);
        }

        let present = HookRecord::install(
            "present",
            targets.present,
            present_detour as PresentFn,
            Arc::clone(&writer),
        )?;
        let resize_buffers = HookRecord::install(
            "resize_buffers",
            targets.resize_buffers,
            resize_buffers_detour as ResizeBuffersFn,
            Arc::clone(&writer),
        )?;
        let set_cursor = match targets.set_cursor {
            Some(slot) => match HookRecord::install(
                "set_cursor",
                slot,
                set_cursor_detour as SetCursorFn,
                Arc::clone(&writer),
            ) {
                Ok(record) => Some(record),
                Err(error) => {
                    warn!(error = %error, "cursor_hook_unavailable");
                    None
                }
            },
            None => None,
        };

        ORIGINAL_PRESENT.store(present.original().addr(), Ordering::Release);
        ORIGINAL_RESIZE_BUFFERS.store(resize_buffers.original().addr(), Ordering::Release);
        if let Some(record) = &set_cursor {
            ORIGINAL_SET_CURSOR.store(record.original().addr(), Ordering::Release);
        }
        *active = Some(hooks);
        drop(active);

        let mut interceptor = Self {
            present,
            resize_buffers,
            set_cursor,
        };
        // On failure, dropping `interceptor` restores slots and clears ACTIVE.
        interceptor.enable()?;

        info!(
            present = format_args!("{:#x}", interceptor.present.target()),
            resize_buffers = format_args!("{:#x}", interceptor.resize_buffers.target()),
            cursor = interceptor.set_cursor.is_some(),
            "present_hook_installed"
        );
        Ok(interceptor)
    }

    pub fn enable(&mut self) -> Result<(), HookInstallError> {
        self.present.enable()?;
        self.resize_buffers.enable()?;
        if let Some(record) = &mut self.set_cursor {
            if let Err(error) = record.enable() {
                warn!(error = %error, "cursor_hook_unavailable");
                self.set_cursor = None;
            }
        }
        Ok(())
    }

    /// Restores every original. All slots are attempted; the first failure
    /// is returned.
    pub fn disable(&mut self) -> Result<(), HookInstallError> {
        let present = self.present.disable();
        let resize = self.resize_buffers.disable();
        let cursor = self
            .set_cursor
            .as_mut()
            .map_or(Ok(()), |record| record.disable());
        present.and(resize).and(cursor)
    }

    pub fn is_enabled(&self) -> bool {
        self.present.is_enabled() && self.resize_buffers.is_enabled()
    }

    pub fn cursor_hook_installed(&self) -> bool {
        self.set_cursor.is_some()
    }

    pub fn original_present(&self) -> PresentFn {
        self.present.original()
    }

    pub fn original_resize_buffers(&self) -> ResizeBuffersFn {
        self.resize_buffers.original()
    }
}

impl Drop for PresentInterceptor {
    fn drop(&mut self) {
        if let Err(error) = self.disable() {
            error!(error = %error, "present_hook_uninstall_failed");
        }
        ACTIVE.write().take();
        info!("present_hook_uninstalled");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use parking_lot::Mutex;
    use serial_test::serial;

    use super::super::native::S_OK;
    use super::super::record::WritableMemory;
    use super::*;

    static PRESENTS: AtomicU32 = AtomicU32::new(0);
    static RESIZES: AtomicU32 = AtomicU32::new(0);
    static CURSORS: AtomicU32 = AtomicU32::new(0);

    unsafe extern "system" fn host_present(_: *mut c_void, sync: u32, _: u32) -> i32 {
        PRESENTS.fetch_add(1, Ordering::SeqCst);
        sync as i32
    }

    unsafe extern "system" fn host_resize(_: *mut c_void, _: u32, _: u32, _: u32, _: u32, _: u32) -> i32 {
        RESIZES.fetch_add(1, Ordering::SeqCst);
        S_OK
    }

    unsafe extern "system" fn host_set_cursor(cursor: *mut c_void) -> *mut c_void {
        CURSORS.fetch_add(1, Ordering::SeqCst);
        cursor
    }

    struct Table {
        slots: Box<[AtomicUsize; 3]>,
    }

    impl Table {
        fn new() -> Self {
            PRESENTS.store(0, Ordering::SeqCst);
            RESIZES.store(0, Ordering::SeqCst);
            CURSORS.store(0, Ordering::SeqCst);
            Self {
                slots: Box::new([
                    AtomicUsize::new((host_present as PresentFn).addr()),
                    AtomicUsize::new((host_resize as ResizeBuffersFn).addr()),
                    AtomicUsize::new((host_set_cursor as SetCursorFn).addr()),
                ]),
            }
        }

        fn targets(&self) -> DetourTargets {
            DetourTargets {
                present: self.slots[0].as_ptr(),
                resize_buffers: self.slots[1].as_ptr(),
                set_cursor: Some(self.slots[2].as_ptr()),
            }
        }

        fn present(&self, swap_chain: usize, sync: u32) -> i32 {
            let f = unsafe { PresentFn::from_addr(self.slots[0].load(Ordering::SeqCst)) };
            unsafe { f(swap_chain as *mut c_void, sync, 0) }
        }

        fn resize(&self, swap_chain: usize) -> i32 {
            let f = unsafe { ResizeBuffersFn::from_addr(self.slots[1].load(Ordering::SeqCst)) };
            unsafe { f(swap_chain as *mut c_void, 2, 800, 600, 0, 0) }
        }

        fn set_cursor(&self, cursor: usize) -> usize {
            let f = unsafe { SetCursorFn::from_addr(self.slots[2].load(Ordering::SeqCst)) };
            unsafe { f(cursor as *mut c_void) as usize }
        }
    }

    #[derive(Default)]
    struct RecordingHooks {
        calls: Mutex<Vec<String>>,
        suppress_cursor: bool,
    }

    impl FrameHooks for RecordingHooks {
        fn on_present(&self, call: PresentCall, original: PresentFn) -> i32 {
            self.calls
                .lock()
                .push(format!("present:{:#x}:{}", call.swap_chain.addr(), call.sync_interval));
            unsafe { original(call.swap_chain.as_raw(), call.sync_interval, call.flags) }
        }

        fn on_resize_buffers(&self, call: ResizeCall, original: ResizeBuffersFn) -> i32 {
            self.calls
                .lock()
                .push(format!("resize:{}x{}", call.width, call.height));
            unsafe {
                original(
                    call.swap_chain.as_raw(),
                    call.buffer_count,
                    call.width,
                    call.height,
                    call.format,
                    call.flags,
                )
            }
        }

        fn on_set_cursor(&self, cursor: CursorHandle, original: SetCursorFn) -> CursorHandle {
            self.calls.lock().push("cursor".to_string());
            if self.suppress_cursor {
                return CursorHandle::NULL;
            }
            CursorHandle::from_raw(unsafe { original(cursor.as_raw()) })
        }
    }

    #[test]
    #[serial]
    fn installed_hooks_route_calls_through_the_receiver() {
        let table = Table::new();
        let hooks = Arc::new(RecordingHooks::default());
        let interceptor = unsafe {
            PresentInterceptor::install(table.targets(), Arc::new(WritableMemory), hooks.clone())
        }
        .expect("install");

        assert!(interceptor.is_enabled());
        assert!(interceptor.cursor_hook_installed());
        assert_eq!(table.present(0x51, 1), 1);
        assert_eq!(table.resize(0x51), S_OK);
        assert_eq!(table.set_cursor(0x77), 0x77);

        assert_eq!(
            *hooks.calls.lock(),
            vec!["present:0x51:1", "resize:800x600", "cursor"]
        );
        assert_eq!(PRESENTS.load(Ordering::SeqCst), 1);
        assert_eq!(RESIZES.load(Ordering::SeqCst), 1);
        assert_eq!(CURSORS.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[serial]
    fn zero_sync_interval_is_forwarded_unchanged() {
        let table = Table::new();
        let hooks = Arc::new(RecordingHooks::default());
        let _interceptor = unsafe {
            PresentInterceptor::install(table.targets(), Arc::new(WritableMemory), hooks.clone())
        }
        .expect("install");

        assert_eq!(table.present(0x51, 0), 0);
        assert_eq!(*hooks.calls.lock(), vec!["present:0x51:0"]);
    }

    #[test]
    #[serial]
    fn suppressed_cursor_never_reaches_the_original() {
        let table = Table::new();
        let hooks = Arc::new(RecordingHooks {
            suppress_cursor: true,
            ..RecordingHooks::default()
        });
        let _interceptor = unsafe {
            PresentInterceptor::install(table.targets(), Arc::new(WritableMemory), hooks)
        }
        .expect("install");

        assert_eq!(table.set_cursor(0x77), 0);
        assert_eq!(CURSORS.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[serial]
    fn dropping_the_interceptor_restores_every_slot() {
        let table = Table::new();
        let originals: Vec<usize> = table
            .slots
            .iter()
            .map(|slot| slot.load(Ordering::SeqCst))
            .collect();
        {
            let _interceptor = unsafe {
                PresentInterceptor::install(
                    table.targets(),
                    Arc::new(WritableMemory),
                    Arc::new(RecordingHooks::default()),
                )
            }
            .expect("install");
            assert_ne!(table.slots[0].load(Ordering::SeqCst), originals[0]);
        }

        let restored: Vec<usize> = table
            .slots
            .iter()
            .map(|slot| slot.load(Ordering::SeqCst))
            .collect();
        assert_eq!(restored, originals);
        assert!(active_hooks().is_none());
    }

    #[test]
    #[serial]
    fn disable_passes_calls_straight_to_the_host() {
        let table = Table::new();
        let hooks = Arc::new(RecordingHooks::default());
        let mut interceptor = unsafe {
            PresentInterceptor::install(table.targets(), Arc::new(WritableMemory), hooks.clone())
        }
        .expect("install");

        interceptor.disable().expect("disable");
        table.present(0x51, 1);
        interceptor.enable().expect("enable");
        table.present(0x51, 1);

        assert_eq!(hooks.calls.lock().len(), 1);
        assert_eq!(PRESENTS.load(Ordering::SeqCst), 2);
    }

    #[test]
    #[serial]
    fn second_interceptor_is_rejected_while_one_is_active() {
        let first_table = Table::new();
        let second_table = Table::new();
        let _first = unsafe {
            PresentInterceptor::install(
                first_table.targets(),
                Arc::new(WritableMemory),
                Arc::new(RecordingHooks::default()),
            )
        }
        .expect("install");

        let second = unsafe {
            PresentInterceptor::install(
                second_table.targets(),
                Arc::new(WritableMemory),
                Arc::new(RecordingHooks::default()),
            )
        };
        assert!(matches!(second, Err(HookInstallError::AlreadyActive)));
    }

    #[test]
    #[serial]
    fn missing_cursor_slot_only_disables_the_cursor_feature() {
        let table = Table::new();
        let mut targets = table.targets();
        targets.set_cursor = Some(std::ptr::null_mut());

        let interceptor = unsafe {
            PresentInterceptor::install(
                targets,
                Arc::new(WritableMemory),
                Arc::new(RecordingHooks::default()),
            )
        }
        .expect("present and resize still install");

        assert!(!interceptor.cursor_hook_installed());
        assert!(interceptor.is_enabled());
    }

    #[test]
    #[serial]
    fn unresolved_present_slot_is_fatal_and_leaves_no_active_hooks() {
        let table = Table::new();
        let mut targets = table.targets();
        targets.present = std::ptr::null_mut();

        let result = unsafe {
            PresentInterceptor::install(
                targets,
                Arc::new(WritableMemory),
                Arc::new(RecordingHooks::default()),
            )
        };

        assert!(matches!(
            result,
            Err(HookInstallError::Unresolved { name: "present" })
        ));
        assert!(active_hooks().is_none());
    }
}
