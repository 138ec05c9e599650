use std::cell::RefCell;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use overlay::hooks::native::{NativeFn, DXGI_ERROR_INVALID_CALL, S_OK};
use overlay::{
    CursorHandle, DetourTargets, PresentFn, ResizeBuffersFn, SetCursorFn, SwapChainBinding,
    SwapChainHandle, VideoMemoryUsage,
};
use parking_lot::Mutex;
use pixels::Pixels;
use tracing::warn;

use super::canvas::Canvas;

pub(crate) const DXGI_ERROR_DEVICE_REMOVED: i32 = 0x887A_0005_u32 as i32;

pub(crate) const ARROW_CURSOR: usize = 1;
pub(crate) const CROSSHAIR_CURSOR: usize = 2;
pub(crate) const HAND_CURSOR: usize = 3;

pub(crate) fn cursor(id: usize) -> CursorHandle {
    CursorHandle::from_raw(id as *mut c_void)
}

static ACTIVE_CURSOR: AtomicUsize = AtomicUsize::new(ARROW_CURSOR);

/// Cursor most recently applied by the host's `SetCursor`.
pub(crate) fn active_cursor() -> usize {
    ACTIVE_CURSOR.load(Ordering::SeqCst)
}

thread_local! {
    static SURFACE: RefCell<Option<Pixels<'static>>> = const { RefCell::new(None) };
}

/// Gives the calling thread's presents a window surface to blit into.
pub(crate) fn attach_surface(pixels: Pixels<'static>) {
    SURFACE.with(|surface| *surface.borrow_mut() = Some(pixels));
}

pub(crate) fn detach_surface() {
    SURFACE.with(|surface| surface.borrow_mut().take());
}

/// The host's stand-in for a DXGI swap chain: one CPU back buffer and the
/// state the overlay queries through its binding.
#[derive(Debug)]
pub(crate) struct HostSwapChain {
    canvas: Arc<Mutex<Canvas>>,
    fullscreen: AtomicBool,
    displays: AtomicU32,
    presents: AtomicU64,
}

impl HostSwapChain {
    pub(crate) fn new(width: u32, height: u32, displays: u32) -> Self {
        Self {
            canvas: Arc::new(Mutex::new(Canvas::new(width, height))),
            fullscreen: AtomicBool::new(false),
            displays: AtomicU32::new(displays),
            presents: AtomicU64::new(0),
        }
    }

    pub(crate) fn handle(&'static self) -> SwapChainHandle {
        SwapChainHandle::from_raw(self as *const Self as *mut c_void)
    }

    pub(crate) fn canvas(&self) -> &Arc<Mutex<Canvas>> {
        &self.canvas
    }

    pub(crate) fn set_fullscreen(&self, fullscreen: bool) {
        self.fullscreen.store(fullscreen, Ordering::Relaxed);
    }

    pub(crate) fn presents(&self) -> u64 {
        self.presents.load(Ordering::Relaxed)
    }

    fn present(&self) -> i32 {
        self.presents.fetch_add(1, Ordering::Relaxed);
        SURFACE.with(|surface| {
            let mut surface = surface.borrow_mut();
            let Some(pixels) = surface.as_mut() else {
                return S_OK;
            };
            self.canvas.lock().copy_to(pixels.frame_mut());
            match pixels.render() {
                Ok(()) => S_OK,
                Err(error) => {
                    warn!(error = %error, "host_present_failed");
                    DXGI_ERROR_DEVICE_REMOVED
                }
            }
        })
    }

    fn resize(&self, width: u32, height: u32) -> i32 {
        // Zero keeps the current buffers, as a minimized window reports.
        if width == 0 || height == 0 {
            return S_OK;
        }
        self.canvas.lock().resize(width, height);
        SURFACE.with(|surface| {
            let mut surface = surface.borrow_mut();
            let Some(pixels) = surface.as_mut() else {
                return S_OK;
            };
            let resized = pixels
                .resize_surface(width, height)
                .and_then(|()| pixels.resize_buffer(width, height));
            match resized {
                Ok(()) => S_OK,
                Err(error) => {
                    warn!(error = %error, width, height, "host_resize_failed");
                    DXGI_ERROR_DEVICE_REMOVED
                }
            }
        })
    }
}

unsafe extern "system" fn host_present(this: *mut c_void, _sync_interval: u32, _flags: u32) -> i32 {
    match (this as *const HostSwapChain).as_ref() {
        Some(chain) => chain.present(),
        None => DXGI_ERROR_INVALID_CALL,
    }
}

unsafe extern "system" fn host_resize_buffers(
    this: *mut c_void,
    _buffer_count: u32,
    width: u32,
    height: u32,
    _format: u32,
    _flags: u32,
) -> i32 {
    match (this as *const HostSwapChain).as_ref() {
        Some(chain) => chain.resize(width, height),
        None => DXGI_ERROR_INVALID_CALL,
    }
}

unsafe extern "system" fn host_set_cursor(cursor: *mut c_void) -> *mut c_void {
    ACTIVE_CURSOR.swap(cursor as usize, Ordering::SeqCst) as *mut c_void
}

const PRESENT_SLOT: usize = 0;
const RESIZE_BUFFERS_SLOT: usize = 1;
const SET_CURSOR_SLOT: usize = 2;

/// Function table every present, resize and cursor call goes through, the
/// way a game reaches DXGI through the swap chain's vtable.
#[derive(Debug)]
pub(crate) struct PresentTable {
    slots: [AtomicUsize; 3],
}

impl PresentTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: [
                AtomicUsize::new((host_present as PresentFn).addr()),
                AtomicUsize::new((host_resize_buffers as ResizeBuffersFn).addr()),
                AtomicUsize::new((host_set_cursor as SetCursorFn).addr()),
            ],
        }
    }

    pub(crate) fn targets(&'static self) -> DetourTargets {
        DetourTargets {
            present: self.slots[PRESENT_SLOT].as_ptr(),
            resize_buffers: self.slots[RESIZE_BUFFERS_SLOT].as_ptr(),
            set_cursor: Some(self.slots[SET_CURSOR_SLOT].as_ptr()),
        }
    }

    pub(crate) fn present(&self, chain: &'static HostSwapChain, sync_interval: u32, flags: u32) -> i32 {
        // SAFETY: the slot only ever holds `host_present` or a detour with
        // the same signature.
        unsafe {
            let present = PresentFn::from_addr(self.slots[PRESENT_SLOT].load(Ordering::SeqCst));
            present(chain.handle().as_raw(), sync_interval, flags)
        }
    }

    pub(crate) fn resize_buffers(&self, chain: &'static HostSwapChain, width: u32, height: u32) -> i32 {
        // SAFETY: as for `present`.
        unsafe {
            let resize =
                ResizeBuffersFn::from_addr(self.slots[RESIZE_BUFFERS_SLOT].load(Ordering::SeqCst));
            resize(chain.handle().as_raw(), 2, width, height, 0, 0)
        }
    }

    pub(crate) fn set_cursor(&self, id: usize) -> usize {
        // SAFETY: as for `present`.
        unsafe {
            let set_cursor = SetCursorFn::from_addr(self.slots[SET_CURSOR_SLOT].load(Ordering::SeqCst));
            set_cursor(cursor(id).as_raw()) as usize
        }
    }
}

/// What the overlay sees of the host swap chain.
pub(crate) struct HostBinding {
    chain: &'static HostSwapChain,
}

impl HostBinding {
    pub(crate) fn new(chain: &'static HostSwapChain) -> Self {
        Self { chain }
    }
}

impl SwapChainBinding for HostBinding {
    fn handle(&self) -> SwapChainHandle {
        self.chain.handle()
    }

    fn back_buffer_size(&self) -> (u32, u32) {
        self.chain.canvas.lock().size()
    }

    fn is_fullscreen(&self) -> bool {
        self.chain.fullscreen.load(Ordering::Relaxed)
    }

    fn attached_display_count(&self) -> u32 {
        self.chain.displays.load(Ordering::Relaxed)
    }

    fn video_memory_usage(&self) -> Option<VideoMemoryUsage> {
        None
    }
}
