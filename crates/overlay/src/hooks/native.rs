use std::ffi::c_void;

pub type PresentFn = unsafe extern "system" fn(*mut c_void, u32, u32) -> i32;
pub type ResizeBuffersFn = unsafe extern "system" fn(*mut c_void, u32, u32, u32, u32, u32) -> i32;
pub type SetCursorFn = unsafe extern "system" fn(*mut c_void) -> *mut c_void;

pub const S_OK: i32 = 0;
pub const DXGI_ERROR_INVALID_CALL: i32 = 0x887A_0001_u32 as i32;

/// Function-pointer types that can live in a patchable slot.
pub trait NativeFn: Copy + Send + Sync + 'static {
    fn addr(self) -> usize;

    /// # Safety
    ///
    /// `addr` must be the address of a function with exactly this signature.
    unsafe fn from_addr(addr: usize) -> Self;
}

macro_rules! impl_native_fn {
    ($($ty:ty),* $(,)?) => {
        $(
            impl NativeFn for $ty {
                fn addr(self) -> usize {
                    self as usize
                }

                unsafe fn from_addr(addr: usize) -> Self {
                    std::mem::transmute::<usize, $ty>(addr)
                }
            }
        )*
    };
}

impl_native_fn!(PresentFn, ResizeBuffersFn, SetCursorFn);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapChainHandle(usize);

impl SwapChainHandle {
    pub fn from_raw(ptr: *mut c_void) -> Self {
        Self(ptr as usize)
    }

    pub fn as_raw(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    pub fn addr(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorHandle(usize);

impl CursorHandle {
    pub const NULL: CursorHandle = CursorHandle(0);

    pub fn from_raw(ptr: *mut c_void) -> Self {
        Self(ptr as usize)
    }

    pub fn as_raw(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Arguments of one intercepted `Present` call.
///
/// Some present-call intermediaries pass a zero sync interval; it is carried
/// through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentCall {
    pub swap_chain: SwapChainHandle,
    pub sync_interval: u32,
    pub flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeCall {
    pub swap_chain: SwapChainHandle,
    pub buffer_count: u32,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub flags: u32,
}
