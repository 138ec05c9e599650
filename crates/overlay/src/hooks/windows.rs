//! Native DXGI and Win32 plumbing for the hook layer.

use std::ffi::c_void;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, error, warn};
use windows::core::{Interface, HSTRING};
use windows::Win32::Foundation::{FreeLibrary, BOOL, HMODULE};
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE, D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDeviceAndSwapChain, D3D11_CREATE_DEVICE_FLAG, D3D11_SDK_VERSION,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_MODE_DESC, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    IDXGIAdapter3, IDXGIDevice, IDXGISwapChain, DXGI_MEMORY_SEGMENT_GROUP_LOCAL,
    DXGI_QUERY_VIDEO_MEMORY_INFO, DXGI_SWAP_CHAIN_DESC, DXGI_SWAP_EFFECT_DISCARD,
    DXGI_USAGE_RENDER_TARGET_OUTPUT,
};
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, LoadLibraryW};
use windows::Win32::System::Memory::{VirtualProtect, PAGE_PROTECTION_FLAGS, PAGE_READWRITE};
use windows::Win32::UI::WindowsAndMessaging::{
    GetDesktopWindow, GetSystemMetrics, MessageBoxW, MB_ICONERROR, MB_OK, SM_CMONITORS,
};

use super::detours::DetourTargets;
use super::import_table::import_slot;
use super::native::SwapChainHandle;
use super::record::{HookInstallError, SlotWriter};
use crate::render::scene::{SceneError, SwapChainBinding, VideoMemoryUsage};
use crate::{DependencyProbe, FatalReporter};

// IUnknown (3) + IDXGIObject (4) + IDXGIDeviceSubObject (1) precede Present.
const PRESENT_SLOT: usize = 8;
const RESIZE_BUFFERS_SLOT: usize = 13;

/// Writes through `VirtualProtect`, restoring the page's protection after.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtectedMemory;

impl SlotWriter for ProtectedMemory {
    unsafe fn write_slot(&self, slot: *mut usize, value: usize) -> io::Result<()> {
        let size = std::mem::size_of::<usize>();
        let mut previous = PAGE_PROTECTION_FLAGS::default();
        VirtualProtect(slot as *const c_void, size, PAGE_READWRITE, &mut previous)
            .map_err(|error| io::Error::other(error.to_string()))?;

        (*(slot as *const AtomicUsize)).store(value, Ordering::SeqCst);

        let mut ignored = PAGE_PROTECTION_FLAGS::default();
        if let Err(error) = VirtualProtect(slot as *const c_void, size, previous, &mut ignored) {
            warn!(
                slot = format_args!("{:#x}", slot as usize),
                error = %error,
                "slot_protection_restore_failed"
            );
        }
        Ok(())
    }
}

/// Locates the shared DXGI swap-chain vtable slots through a throwaway
/// device and swap chain, plus the process's `user32!SetCursor` import.
pub fn discover_targets() -> Result<DetourTargets, HookInstallError> {
    let swap_chain = create_dummy_swap_chain()?;
    // The vtable lives in dxgi.dll and outlives the dummy instance.
    let vtable = unsafe { *(swap_chain.as_raw() as *const *mut usize) };
    let present = unsafe { vtable.add(PRESENT_SLOT) };
    let resize_buffers = unsafe { vtable.add(RESIZE_BUFFERS_SLOT) };
    drop(swap_chain);

    let set_cursor = match unsafe { GetModuleHandleW(None) } {
        Ok(module) => unsafe { import_slot(module.0 as *const u8, "user32.dll", "SetCursor") },
        Err(error) => {
            warn!(error = %error, "host_module_unavailable");
            None
        }
    };
    if set_cursor.is_none() {
        warn!("set_cursor_import_not_found");
    }

    debug!(
        present = format_args!("{:#x}", present as usize),
        resize_buffers = format_args!("{:#x}", resize_buffers as usize),
        "dxgi_hook_targets_resolved"
    );
    Ok(DetourTargets {
        present,
        resize_buffers,
        set_cursor,
    })
}

fn create_dummy_swap_chain() -> Result<IDXGISwapChain, HookInstallError> {
    let desc = DXGI_SWAP_CHAIN_DESC {
        BufferDesc: DXGI_MODE_DESC {
            Width: 2,
            Height: 2,
            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
            ..Default::default()
        },
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        BufferCount: 1,
        OutputWindow: unsafe { GetDesktopWindow() },
        Windowed: BOOL(1),
        SwapEffect: DXGI_SWAP_EFFECT_DISCARD,
        Flags: 0,
    };

    let mut last_error = None;
    for driver in [D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP] {
        match try_create_swap_chain(driver, &desc) {
            Ok(swap_chain) => return Ok(swap_chain),
            Err(error) => {
                debug!(driver = driver.0, error = %error, "dummy_swap_chain_failed");
                last_error = Some(error);
            }
        }
    }
    Err(HookInstallError::Discovery(
        last_error
            .map(|error| error.to_string())
            .unwrap_or_else(|| "no driver type available".to_string()),
    ))
}

fn try_create_swap_chain(
    driver: D3D_DRIVER_TYPE,
    desc: &DXGI_SWAP_CHAIN_DESC,
) -> windows::core::Result<IDXGISwapChain> {
    let mut swap_chain: Option<IDXGISwapChain> = None;
    unsafe {
        D3D11CreateDeviceAndSwapChain(
            None,
            driver,
            None,
            D3D11_CREATE_DEVICE_FLAG(0),
            None,
            D3D11_SDK_VERSION,
            Some(desc as *const _),
            Some(&mut swap_chain as *mut _),
            None,
            None,
            None,
        )?;
    }
    swap_chain.ok_or_else(windows::core::Error::empty)
}

/// The host's live `IDXGISwapChain`.
pub struct DxgiSwapChain {
    swap_chain: IDXGISwapChain,
}

// COM pointers are free-threaded for the calls made here.
unsafe impl Send for DxgiSwapChain {}
unsafe impl Sync for DxgiSwapChain {}

impl DxgiSwapChain {
    /// Takes a reference on the swap chain behind `handle`.
    ///
    /// # Safety
    ///
    /// `handle` must be a live `IDXGISwapChain` pointer, such as the one
    /// passed to the present detour.
    pub unsafe fn from_handle(handle: SwapChainHandle) -> Result<Self, SceneError> {
        let raw = handle.as_raw();
        IDXGISwapChain::from_raw_borrowed(&raw)
            .cloned()
            .map(|swap_chain| Self { swap_chain })
            .ok_or(SceneError::Bind {
                handle: handle.addr(),
                message: "null swap chain".to_string(),
            })
    }

    pub fn swap_chain(&self) -> &IDXGISwapChain {
        &self.swap_chain
    }
}

impl SwapChainBinding for DxgiSwapChain {
    fn handle(&self) -> SwapChainHandle {
        SwapChainHandle::from_raw(self.swap_chain.as_raw())
    }

    fn back_buffer_size(&self) -> (u32, u32) {
        match unsafe { self.swap_chain.GetDesc() } {
            Ok(desc) => (desc.BufferDesc.Width, desc.BufferDesc.Height),
            Err(error) => {
                warn!(error = %error, "swap_chain_desc_unavailable");
                (0, 0)
            }
        }
    }

    fn is_fullscreen(&self) -> bool {
        let mut fullscreen = BOOL(0);
        match unsafe { self.swap_chain.GetFullscreenState(Some(&mut fullscreen), None) } {
            Ok(()) => fullscreen.as_bool(),
            Err(_) => false,
        }
    }

    fn attached_display_count(&self) -> u32 {
        unsafe { GetSystemMetrics(SM_CMONITORS) }.max(0) as u32
    }

    fn video_memory_usage(&self) -> Option<VideoMemoryUsage> {
        unsafe {
            let device: IDXGIDevice = self.swap_chain.GetDevice().ok()?;
            let adapter: IDXGIAdapter3 = device.GetAdapter().ok()?.cast().ok()?;
            let info: DXGI_QUERY_VIDEO_MEMORY_INFO = adapter
                .QueryVideoMemoryInfo(0, DXGI_MEMORY_SEGMENT_GROUP_LOCAL)
                .ok()?;
            Some(VideoMemoryUsage {
                used: info.CurrentUsage,
                reserved: info.CurrentReservation,
            })
        }
    }
}

/// Checks for DLLs by loading and immediately releasing them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibraryProbe;

impl DependencyProbe for LibraryProbe {
    fn is_available(&self, library: &str) -> bool {
        match unsafe { LoadLibraryW(&HSTRING::from(library)) } {
            Ok(module) => {
                if let Err(error) = unsafe { FreeLibrary(module) } {
                    debug!(library, error = %error, "probe_library_release_failed");
                }
                true
            }
            Err(_) => false,
        }
    }
}

/// Shows a modal error box.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageBoxReporter;

impl FatalReporter for MessageBoxReporter {
    fn report(&self, title: &str, message: &str) {
        error!(title, message, "fatal_startup_error");
        let _ = unsafe {
            MessageBoxW(
                None,
                &HSTRING::from(message),
                &HSTRING::from(title),
                MB_OK | MB_ICONERROR,
            )
        };
    }
}
