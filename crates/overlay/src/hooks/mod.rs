//! Function-pointer interception of the host's present, resize and cursor
//! entry points.

pub mod detours;
pub mod import_table;
pub mod native;
pub mod record;
#[cfg(windows)]
pub mod windows;

pub use detours::{DetourTargets, FrameHooks, PresentInterceptor};
pub use import_table::import_slot;
pub use native::{
    CursorHandle, PresentCall, PresentFn, ResizeBuffersFn, ResizeCall, SetCursorFn,
    SwapChainHandle,
};
pub use record::{HookInstallError, HookRecord, SlotWriter, WritableMemory};
