use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, warn};

use super::native::NativeFn;

#[derive(Debug, Error)]
pub enum HookInstallError {
    #[error("hook target {name} could not be resolved")]
    Unresolved { name: &'static str },
    #[error("hook target {name} already points at its detour")]
    AlreadyHooked { name: &'static str },
    #[error("another interceptor is already active in this process")]
    AlreadyActive,
    #[error("failed to locate hook targets: {0}")]
    Discovery(String),
    #[error("failed to patch hook target {name} at {address:#x}: {source}")]
    Patch {
        name: &'static str,
        address: usize,
        #[source]
        source: io::Error,
    },
}

/// Writes a pointer-sized value into a function-pointer slot.
///
/// Vtables and import tables usually live in read-only pages, so native
/// writers lift page protection around the write.
pub trait SlotWriter: Send + Sync {
    /// # Safety
    ///
    /// `slot` must point to a live, pointer-aligned function-pointer slot.
    unsafe fn write_slot(&self, slot: *mut usize, value: usize) -> io::Result<()>;
}

/// Writer for tables that are already writable, such as in-process dispatch
/// tables owned by the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct WritableMemory;

impl SlotWriter for WritableMemory {
    unsafe fn write_slot(&self, slot: *mut usize, value: usize) -> io::Result<()> {
        (*(slot as *const AtomicUsize)).store(value, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) unsafe fn read_slot(slot: *mut usize) -> usize {
    (*(slot as *const AtomicUsize)).load(Ordering::SeqCst)
}

/// One patched function-pointer slot.
///
/// While enabled the slot points at the detour. Disabling writes the saved
/// original back, and an enabled record disables itself on drop.
pub struct HookRecord<F: NativeFn> {
    name: &'static str,
    slot: *mut usize,
    detour: F,
    original: F,
    enabled: bool,
    writer: Arc<dyn SlotWriter>,
}

// The slot pointer is only dereferenced through `SlotWriter`/atomic reads.
unsafe impl<F: NativeFn> Send for HookRecord<F> {}
unsafe impl<F: NativeFn> Sync for HookRecord<F> {}

impl<F: NativeFn> HookRecord<F> {
    /// Captures the slot's current target as the original to call through.
    /// The slot is not modified until [`HookRecord::enable`].
    ///
    /// # Safety
    ///
    /// `slot` must be null or point to a live slot holding a function with
    /// signature `F`, and must stay valid for the lifetime of the record.
    pub unsafe fn install(
        name: &'static str,
        slot: *mut usize,
        detour: F,
        writer: Arc<dyn SlotWriter>,
    ) -> Result<Self, HookInstallError> {
        if slot.is_null() {
            return Err(HookInstallError::Unresolved { name });
        }

        let current = read_slot(slot);
        if current == 0 {
            return Err(HookInstallError::Unresolved { name });
        }
        if current == detour.addr() {
            return Err(HookInstallError::AlreadyHooked { name });
        }

        debug!(
            hook = name,
            slot = format_args!("{:#x}", slot as usize),
            original = format_args!("{current:#x}"),
            "hook_installed"
        );

        Ok(Self {
            name,
            slot,
            detour,
            original: F::from_addr(current),
            enabled: false,
            writer,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn target(&self) -> usize {
        self.slot as usize
    }

    pub fn original(&self) -> F {
        self.original
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) -> Result<(), HookInstallError> {
        if self.enabled {
            return Ok(());
        }

        self.write(self.detour.addr())?;
        self.enabled = true;
        debug!(hook = self.name, "hook_enabled");
        Ok(())
    }

    pub fn disable(&mut self) -> Result<(), HookInstallError> {
        if !self.enabled {
            return Ok(());
        }

        let current = unsafe { read_slot(self.slot) };
        if current != self.detour.addr() {
            warn!(
                hook = self.name,
                current = format_args!("{current:#x}"),
                "hook_slot_changed_while_enabled"
            );
        }

        self.write(self.original.addr())?;
        self.enabled = false;
        debug!(hook = self.name, "hook_disabled");
        Ok(())
    }

    fn write(&self, value: usize) -> Result<(), HookInstallError> {
        unsafe { self.writer.write_slot(self.slot, value) }.map_err(|source| {
            HookInstallError::Patch {
                name: self.name,
                address: self.slot as usize,
                source,
            }
        })
    }
}

impl<F: NativeFn> Drop for HookRecord<F> {
    fn drop(&mut self) {
        if let Err(error) = self.disable() {
            error!(hook = self.name, error = %error, "hook_restore_failed");
        }
    }
}

impl<F: NativeFn> std::fmt::Debug for HookRecord<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRecord")
            .field("name", &self.name)
            .field("slot", &format_args!("{:#x}", self.slot as usize))
            .field("original", &format_args!("{:#x}", self.original.addr()))
            .field("enabled", &self.enabled)
            .finish()
    }
}
