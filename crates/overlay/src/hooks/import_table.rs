//! Import address table lookup for mapped PE images.

use std::ffi::CStr;

const DOS_MAGIC: u16 = 0x5A4D;
const NT_SIGNATURE: u32 = 0x0000_4550;
const PE32_MAGIC: u16 = 0x10B;
const PE32_PLUS_MAGIC: u16 = 0x20B;
const IMPORT_DESCRIPTOR_SIZE: usize = 20;

/// Address of the import-address-table entry for `dll!function` in the PE
/// image mapped at `base`. `dll` matches case-insensitively; ordinal imports
/// are skipped.
///
/// # Safety
///
/// `base` must be null or the base of a mapped PE image whose thunks are
/// pointer-sized.
pub unsafe fn import_slot(base: *const u8, dll: &str, function: &str) -> Option<*mut usize> {
    if base.is_null() || read::<u16>(base, 0) != DOS_MAGIC {
        return None;
    }
    let nt = read::<u32>(base, 0x3C) as usize;
    if read::<u32>(base, nt) != NT_SIGNATURE {
        return None;
    }

    let optional = nt + 24;
    let directories = match read::<u16>(base, optional) {
        PE32_PLUS_MAGIC => optional + 112,
        PE32_MAGIC => optional + 96,
        _ => return None,
    };
    // Entry 1 is the import directory.
    let imports_rva = read::<u32>(base, directories + 8) as usize;
    if imports_rva == 0 {
        return None;
    }

    let thunk_size = std::mem::size_of::<usize>();
    let ordinal_flag = 1usize << (thunk_size * 8 - 1);
    let mut descriptor = imports_rva;
    loop {
        let names_rva = read::<u32>(base, descriptor) as usize;
        let name_rva = read::<u32>(base, descriptor + 12) as usize;
        let thunks_rva = read::<u32>(base, descriptor + 16) as usize;
        if name_rva == 0 || thunks_rva == 0 {
            return None;
        }

        let name = CStr::from_ptr(base.add(name_rva).cast());
        if name.to_bytes().eq_ignore_ascii_case(dll.as_bytes()) {
            let lookup_rva = if names_rva != 0 { names_rva } else { thunks_rva };
            let mut index = 0;
            loop {
                let entry = read::<usize>(base, lookup_rva + index * thunk_size);
                if entry == 0 {
                    break;
                }
                if entry & ordinal_flag == 0 {
                    // Skip the two-byte hint.
                    let imported = CStr::from_ptr(base.add(entry + 2).cast());
                    if imported.to_bytes() == function.as_bytes() {
                        return Some(base.add(thunks_rva + index * thunk_size) as *mut usize);
                    }
                }
                index += 1;
            }
        }
        descriptor += IMPORT_DESCRIPTOR_SIZE;
    }
}

unsafe fn read<T: Copy>(base: *const u8, offset: usize) -> T {
    std::ptr::read_unaligned(base.add(offset).cast())
}
