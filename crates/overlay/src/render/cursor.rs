use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::hooks::native::CursorHandle;

/// Suppress iff the UI wanted the mouse last frame, the cursor is not one of
/// the toolkit's own, and the override is enabled.
pub fn suppression_rule(wants_capture: bool, is_toolkit_cursor: bool, override_enabled: bool) -> bool {
    wants_capture && !is_toolkit_cursor && override_enabled
}

/// Decides whether the host's cursor changes reach the OS while the UI owns
/// the mouse. Read from the cursor detour, written by the render thread.
#[derive(Debug)]
pub struct CursorArbiter {
    override_enabled: AtomicBool,
    wants_capture: AtomicBool,
    toolkit_cursors: RwLock<Vec<CursorHandle>>,
}

impl CursorArbiter {
    pub fn new(override_enabled: bool) -> Self {
        Self {
            override_enabled: AtomicBool::new(override_enabled),
            wants_capture: AtomicBool::new(false),
            toolkit_cursors: RwLock::new(Vec::new()),
        }
    }

    pub fn override_enabled(&self) -> bool {
        self.override_enabled.load(Ordering::Acquire)
    }

    pub fn set_override(&self, enabled: bool) {
        self.override_enabled.store(enabled, Ordering::Release);
    }

    pub fn last_wants_capture(&self) -> bool {
        self.wants_capture.load(Ordering::Acquire)
    }

    /// Called after every rendered frame.
    pub fn record_frame(&self, wants_capture: bool, toolkit_cursors: &[CursorHandle]) {
        self.wants_capture.store(wants_capture, Ordering::Release);
        if self.toolkit_cursors.read().as_slice() != toolkit_cursors {
            *self.toolkit_cursors.write() = toolkit_cursors.to_vec();
        }
    }

    /// Forgets last frame's capture state, e.g. when the scene goes away.
    pub fn reset(&self) {
        self.wants_capture.store(false, Ordering::Release);
        self.toolkit_cursors.write().clear();
    }

    pub fn is_toolkit_cursor(&self, cursor: CursorHandle) -> bool {
        self.toolkit_cursors.read().contains(&cursor)
    }

    pub fn should_suppress(&self, requested: CursorHandle) -> bool {
        suppression_rule(
            self.last_wants_capture(),
            self.is_toolkit_cursor(requested),
            self.override_enabled(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::c_void;

    use super::*;

    fn cursor(raw: usize) -> CursorHandle {
        CursorHandle::from_raw(raw as *mut c_void)
    }

    #[test]
    fn rule_suppresses_only_when_all_three_conditions_hold() {
        for wants_capture in [false, true] {
            for is_toolkit in [false, true] {
                for override_enabled in [false, true] {
                    let expected = wants_capture && !is_toolkit && override_enabled;
                    assert_eq!(
                        suppression_rule(wants_capture, is_toolkit, override_enabled),
                        expected,
                        "capture={wants_capture} toolkit={is_toolkit} override={override_enabled}"
                    );
                }
            }
        }
    }

    #[test]
    fn arbiter_uses_last_recorded_frame() {
        let arbiter = CursorArbiter::new(true);
        let arrow = cursor(0x100);
        let ui_hand = cursor(0x200);

        assert!(!arbiter.should_suppress(arrow));

        arbiter.record_frame(true, &[ui_hand]);
        assert!(arbiter.should_suppress(arrow));
        assert!(!arbiter.should_suppress(ui_hand));

        arbiter.record_frame(false, &[ui_hand]);
        assert!(!arbiter.should_suppress(arrow));
    }

    #[test]
    fn disabling_override_forwards_every_cursor() {
        let arbiter = CursorArbiter::new(true);
        arbiter.record_frame(true, &[]);
        arbiter.set_override(false);

        assert!(!arbiter.should_suppress(cursor(0x100)));
    }

    #[test]
    fn reset_clears_capture_and_toolkit_cursors() {
        let arbiter = CursorArbiter::new(true);
        arbiter.record_frame(true, &[cursor(0x200)]);
        arbiter.reset();

        assert!(!arbiter.last_wants_capture());
        assert!(!arbiter.is_toolkit_cursor(cursor(0x200)));
    }
}
