use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GamepadButton {
    Cross,
    Circle,
    Triangle,
    Square,
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
    L1,
    R1,
    L2,
    R2,
    L3,
    R3,
    Start,
    Select,
}

const BUTTON_COUNT: usize = 16;

impl GamepadButton {
    const fn index(self) -> usize {
        match self {
            GamepadButton::Cross => 0,
            GamepadButton::Circle => 1,
            GamepadButton::Triangle => 2,
            GamepadButton::Square => 3,
            GamepadButton::DpadUp => 4,
            GamepadButton::DpadDown => 5,
            GamepadButton::DpadLeft => 6,
            GamepadButton::DpadRight => 7,
            GamepadButton::L1 => 8,
            GamepadButton::R1 => 9,
            GamepadButton::L2 => 10,
            GamepadButton::R2 => 11,
            GamepadButton::L3 => 12,
            GamepadButton::R3 => 13,
            GamepadButton::Start => 14,
            GamepadButton::Select => 15,
        }
    }
}

/// Raw pad state for one frame. `left_stick` is `[x, y]` in `-1.0..=1.0`
/// with positive y pointing up.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GamepadState {
    down: [bool; BUTTON_COUNT],
    pub left_stick: [f32; 2],
}

impl GamepadState {
    pub fn set(&mut self, button: GamepadButton, is_down: bool) {
        self.down[button.index()] = is_down;
    }

    pub fn is_down(&self, button: GamepadButton) -> bool {
        self.down[button.index()]
    }

    pub fn with(mut self, button: GamepadButton) -> Self {
        self.set(button, true);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavInput {
    Activate,
    Cancel,
    Input,
    Menu,
    DpadLeft,
    DpadRight,
    DpadUp,
    DpadDown,
    LStickLeft,
    LStickRight,
    LStickUp,
    LStickDown,
    FocusPrev,
    FocusNext,
    TweakSlow,
    TweakFast,
}

const BUTTON_NAV: [(GamepadButton, NavInput); 12] = [
    (GamepadButton::Cross, NavInput::Activate),
    (GamepadButton::Circle, NavInput::Cancel),
    (GamepadButton::Triangle, NavInput::Input),
    (GamepadButton::Square, NavInput::Menu),
    (GamepadButton::DpadLeft, NavInput::DpadLeft),
    (GamepadButton::DpadRight, NavInput::DpadRight),
    (GamepadButton::DpadUp, NavInput::DpadUp),
    (GamepadButton::DpadDown, NavInput::DpadDown),
    (GamepadButton::L1, NavInput::FocusPrev),
    (GamepadButton::R1, NavInput::FocusNext),
    (GamepadButton::L2, NavInput::TweakSlow),
    (GamepadButton::R2, NavInput::TweakFast),
];

const STICK_DEADZONE: f32 = 0.25;

pub const NAV_ENABLED_NOTICE: &str = "Gamepad navigation enabled";
pub const NAV_DISABLED_NOTICE: &str = "Gamepad navigation disabled";

/// The UI side of input translation.
pub trait UiInput {
    fn wants_text_input(&self) -> bool;
    fn clear_no_mouse_flag(&mut self);
    /// Inputs not pushed in a frame read as released.
    fn push_nav_input(&mut self, input: NavInput, value: f32);
    fn set_gamepad_navigation(&mut self, enabled: bool);
    fn set_gamepad_window_visible(&mut self, visible: bool);
    fn notify(&mut self, message: &str);
}

/// The host's own input system.
pub trait HostInput: Send {
    fn gamepad(&self) -> GamepadState;
    /// Forgets keys that are held down so they do not stay stuck once
    /// focus moves into the UI.
    fn clear_latched_keys(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEvent {
    GamepadNavigationToggled { enabled: bool },
    GamepadWindowToggled { visible: bool },
}

#[derive(Debug, Default)]
pub struct InputBridge {
    gamepad_navigation: bool,
    gamepad_window_visible: bool,
    previous: GamepadState,
}

impl InputBridge {
    pub fn new(gamepad_navigation: bool) -> Self {
        Self {
            gamepad_navigation,
            ..Self::default()
        }
    }

    pub fn gamepad_navigation(&self) -> bool {
        self.gamepad_navigation
    }

    pub fn gamepad_window_visible(&self) -> bool {
        self.gamepad_window_visible
    }

    /// Runs once per frame, before the UI frame begins.
    pub fn update(
        &mut self,
        ui: &mut dyn UiInput,
        host: Option<&mut dyn HostInput>,
    ) -> Vec<BridgeEvent> {
        ui.clear_no_mouse_flag();

        let Some(host) = host else {
            return Vec::new();
        };
        if ui.wants_text_input() {
            host.clear_latched_keys();
        }

        let pad = host.gamepad();
        let events = self.translate(ui, pad);
        self.previous = pad;
        events
    }

    fn pressed(&self, pad: &GamepadState, button: GamepadButton) -> bool {
        pad.is_down(button) && !self.previous.is_down(button)
    }

    fn translate(&mut self, ui: &mut dyn UiInput, pad: GamepadState) -> Vec<BridgeEvent> {
        let mut events = Vec::new();

        if self.pressed(&pad, GamepadButton::Select) {
            self.gamepad_window_visible = !self.gamepad_window_visible;
            ui.set_gamepad_window_visible(self.gamepad_window_visible);
            events.push(BridgeEvent::GamepadWindowToggled {
                visible: self.gamepad_window_visible,
            });
        }

        // L1 + R3 toggles navigation; the chord itself is not forwarded.
        if pad.is_down(GamepadButton::L1) && self.pressed(&pad, GamepadButton::R3) {
            self.gamepad_navigation = !self.gamepad_navigation;
            ui.set_gamepad_navigation(self.gamepad_navigation);
            ui.notify(if self.gamepad_navigation {
                NAV_ENABLED_NOTICE
            } else {
                NAV_DISABLED_NOTICE
            });
            info!(
                enabled = self.gamepad_navigation,
                "gamepad_navigation_toggled"
            );
            events.push(BridgeEvent::GamepadNavigationToggled {
                enabled: self.gamepad_navigation,
            });
            return events;
        }

        if !self.gamepad_navigation {
            return events;
        }

        for (button, nav) in BUTTON_NAV {
            if pad.is_down(button) {
                ui.push_nav_input(nav, 1.0);
            }
        }

        let [x, y] = pad.left_stick;
        for (value, nav) in [
            (-x, NavInput::LStickLeft),
            (x, NavInput::LStickRight),
            (y, NavInput::LStickUp),
            (-y, NavInput::LStickDown),
        ] {
            if value > STICK_DEADZONE {
                ui.push_nav_input(nav, value.min(1.0));
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingUi {
        wants_text: bool,
        no_mouse_cleared: usize,
        nav: Vec<(NavInput, f32)>,
        navigation: Option<bool>,
        window_visible: Option<bool>,
        notices: Vec<String>,
    }

    impl UiInput for RecordingUi {
        fn wants_text_input(&self) -> bool {
            self.wants_text
        }

        fn clear_no_mouse_flag(&mut self) {
            self.no_mouse_cleared += 1;
        }

        fn push_nav_input(&mut self, input: NavInput, value: f32) {
            self.nav.push((input, value));
        }

        fn set_gamepad_navigation(&mut self, enabled: bool) {
            self.navigation = Some(enabled);
        }

        fn set_gamepad_window_visible(&mut self, visible: bool) {
            self.window_visible = Some(visible);
        }

        fn notify(&mut self, message: &str) {
            self.notices.push(message.to_string());
        }
    }

    #[derive(Default)]
    struct FakeHost {
        pad: GamepadState,
        cleared: usize,
    }

    impl HostInput for FakeHost {
        fn gamepad(&self) -> GamepadState {
            self.pad
        }

        fn clear_latched_keys(&mut self) {
            self.cleared += 1;
        }
    }

    fn nav_inputs(ui: &RecordingUi) -> Vec<NavInput> {
        ui.nav.iter().map(|(input, _)| *input).collect()
    }

    #[test]
    fn no_mouse_flag_is_cleared_every_frame() {
        let mut bridge = InputBridge::new(false);
        let mut ui = RecordingUi::default();

        bridge.update(&mut ui, None);
        bridge.update(&mut ui, None);

        assert_eq!(ui.no_mouse_cleared, 2);
    }

    #[test]
    fn latched_keys_cleared_only_while_ui_wants_text() {
        let mut bridge = InputBridge::new(false);
        let mut host = FakeHost::default();
        let mut ui = RecordingUi::default();

        bridge.update(&mut ui, Some(&mut host));
        assert_eq!(host.cleared, 0);

        ui.wants_text = true;
        bridge.update(&mut ui, Some(&mut host));
        assert_eq!(host.cleared, 1);
    }

    #[test]
    fn buttons_are_ignored_while_navigation_is_disabled() {
        let mut bridge = InputBridge::new(false);
        let mut host = FakeHost {
            pad: GamepadState::default().with(GamepadButton::Cross),
            ..FakeHost::default()
        };
        let mut ui = RecordingUi::default();

        bridge.update(&mut ui, Some(&mut host));

        assert!(ui.nav.is_empty());
    }

    #[test]
    fn face_shoulder_and_dpad_buttons_follow_the_fixed_mapping() {
        let mut bridge = InputBridge::new(true);
        let pad = GamepadState::default()
            .with(GamepadButton::Cross)
            .with(GamepadButton::Circle)
            .with(GamepadButton::Triangle)
            .with(GamepadButton::Square)
            .with(GamepadButton::DpadUp)
            .with(GamepadButton::R1)
            .with(GamepadButton::L2)
            .with(GamepadButton::R2);
        let mut host = FakeHost {
            pad,
            ..FakeHost::default()
        };
        let mut ui = RecordingUi::default();

        bridge.update(&mut ui, Some(&mut host));

        assert_eq!(
            nav_inputs(&ui),
            vec![
                NavInput::Activate,
                NavInput::Cancel,
                NavInput::Input,
                NavInput::Menu,
                NavInput::DpadUp,
                NavInput::FocusNext,
                NavInput::TweakSlow,
                NavInput::TweakFast,
            ]
        );
    }

    #[test]
    fn left_stick_maps_past_the_deadzone() {
        let mut bridge = InputBridge::new(true);
        let mut pad = GamepadState::default();
        pad.left_stick = [-0.8, 0.1];
        let mut host = FakeHost {
            pad,
            ..FakeHost::default()
        };
        let mut ui = RecordingUi::default();

        bridge.update(&mut ui, Some(&mut host));

        assert_eq!(ui.nav, vec![(NavInput::LStickLeft, 0.8)]);
    }

    #[test]
    fn l1_held_with_r3_press_toggles_navigation_and_notifies_once() {
        let mut bridge = InputBridge::new(false);
        let mut host = FakeHost::default();
        let mut ui = RecordingUi::default();

        host.pad = GamepadState::default().with(GamepadButton::L1);
        bridge.update(&mut ui, Some(&mut host));
        host.pad = host.pad.with(GamepadButton::R3);
        let events = bridge.update(&mut ui, Some(&mut host));

        assert_eq!(
            events,
            vec![BridgeEvent::GamepadNavigationToggled { enabled: true }]
        );
        assert!(bridge.gamepad_navigation());
        assert_eq!(ui.navigation, Some(true));
        assert_eq!(ui.notices, vec![NAV_ENABLED_NOTICE.to_string()]);
        assert!(ui.nav.is_empty());

        // Holding the chord does not re-toggle.
        let events = bridge.update(&mut ui, Some(&mut host));
        assert!(events.is_empty());
        assert_eq!(ui.notices.len(), 1);
    }

    #[test]
    fn r3_without_l1_does_not_toggle() {
        let mut bridge = InputBridge::new(false);
        let mut host = FakeHost {
            pad: GamepadState::default().with(GamepadButton::R3),
            ..FakeHost::default()
        };
        let mut ui = RecordingUi::default();

        assert!(bridge.update(&mut ui, Some(&mut host)).is_empty());
        assert!(!bridge.gamepad_navigation());
    }

    #[test]
    fn select_press_toggles_the_gamepad_window_on_edges_only() {
        let mut bridge = InputBridge::new(false);
        let mut host = FakeHost::default();
        let mut ui = RecordingUi::default();

        host.pad = GamepadState::default().with(GamepadButton::Select);
        let first = bridge.update(&mut ui, Some(&mut host));
        let held = bridge.update(&mut ui, Some(&mut host));
        host.pad = GamepadState::default();
        bridge.update(&mut ui, Some(&mut host));
        host.pad = GamepadState::default().with(GamepadButton::Select);
        let second = bridge.update(&mut ui, Some(&mut host));

        assert_eq!(
            first,
            vec![BridgeEvent::GamepadWindowToggled { visible: true }]
        );
        assert!(held.is_empty());
        assert_eq!(
            second,
            vec![BridgeEvent::GamepadWindowToggled { visible: false }]
        );
        assert_eq!(ui.window_visible, Some(false));
    }
}
