//! Name <-> evdev code oracle (spec.md §6).
//!
//! Case-insensitive symbolic lookup, a reverse lookup for logging/GUI
//! collaborators, and the `"disable"` sentinel. The table mirrors the
//! style of the teacher's `platform/linux/keycodes.rs` match table but
//! keys on the raw evdev `KEY_*` name strings rather than an app-level
//! `KeyCode` enum, since combinations and macros in this spec address
//! symbols and raw codes directly.

use std::collections::HashMap;

/// Sentinel output code meaning "consume but do not emit".
pub const DISABLE_CODE: i32 = -1;
const DISABLE_NAME: &str = "disable";

/// Case-insensitive name <-> code oracle.
pub struct KeyboardLayout {
    by_name: HashMap<String, i32>,
    by_code: HashMap<i32, String>,
}

impl KeyboardLayout {
    /// Builds the oracle from the standard Linux key name table plus the
    /// `disable` sentinel. Additional aliases (e.g. `"a"` as well as
    /// `"KEY_A"`) are folded in by `correct_case`/`get`'s case-insensitive
    /// matching rather than duplicated in the table.
    pub fn new() -> Self {
        let mut by_name = HashMap::new();
        let mut by_code = HashMap::new();

        for (name, code) in linux_key_table() {
            by_name.insert(name.to_ascii_lowercase(), code);
            by_code.entry(code).or_insert_with(|| name.to_string());
        }
        by_name.insert(DISABLE_NAME.to_string(), DISABLE_CODE);
        by_code.insert(DISABLE_CODE, DISABLE_NAME.to_string());

        KeyboardLayout { by_name, by_code }
    }

    /// Case-insensitive lookup. Accepts both the bare name (`"a"`,
    /// `"Shift_L"`) and the canonical `KEY_*` form.
    pub fn get(&self, name: &str) -> Option<i32> {
        let lower = name.to_ascii_lowercase();
        if let Some(code) = self.by_name.get(&lower) {
            return Some(*code);
        }
        let with_prefix = format!("key_{lower}");
        self.by_name.get(&with_prefix).copied()
    }

    pub fn get_name(&self, code: i32) -> Option<String> {
        self.by_code.get(&code).cloned()
    }

    /// Returns the canonical-case spelling of `name` if known, otherwise
    /// `name` unchanged.
    pub fn correct_case(&self, name: &str) -> String {
        match self.get(name).and_then(|code| self.get_name(code)) {
            Some(canonical) => canonical,
            None => name.to_string(),
        }
    }
}

impl Default for KeyboardLayout {
    fn default() -> Self {
        KeyboardLayout::new()
    }
}

/// A representative slice of `linux/input-event-codes.h`. Extend as
/// needed; omissions simply fail `get()` with `None`, which mapping
/// validation surfaces as `ValidationError::UnknownSymbol`.
fn linux_key_table() -> Vec<(&'static str, i32)> {
    // All codes below are EV_KEY codes from linux/input-event-codes.h.
    vec![
        ("KEY_ESC", 1),
        ("KEY_1", 2),
        ("KEY_2", 3),
        ("KEY_3", 4),
        ("KEY_4", 5),
        ("KEY_5", 6),
        ("KEY_6", 7),
        ("KEY_7", 8),
        ("KEY_8", 9),
        ("KEY_9", 10),
        ("KEY_0", 11),
        ("KEY_MINUS", 12),
        ("KEY_EQUAL", 13),
        ("KEY_BACKSPACE", 14),
        ("KEY_TAB", 15),
        ("KEY_Q", 16),
        ("KEY_W", 17),
        ("KEY_E", 18),
        ("KEY_R", 19),
        ("KEY_T", 20),
        ("KEY_Y", 21),
        ("KEY_U", 22),
        ("KEY_I", 23),
        ("KEY_O", 24),
        ("KEY_P", 25),
        ("KEY_LEFTBRACE", 26),
        ("KEY_RIGHTBRACE", 27),
        ("KEY_ENTER", 28),
        ("KEY_LEFTCTRL", 29),
        ("KEY_A", 30),
        ("KEY_S", 31),
        ("KEY_D", 32),
        ("KEY_F", 33),
        ("KEY_G", 34),
        ("KEY_H", 35),
        ("KEY_J", 36),
        ("KEY_K", 37),
        ("KEY_L", 38),
        ("KEY_SEMICOLON", 39),
        ("KEY_APOSTROPHE", 40),
        ("KEY_GRAVE", 41),
        ("KEY_LEFTSHIFT", 42),
        ("KEY_BACKSLASH", 43),
        ("KEY_Z", 44),
        ("KEY_X", 45),
        ("KEY_C", 46),
        ("KEY_V", 47),
        ("KEY_B", 48),
        ("KEY_N", 49),
        ("KEY_M", 50),
        ("KEY_COMMA", 51),
        ("KEY_DOT", 52),
        ("KEY_SLASH", 53),
        ("KEY_RIGHTSHIFT", 54),
        ("KEY_KPASTERISK", 55),
        ("KEY_LEFTALT", 56),
        ("KEY_SPACE", 57),
        ("KEY_CAPSLOCK", 58),
        ("KEY_F1", 59),
        ("KEY_F2", 60),
        ("KEY_F3", 61),
        ("KEY_F4", 62),
        ("KEY_F5", 63),
        ("KEY_F6", 64),
        ("KEY_F7", 65),
        ("KEY_F8", 66),
        ("KEY_F9", 67),
        ("KEY_F10", 68),
        ("KEY_NUMLOCK", 69),
        ("KEY_SCROLLLOCK", 70),
        ("KEY_F11", 87),
        ("KEY_F12", 88),
        ("KEY_RIGHTCTRL", 97),
        ("KEY_RIGHTALT", 100),
        ("KEY_HOME", 102),
        ("KEY_UP", 103),
        ("KEY_PAGEUP", 104),
        ("KEY_LEFT", 105),
        ("KEY_RIGHT", 106),
        ("KEY_END", 107),
        ("KEY_DOWN", 108),
        ("KEY_PAGEDOWN", 109),
        ("KEY_INSERT", 110),
        ("KEY_DELETE", 111),
        ("KEY_LEFTMETA", 125),
        ("KEY_RIGHTMETA", 126),
        // Mouse buttons share the EV_KEY namespace.
        ("BTN_LEFT", 0x110),
        ("BTN_RIGHT", 0x111),
        ("BTN_MIDDLE", 0x112),
        ("BTN_A", 0x130),
        ("BTN_B", 0x131),
        ("BTN_X", 0x133),
        ("BTN_Y", 0x134),
    ]
}
