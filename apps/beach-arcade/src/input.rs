//! Translation of browser input codes into the canonical events simulations
//! consume.
//!
//! Keys arrive as DOM `KeyboardEvent.code` strings (`"KeyW"`, `"ArrowUp"`),
//! pointer buttons as DOM `MouseEvent.button` numbers. Anything not in the
//! tables is reported as unmapped; the caller decides what to do with it.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    N,
    O,
    P,
    Q,
    R,
    S,
    T,
    U,
    V,
    W,
    X,
    Y,
    Z,
    Digit0,
    Digit1,
    Digit2,
    Digit3,
    Digit4,
    Digit5,
    Digit6,
    Digit7,
    Digit8,
    Digit9,
    Up,
    Down,
    Left,
    Right,
    Space,
    Enter,
    Escape,
    Tab,
    Backspace,
    LeftShift,
    RightShift,
    LeftCtrl,
    RightCtrl,
    LeftAlt,
    RightAlt,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
    Minus,
    Equals,
    Comma,
    Period,
    Slash,
    Semicolon,
    Quote,
    LeftBracket,
    RightBracket,
    Backslash,
    Backquote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerButton {
    Left,
    Middle,
    Right,
    Back,
    Forward,
}

/// Canonical input delivered to a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputEvent {
    KeyDown { key: Key },
    KeyUp { key: Key },
    PointerMotion { dx: f64, dy: f64 },
    ButtonDown { button: PointerButton },
    ButtonUp { button: PointerButton },
}

static KEY_TABLE: Lazy<HashMap<&'static str, Key>> = Lazy::new(|| {
    use Key::*;
    HashMap::from([
        ("KeyA", A),
        ("KeyB", B),
        ("KeyC", C),
        ("KeyD", D),
        ("KeyE", E),
        ("KeyF", F),
        ("KeyG", G),
        ("KeyH", H),
        ("KeyI", I),
        ("KeyJ", J),
        ("KeyK", K),
        ("KeyL", L),
        ("KeyM", M),
        ("KeyN", N),
        ("KeyO", O),
        ("KeyP", P),
        ("KeyQ", Q),
        ("KeyR", R),
        ("KeyS", S),
        ("KeyT", T),
        ("KeyU", U),
        ("KeyV", V),
        ("KeyW", W),
        ("KeyX", X),
        ("KeyY", Y),
        ("KeyZ", Z),
        ("Digit0", Digit0),
        ("Digit1", Digit1),
        ("Digit2", Digit2),
        ("Digit3", Digit3),
        ("Digit4", Digit4),
        ("Digit5", Digit5),
        ("Digit6", Digit6),
        ("Digit7", Digit7),
        ("Digit8", Digit8),
        ("Digit9", Digit9),
        ("ArrowUp", Up),
        ("ArrowDown", Down),
        ("ArrowLeft", Left),
        ("ArrowRight", Right),
        ("Space", Space),
        ("Enter", Enter),
        ("NumpadEnter", Enter),
        ("Escape", Escape),
        ("Tab", Tab),
        ("Backspace", Backspace),
        ("ShiftLeft", LeftShift),
        ("ShiftRight", RightShift),
        ("ControlLeft", LeftCtrl),
        ("ControlRight", RightCtrl),
        ("AltLeft", LeftAlt),
        ("AltRight", RightAlt),
        ("F1", F1),
        ("F2", F2),
        ("F3", F3),
        ("F4", F4),
        ("F5", F5),
        ("F6", F6),
        ("F7", F7),
        ("F8", F8),
        ("F9", F9),
        ("F10", F10),
        ("F11", F11),
        ("F12", F12),
        ("Minus", Minus),
        ("Equal", Equals),
        ("Comma", Comma),
        ("Period", Period),
        ("Slash", Slash),
        ("Semicolon", Semicolon),
        ("Quote", Quote),
        ("BracketLeft", LeftBracket),
        ("BracketRight", RightBracket),
        ("Backslash", Backslash),
        ("Backquote", Backquote),
    ])
});

#[derive(Debug, Clone, Copy, Default)]
pub struct InputTranslator;

impl InputTranslator {
    pub fn new() -> Self {
        Self
    }

    pub fn translate_key(&self, code: &str) -> Option<Key> {
        KEY_TABLE.get(code).copied()
    }

    pub fn translate_button(&self, button: i64) -> Option<PointerButton> {
        match button {
            0 => Some(PointerButton::Left),
            1 => Some(PointerButton::Middle),
            2 => Some(PointerButton::Right),
            3 => Some(PointerButton::Back),
            4 => Some(PointerButton::Forward),
            _ => None,
        }
    }
}
