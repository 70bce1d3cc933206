//! Keyboard state, as far as the hotkeys are concerned.

/// Answers whether a key is held down right now. Key names are the ones
/// used in the config, e.g. `Home` or `F10`.
#[cfg_attr(test, mockall::automock)]
pub trait KeyboardSource: Send + Sync {
    fn is_pressed(&self, key: &str) -> bool;
}

/// For hosts without a keyboard to poll.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKeyboard;

impl KeyboardSource for NoKeyboard {
    fn is_pressed(&self, _: &str) -> bool {
        false
    }
}
