//! Deciding, once per present, whether anything has to change.
//!
//! There is no timer thread. Every state machine here is polled from the
//! present path with the current time:
//!
//! - the toggle hotkey flips whether effects are shown,
//! - the reload hotkey, a config file change or an overlay command asks for a
//!   rebuild of every swapchain,
//! - a swapchain recreated during a resize shows a pass-through until
//!   resizing has been quiet for a while.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::config::{ConfigWatch, LayerSettings};
use crate::input::KeyboardSource;
use crate::overlay::OverlayCommand;

/// Where the present path gets the time from.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Turns a held key into a single press.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyEdge {
    down: bool,
}

impl KeyEdge {
    /// True only on the poll where the key went down.
    pub fn update(&mut self, down: bool) -> bool {
        let pressed = down && !self.down;
        self.down = down;
        pressed
    }
}

/// Waits for resizing to settle.
#[derive(Debug, Clone, Copy)]
pub struct ResizeDebounce {
    pending: bool,
    armed_at: Option<Instant>,
    quiescence: Duration,
}

impl ResizeDebounce {
    pub fn new(quiescence: Duration) -> Self {
        Self {
            pending: false,
            armed_at: None,
            quiescence,
        }
    }

    /// Start (or restart) the quiet window.
    pub fn arm(&mut self, now: Instant) {
        self.pending = true;
        self.armed_at = Some(now);
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// True once, on the first poll after the window passed.
    pub fn poll(&mut self, now: Instant) -> bool {
        let settled = self.pending
            && self
                .armed_at
                .is_some_and(|armed| now.duration_since(armed) >= self.quiescence);
        if settled {
            self.reset();
        }
        settled
    }

    pub fn reset(&mut self) {
        self.pending = false;
        self.armed_at = None;
    }

    fn set_quiescence(&mut self, quiescence: Duration) {
        self.quiescence = quiescence;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadCause {
    Hotkey,
    ConfigChanged,
    /// Rebuild from the registry without touching the config.
    Apply,
    SwitchConfig(PathBuf),
}

/// What one poll decided.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Triggers {
    pub toggled: bool,
    pub reload: Option<ReloadCause>,
    /// Swapchains showing a resize pass-through should get their effects
    /// back.
    pub resize_settled: bool,
    pub save: bool,
}

#[derive(Debug, Clone)]
pub struct HotReload {
    toggle_key: String,
    reload_key: String,
    toggle: KeyEdge,
    reload: KeyEdge,
    watch: ConfigWatch,
    resize: ResizeDebounce,
    effects_active: bool,
}

impl HotReload {
    pub fn new(settings: &LayerSettings, config_path: Option<PathBuf>) -> Self {
        Self {
            toggle_key: settings.toggle_key.clone(),
            reload_key: settings.reload_key.clone(),
            toggle: KeyEdge::default(),
            reload: KeyEdge::default(),
            watch: ConfigWatch::new(config_path),
            resize: ResizeDebounce::new(settings.resize_quiescence()),
            effects_active: settings.enable_on_launch,
        }
    }

    pub fn effects_active(&self) -> bool {
        self.effects_active
    }

    pub fn resize_pending(&self) -> bool {
        self.resize.is_pending()
    }

    /// A swapchain was recreated with a pass-through only.
    pub fn note_resize(&mut self, now: Instant) {
        self.resize.arm(now);
    }

    /// Pick up hotkeys and timing from freshly loaded settings.
    pub fn apply_settings(&mut self, settings: &LayerSettings) {
        self.toggle_key.clone_from(&settings.toggle_key);
        self.reload_key.clone_from(&settings.reload_key);
        self.resize.set_quiescence(settings.resize_quiescence());
    }

    /// Follow a different config file. Nothing pending carries over.
    pub fn switch_config(&mut self, settings: &LayerSettings, path: Option<PathBuf>) {
        self.apply_settings(settings);
        self.watch = ConfigWatch::new(path);
        self.resize.reset();
    }

    /// Ignore the change we just made to the config file ourselves.
    pub fn rearm_watch(&mut self) {
        self.watch.rearm();
    }

    /// Poll every trigger. A config switch wins over a reload, which wins
    /// over an apply; any of them also ends a pending resize.
    pub fn poll(
        &mut self,
        now: Instant,
        keyboard: &dyn KeyboardSource,
        commands: impl IntoIterator<Item = OverlayCommand>,
    ) -> Triggers {
        let mut triggers = Triggers::default();

        if self.toggle.update(keyboard.is_pressed(&self.toggle_key)) {
            self.effects_active = !self.effects_active;
            triggers.toggled = true;
        }
        let hotkey = self.reload.update(keyboard.is_pressed(&self.reload_key));
        let changed = self.watch.poll();

        let mut apply = false;
        let mut switch = None;
        for command in commands {
            match command {
                OverlayCommand::Apply => apply = true,
                OverlayCommand::SwitchConfig(path) => switch = Some(path),
                OverlayCommand::Save => triggers.save = true,
            }
        }

        triggers.reload = if let Some(path) = switch {
            Some(ReloadCause::SwitchConfig(path))
        } else if hotkey {
            Some(ReloadCause::Hotkey)
        } else if changed {
            Some(ReloadCause::ConfigChanged)
        } else if apply {
            Some(ReloadCause::Apply)
        } else {
            None
        };

        if triggers.reload.is_some() {
            self.resize.reset();
        } else {
            triggers.resize_settled = self.resize.poll(now);
        }

        triggers
    }
}
