//! Environment signals observed while a quiz is in progress, and the
//! injectable source that delivers them.

use std::sync::{Arc, Mutex};

use tracing::debug;

//
// ─── KEYBOARD ──────────────────────────────────────────────────────────────────
//

/// Key part of a chord, normalised from whatever the host reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Tab,
    Char(char),
    /// Function key `F1`..`F24`.
    Function(u8),
    Other,
}

/// One key press with its modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyChord {
    pub key: Key,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
    pub alt: bool,
}

impl KeyChord {
    #[must_use]
    pub fn plain(key: Key) -> Self {
        Self {
            key,
            ctrl: false,
            meta: false,
            shift: false,
            alt: false,
        }
    }

    #[must_use]
    pub fn ctrl(key: Key) -> Self {
        Self {
            ctrl: true,
            ..Self::plain(key)
        }
    }

    #[must_use]
    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    #[must_use]
    pub fn with_alt(mut self) -> Self {
        self.alt = true;
        self
    }

    #[must_use]
    pub fn with_meta(mut self) -> Self {
        self.meta = true;
        self
    }

    /// Ctrl on most platforms, Cmd on macOS.
    fn command(&self) -> bool {
        self.ctrl || self.meta
    }

    #[must_use]
    pub fn classify(&self) -> ShortcutClass {
        if self.command() && self.key == Key::Tab {
            return ShortcutClass::TabCycle;
        }
        let blocked = match self.key {
            Key::Tab => self.alt,
            Key::Function(12) => true,
            Key::Function(5) => self.command(),
            Key::Char(c) if self.command() => match c.to_ascii_lowercase() {
                't' | 'w' | 'n' | 'r' => true,
                'i' | 'j' | 'c' => self.shift,
                _ => false,
            },
            _ => false,
        };
        if blocked {
            ShortcutClass::Blocked
        } else {
            ShortcutClass::Allowed
        }
    }
}

/// How the monitor treats a key chord while armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutClass {
    /// Cycling tabs: default prevented and counted as a violation.
    TabCycle,
    /// Dev tools, refresh, new/close tab or window, app switching: default prevented only.
    Blocked,
    Allowed,
}

//
// ─── SIGNALS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentSignal {
    BecameHidden,
    LostFocus,
    BeforeExit,
    Key(KeyChord),
    ContextMenu,
}

/// What a listener asks the host to do with the originating event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalResponse {
    Ignored,
    PreventDefault,
}

impl SignalResponse {
    #[must_use]
    pub fn merge(self, other: SignalResponse) -> SignalResponse {
        if self == SignalResponse::PreventDefault || other == SignalResponse::PreventDefault {
            SignalResponse::PreventDefault
        } else {
            SignalResponse::Ignored
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type SignalListener = Arc<dyn Fn(&EnvironmentSignal) -> SignalResponse + Send + Sync>;

/// Host environment delivering visibility, focus, unload and keyboard events.
pub trait SignalSource: Send + Sync {
    fn subscribe(&self, listener: SignalListener) -> SubscriptionId;

    /// Detach a listener. Once this returns, the listener is never invoked again.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Whether the quiz window currently holds focus.
    fn has_focus(&self) -> bool;
}

#[derive(Default)]
struct ManualInner {
    next_id: u64,
    listeners: Vec<(SubscriptionId, SignalListener)>,
    unfocused: bool,
}

/// In-process signal source driven by explicit `emit` calls.
#[derive(Clone, Default)]
pub struct ManualSignalSource {
    inner: Arc<Mutex<ManualInner>>,
}

impl ManualSignalSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a signal to every current listener and merge their responses.
    pub fn emit(&self, signal: EnvironmentSignal) -> SignalResponse {
        let listeners: Vec<SignalListener> = match self.inner.lock() {
            Ok(inner) => inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(_) => return SignalResponse::Ignored,
        };
        listeners
            .iter()
            .fold(SignalResponse::Ignored, |acc, listener| acc.merge(listener(&signal)))
    }

    pub fn set_focus(&self, focused: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.unfocused = !focused;
        }
    }

    /// Convenience for the common "window blurred and stayed blurred" case.
    pub fn blur(&self) -> SignalResponse {
        self.set_focus(false);
        self.emit(EnvironmentSignal::LostFocus)
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.lock().map_or(0, |inner| inner.listeners.len())
    }
}

impl SignalSource for ManualSignalSource {
    fn subscribe(&self, listener: SignalListener) -> SubscriptionId {
        let Ok(mut inner) = self.inner.lock() else {
            return SubscriptionId(u64::MAX);
        };
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner.listeners.push((id, listener));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.listeners.retain(|(existing, _)| *existing != id);
        }
    }

    fn has_focus(&self) -> bool {
        self.inner.lock().map_or(true, |inner| !inner.unfocused)
    }
}

//
// ─── WARNINGS ──────────────────────────────────────────────────────────────────
//

/// User-facing warning raised at most once per armed monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityWarning {
    TabSwitch,
    FocusLost,
    PageExit,
    TabShortcut,
    ShortcutBlocked,
}

impl IntegrityWarning {
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            IntegrityWarning::TabSwitch => {
                "Tab switching detected. Your quiz is submitted with a score of 0 and locked for 24 hours."
            }
            IntegrityWarning::FocusLost => {
                "Focus lost. Your quiz is submitted with a score of 0 and locked for 24 hours."
            }
            IntegrityWarning::PageExit => {
                "Leaving the page submits your quiz with a score of 0 and locks it for 24 hours."
            }
            IntegrityWarning::TabShortcut => {
                "Tab switching shortcut detected. Your quiz is submitted with a score of 0 and locked for 24 hours."
            }
            IntegrityWarning::ShortcutBlocked => {
                "Keyboard shortcuts are disabled during the quiz. Continued attempts will submit your quiz."
            }
        }
    }
}

pub trait WarningSink: Send + Sync {
    fn warn(&self, warning: IntegrityWarning);
}

/// Sink that only logs; used when no UI is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogWarningSink;

impl WarningSink for LogWarningSink {
    fn warn(&self, warning: IntegrityWarning) {
        tracing::warn!(?warning, "{}", warning.message());
    }
}

/// Sink that remembers every warning, for assertions and headless drivers.
#[derive(Debug, Clone, Default)]
pub struct RecordingWarningSink {
    seen: Arc<Mutex<Vec<IntegrityWarning>>>,
}

impl RecordingWarningSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn warnings(&self) -> Vec<IntegrityWarning> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

impl WarningSink for RecordingWarningSink {
    fn warn(&self, warning: IntegrityWarning) {
        debug!(?warning, "integrity warning recorded");
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(warning);
        }
    }
}
