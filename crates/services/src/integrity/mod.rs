//! Integrity monitoring for a live quiz: tab switches, focus loss, page exit
//! and a fixed set of keyboard shortcuts.

mod monitor;
mod signals;

pub use monitor::{IntegrityMonitor, MonitorState, ViolationKind};
pub use signals::{
    EnvironmentSignal, IntegrityWarning, Key, KeyChord, LogWarningSink, ManualSignalSource,
    RecordingWarningSink, ShortcutClass, SignalListener, SignalResponse, SignalSource,
    SubscriptionId, WarningSink,
};
