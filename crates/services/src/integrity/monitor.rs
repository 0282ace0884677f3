use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::signals::{
    EnvironmentSignal, IntegrityWarning, ShortcutClass, SignalListener, SignalResponse,
    SignalSource, SubscriptionId, WarningSink,
};

/// Why the monitor fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    TabHidden,
    FocusLost,
    PageExit,
    TabShortcut,
}

impl ViolationKind {
    fn warning(self) -> IntegrityWarning {
        match self {
            ViolationKind::TabHidden => IntegrityWarning::TabSwitch,
            ViolationKind::FocusLost => IntegrityWarning::FocusLost,
            ViolationKind::PageExit => IntegrityWarning::PageExit,
            ViolationKind::TabShortcut => IntegrityWarning::TabShortcut,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Disarmed,
    Armed,
}

type ViolationCallback = Box<dyn FnOnce(ViolationKind) + Send>;

struct Shared {
    state: MonitorState,
    fired: Option<ViolationKind>,
    warned: bool,
    /// Bumped on every arm and disarm; stale listeners and timers compare against it.
    generation: u64,
    subscription: Option<SubscriptionId>,
    callback: Option<ViolationCallback>,
    pending_blur: Option<JoinHandle<()>>,
}

/// Everything a listener or blur timer needs, without owning the monitor.
#[derive(Clone)]
struct Context {
    shared: Weak<Mutex<Shared>>,
    source: Arc<dyn SignalSource>,
    warnings: Arc<dyn WarningSink>,
    debounce: Duration,
    runtime: Option<Handle>,
    generation: u64,
}

/// Watches the environment during an active quiz and reports exactly one
/// violation per armed lifetime.
///
/// Hidden tab, unload and the tab-cycle shortcut fire immediately. Focus loss
/// fires only if focus is still gone after the debounce window. Other blocked
/// shortcuts and the context menu are suppressed without firing.
pub struct IntegrityMonitor {
    shared: Arc<Mutex<Shared>>,
    source: Arc<dyn SignalSource>,
    warnings: Arc<dyn WarningSink>,
    debounce: Duration,
}

impl IntegrityMonitor {
    #[must_use]
    pub fn new(source: Arc<dyn SignalSource>, warnings: Arc<dyn WarningSink>, debounce: Duration) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                state: MonitorState::Disarmed,
                fired: None,
                warned: false,
                generation: 0,
                subscription: None,
                callback: None,
                pending_blur: None,
            })),
            source,
            warnings,
            debounce,
        }
    }

    /// Start watching. Returns `false` when already armed or when a previous
    /// violation is still latched. The `warned` latch survives re-arming.
    ///
    /// Focus-loss debouncing uses the ambient tokio runtime; without one the
    /// focus re-check happens immediately.
    pub fn arm(&self, on_violation: impl FnOnce(ViolationKind) + Send + 'static) -> bool {
        let Ok(mut shared) = self.shared.lock() else {
            return false;
        };
        if shared.state == MonitorState::Armed || shared.fired.is_some() {
            return false;
        }
        shared.generation += 1;
        shared.state = MonitorState::Armed;
        shared.callback = Some(Box::new(on_violation));

        let generation = shared.generation;
        drop(shared);

        let ctx = Context {
            shared: Arc::downgrade(&self.shared),
            source: Arc::clone(&self.source),
            warnings: Arc::clone(&self.warnings),
            debounce: self.debounce,
            runtime: Handle::try_current().ok(),
            generation,
        };
        let listener: SignalListener = Arc::new(move |signal| handle_signal(&ctx, signal));
        // Lock must be released here: a source may emit from inside subscribe.
        let id = self.source.subscribe(listener);
        match self.shared.lock() {
            Ok(mut shared) if shared.generation == generation => shared.subscription = Some(id),
            _ => self.source.unsubscribe(id),
        }
        info!(generation, "integrity monitor armed");
        true
    }

    /// Stop watching. Listeners are detached and pending blur checks cancelled
    /// before this returns. The `fired` latch is kept.
    pub fn disarm(&self) {
        let subscription = {
            let Ok(mut shared) = self.shared.lock() else {
                return;
            };
            if shared.state == MonitorState::Disarmed {
                return;
            }
            shared.generation += 1;
            shared.state = MonitorState::Disarmed;
            shared.callback = None;
            if let Some(pending) = shared.pending_blur.take() {
                pending.abort();
            }
            shared.subscription.take()
        };
        if let Some(id) = subscription {
            self.source.unsubscribe(id);
        }
        info!("integrity monitor disarmed");
    }

    /// Clear the `fired` and `warned` latches. Not used mid-session.
    pub fn reset(&self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.fired = None;
            shared.warned = false;
        }
    }

    #[must_use]
    pub fn state(&self) -> MonitorState {
        self.shared
            .lock()
            .map_or(MonitorState::Disarmed, |shared| shared.state)
    }

    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.violation().is_some()
    }

    /// The violation latched by the last armed lifetime, if any.
    #[must_use]
    pub fn violation(&self) -> Option<ViolationKind> {
        self.shared.lock().ok().and_then(|shared| shared.fired)
    }

    #[must_use]
    pub fn was_warned(&self) -> bool {
        self.shared.lock().is_ok_and(|shared| shared.warned)
    }
}

impl Drop for IntegrityMonitor {
    fn drop(&mut self) {
        self.disarm();
    }
}

fn handle_signal(ctx: &Context, signal: &EnvironmentSignal) -> SignalResponse {
    match signal {
        EnvironmentSignal::BecameHidden => {
            fire(ctx, ViolationKind::TabHidden);
            SignalResponse::Ignored
        }
        EnvironmentSignal::BeforeExit => {
            if !is_live(ctx) {
                return SignalResponse::Ignored;
            }
            fire(ctx, ViolationKind::PageExit);
            SignalResponse::PreventDefault
        }
        EnvironmentSignal::LostFocus => {
            schedule_blur_check(ctx);
            SignalResponse::Ignored
        }
        EnvironmentSignal::ContextMenu => {
            if is_live(ctx) {
                SignalResponse::PreventDefault
            } else {
                SignalResponse::Ignored
            }
        }
        EnvironmentSignal::Key(chord) => match chord.classify() {
            ShortcutClass::TabCycle => {
                if !is_live(ctx) {
                    return SignalResponse::Ignored;
                }
                fire(ctx, ViolationKind::TabShortcut);
                SignalResponse::PreventDefault
            }
            ShortcutClass::Blocked => {
                if !is_live(ctx) {
                    return SignalResponse::Ignored;
                }
                debug!(?chord, "blocked keyboard shortcut");
                warn_once(ctx, IntegrityWarning::ShortcutBlocked);
                SignalResponse::PreventDefault
            }
            ShortcutClass::Allowed => SignalResponse::Ignored,
        },
    }
}

/// Armed, same generation, not yet fired.
fn is_live(ctx: &Context) -> bool {
    ctx.shared.upgrade().is_some_and(|shared| {
        shared
            .lock()
            .is_ok_and(|s| s.state == MonitorState::Armed && s.generation == ctx.generation && s.fired.is_none())
    })
}

fn warn_once(ctx: &Context, warning: IntegrityWarning) {
    let Some(shared) = ctx.shared.upgrade() else {
        return;
    };
    let should_warn = match shared.lock() {
        Ok(mut s) if s.generation == ctx.generation && !s.warned => {
            s.warned = true;
            true
        }
        _ => false,
    };
    if should_warn {
        ctx.warnings.warn(warning);
    }
}

/// Latch `fired`, then warn and invoke the callback outside the lock.
fn fire(ctx: &Context, kind: ViolationKind) {
    let Some(shared) = ctx.shared.upgrade() else {
        return;
    };
    let (callback, announce) = {
        let Ok(mut s) = shared.lock() else {
            return;
        };
        if s.state != MonitorState::Armed || s.generation != ctx.generation || s.fired.is_some() {
            return;
        }
        s.fired = Some(kind);
        if let Some(pending) = s.pending_blur.take() {
            pending.abort();
        }
        let announce = !s.warned;
        s.warned = true;
        (s.callback.take(), announce)
    };

    warn!(?kind, "integrity violation detected");
    if announce {
        ctx.warnings.warn(kind.warning());
    }
    if let Some(callback) = callback {
        callback(kind);
    }
}

fn schedule_blur_check(ctx: &Context) {
    if !is_live(ctx) {
        return;
    }
    let Some(runtime) = ctx.runtime.clone() else {
        if !ctx.source.has_focus() {
            fire(ctx, ViolationKind::FocusLost);
        }
        return;
    };
    let Some(shared) = ctx.shared.upgrade() else {
        return;
    };
    let Ok(mut s) = shared.lock() else {
        return;
    };
    if s.pending_blur.as_ref().is_some_and(|pending| !pending.is_finished()) {
        return;
    }

    let timer_ctx = ctx.clone();
    s.pending_blur = Some(runtime.spawn(async move {
        tokio::time::sleep(timer_ctx.debounce).await;
        if timer_ctx.source.has_focus() {
            debug!("blur absorbed, focus returned within debounce window");
            return;
        }
        fire(&timer_ctx, ViolationKind::FocusLost);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::signals::{Key, KeyChord, ManualSignalSource, RecordingWarningSink};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DEBOUNCE: Duration = Duration::from_millis(100);

    fn monitor() -> (IntegrityMonitor, ManualSignalSource, RecordingWarningSink) {
        let source = ManualSignalSource::new();
        let warnings = RecordingWarningSink::new();
        let monitor = IntegrityMonitor::new(
            Arc::new(source.clone()),
            Arc::new(warnings.clone()),
            DEBOUNCE,
        );
        (monitor, source, warnings)
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce(ViolationKind) + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn hidden_then_blur_fires_once() {
        let (monitor, source, warnings) = monitor();
        let (count, on_violation) = counter();
        assert!(monitor.arm(on_violation));

        source.emit(EnvironmentSignal::BecameHidden);
        source.blur();
        source.emit(EnvironmentSignal::BeforeExit);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.violation(), Some(ViolationKind::TabHidden));
        assert_eq!(warnings.warnings(), vec![IntegrityWarning::TabSwitch]);
    }

    #[test]
    fn blocked_shortcut_warns_without_firing() {
        let (monitor, source, warnings) = monitor();
        let (count, on_violation) = counter();
        monitor.arm(on_violation);

        let response = source.emit(EnvironmentSignal::Key(KeyChord::ctrl(Key::Char('r'))));
        assert_eq!(response, SignalResponse::PreventDefault);
        source.emit(EnvironmentSignal::Key(KeyChord::plain(Key::Function(12))));

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!monitor.is_fired());
        assert!(monitor.was_warned());
        assert_eq!(warnings.warnings(), vec![IntegrityWarning::ShortcutBlocked]);

        // the single warning is spent; a later violation fires silently
        source.emit(EnvironmentSignal::Key(KeyChord::ctrl(Key::Tab)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(warnings.warnings().len(), 1);
    }

    #[test]
    fn disarm_detaches_listeners() {
        let (monitor, source, _) = monitor();
        let (count, on_violation) = counter();
        monitor.arm(on_violation);
        assert_eq!(source.listener_count(), 1);

        monitor.disarm();
        assert_eq!(source.listener_count(), 0);
        assert_eq!(monitor.state(), MonitorState::Disarmed);
        source.emit(EnvironmentSignal::BecameHidden);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rearm_refused_until_reset() {
        let (monitor, source, _) = monitor();
        let (_, first) = counter();
        monitor.arm(first);
        source.emit(EnvironmentSignal::BecameHidden);
        monitor.disarm();

        let (_, second) = counter();
        assert!(!monitor.arm(second));
        monitor.reset();
        let (_, third) = counter();
        assert!(monitor.arm(third));
        assert!(!monitor.was_warned());
    }

    #[test]
    fn rearming_keeps_the_warning_spent() {
        let (monitor, source, warnings) = monitor();
        let (_, first) = counter();
        monitor.arm(first);
        source.emit(EnvironmentSignal::Key(KeyChord::ctrl(Key::Char('r'))));
        monitor.disarm();

        let (count, second) = counter();
        assert!(monitor.arm(second));
        assert!(monitor.was_warned());
        source.emit(EnvironmentSignal::Key(KeyChord::ctrl(Key::Char('w'))));
        source.emit(EnvironmentSignal::BecameHidden);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(warnings.warnings(), vec![IntegrityWarning::ShortcutBlocked]);
    }

    #[test]
    fn drop_unsubscribes() {
        let (monitor, source, _) = monitor();
        let (_, on_violation) = counter();
        monitor.arm(on_violation);
        drop(monitor);
        assert_eq!(source.listener_count(), 0);
    }

    #[test]
    fn without_runtime_blur_checks_focus_immediately() {
        let (monitor, source, _) = monitor();
        let (count, on_violation) = counter();
        monitor.arm(on_violation);

        source.emit(EnvironmentSignal::LostFocus);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        source.blur();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_blur_is_absorbed() {
        let (monitor, source, warnings) = monitor();
        let (count, on_violation) = counter();
        monitor.arm(on_violation);

        source.blur();
        tokio::time::sleep(Duration::from_millis(50)).await;
        source.set_focus(true);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(warnings.warnings().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_blur_fires_after_debounce() {
        let (monitor, source, warnings) = monitor();
        let (count, on_violation) = counter();
        monitor.arm(on_violation);

        source.blur();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(warnings.warnings(), vec![IntegrityWarning::FocusLost]);
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_cancels_pending_blur_check() {
        let (monitor, source, _) = monitor();
        let (count, on_violation) = counter();
        monitor.arm(on_violation);

        source.blur();
        monitor.disarm();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!monitor.is_fired());
    }
}
