//! Observer pattern for reflex events - lattice-level pub/sub
//!
//! When a batch step commits, every reflex that fired is delivered to the
//! subscribed observers, in coordinate order. No polling required.
//!
//! ## Filtering
//!
//! Observers see every event by default. Wrap one in a [`KindFilter`] to
//! receive only selected reflex kinds (e.g. chaos quarantines for an
//! isolation service, trust changes for an audit log).

use crate::reflex::{ReflexEvent, ReflexKind};
use std::sync::mpsc::Sender;

/// Observer that receives reflex events.
pub trait ReflexObserver: Send + Sync {
    /// Called once per fired reflex, after the tick has been committed.
    fn on_event(&self, event: &ReflexEvent);
}

/// Function-based observer for simple cases
pub struct FnObserver<F: Fn(&ReflexEvent) + Send + Sync>(pub F);

impl<F: Fn(&ReflexEvent) + Send + Sync> ReflexObserver for FnObserver<F> {
    fn on_event(&self, event: &ReflexEvent) {
        (self.0)(event);
    }
}

/// Channel-based observer - forwards owned events to a receiver
pub struct ChannelObserver {
    sender: Sender<ReflexEvent>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<ReflexEvent>) -> Self {
        Self { sender }
    }
}

impl ReflexObserver for ChannelObserver {
    fn on_event(&self, event: &ReflexEvent) {
        // A dropped receiver just stops listening.
        let _ = self.sender.send(event.clone());
    }
}

/// Forwards only events of the listed kinds.
pub struct KindFilter<O: ReflexObserver> {
    kinds: Vec<ReflexKind>,
    inner: O,
}

impl<O: ReflexObserver> KindFilter<O> {
    pub fn new(kinds: impl IntoIterator<Item = ReflexKind>, inner: O) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            inner,
        }
    }
}

impl<O: ReflexObserver> ReflexObserver for KindFilter<O> {
    fn on_event(&self, event: &ReflexEvent) {
        if self.kinds.contains(&event.kind) {
            self.inner.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::Coord;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use uuid::Uuid;

    fn event(kind: ReflexKind) -> ReflexEvent {
        ReflexEvent {
            kind,
            cell_id: Uuid::nil(),
            coord: Coord::new(0, 0, 0),
            tick: 1,
            trigger: "test".into(),
            data: BTreeMap::new(),
        }
    }

    #[test]
    fn test_fn_observer() {
        let count = AtomicUsize::new(0);
        let observer = FnObserver(|_: &ReflexEvent| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        observer.on_event(&event(ReflexKind::Trust));
        observer.on_event(&event(ReflexKind::Decay));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_channel_observer() {
        let (tx, rx) = mpsc::channel();
        let observer = ChannelObserver::new(tx);
        observer.on_event(&event(ReflexKind::Chaos));
        assert_eq!(rx.try_recv().map(|e| e.kind), Ok(ReflexKind::Chaos));
    }

    #[test]
    fn test_channel_observer_survives_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        ChannelObserver::new(tx).on_event(&event(ReflexKind::Chaos));
    }

    #[test]
    fn test_kind_filter() {
        let (tx, rx) = mpsc::channel();
        let observer = KindFilter::new([ReflexKind::Stability], ChannelObserver::new(tx));
        observer.on_event(&event(ReflexKind::Trust));
        observer.on_event(&event(ReflexKind::Stability));
        let got: Vec<_> = rx.try_iter().map(|e| e.kind).collect();
        assert_eq!(got, vec![ReflexKind::Stability]);
    }
}
