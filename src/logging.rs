//! Tracing layer that mirrors every log line onto the dashboard bus.
//!
//! The dashboard shows a live tail of the same events that reach stderr, so
//! operators can watch pairing and filing progress from the browser without a
//! terminal attached.

use crate::events::{DashboardBus, DashboardEvent};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

pub struct DashboardLogLayer {
    bus: DashboardBus,
}

impl DashboardLogLayer {
    pub fn new(bus: DashboardBus) -> Self {
        Self { bus }
    }
}

impl<S: Subscriber> Layer<S> for DashboardLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        if visitor.0.is_empty() {
            return;
        }
        let line = format!("{} {}", event.metadata().level(), visitor.0);
        self.bus.publish(DashboardEvent::Log(line));
    }
}

/// Extracts the `message` field of an event; other fields are appended as
/// `key=value` the way the fmt layer renders them.
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        use std::fmt::Write;
        if field.name() == "message" {
            let rendered = format!("{value:?}");
            if self.0.is_empty() {
                self.0 = rendered;
            } else {
                let _ = write!(self.0, " {rendered}");
            }
        } else {
            if !self.0.is_empty() {
                self.0.push(' ');
            }
            let _ = write!(self.0, "{}={value:?}", field.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn emitted_events_reach_the_bus() {
        let bus = DashboardBus::new(16);
        let mut rx = bus.subscribe();
        let subscriber =
            tracing_subscriber::registry().with(DashboardLogLayer::new(bus.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("folder configured: {}", "trip2024");
        });

        match rx.try_recv().unwrap() {
            DashboardEvent::Log(line) => {
                assert!(line.contains("folder configured: trip2024"), "got {line:?}");
                assert!(line.starts_with("INFO"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn structured_fields_are_rendered_inline() {
        let bus = DashboardBus::new(16);
        let mut rx = bus.subscribe();
        let subscriber =
            tracing_subscriber::registry().with(DashboardLogLayer::new(bus.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(sender = "u1", "image without folder");
        });

        match rx.try_recv().unwrap() {
            DashboardEvent::Log(line) => {
                assert!(line.contains("image without folder"));
                assert!(line.contains("sender=\"u1\""));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
