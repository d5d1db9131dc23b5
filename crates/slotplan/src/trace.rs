//! Compilation tracing boundary.
//!
//! Tracing is optional, injected by the caller, and must not affect the
//! compiled plan.

use crate::error::{ErrorClass, ErrorOrigin};

///
/// BuildTraceSink
///

pub trait BuildTraceSink: Send + Sync {
    fn on_event(&self, event: BuildTraceEvent);
}

///
/// BuildTraceEvent
///
/// One event per builder dispatch plus one terminal event per
/// compilation. `depth` is the recursion depth of the logical node being
/// entered.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildTraceEvent {
    Enter {
        node_kind: &'static str,
        depth: u32,
    },
    Finish {
        stage_kind: &'static str,
        slots_allocated: u64,
    },
    Error {
        class: ErrorClass,
        origin: ErrorOrigin,
    },
}

///
/// TESTS
///

#[cfg(test)]
pub(crate) mod test_sink {
    use super::{BuildTraceEvent, BuildTraceSink};
    use std::sync::Mutex;

    ///
    /// RecordingSink
    ///

    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        events: Mutex<Vec<BuildTraceEvent>>,
    }

    impl RecordingSink {
        pub(crate) fn events(&self) -> Vec<BuildTraceEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl BuildTraceSink for RecordingSink {
        fn on_event(&self, event: BuildTraceEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}
