//! # LogWriter: record events as tracing output
//!
//! A minimal subscriber that logs every [`Event`] through `tracing`.
//! `CREATE` goes to `debug`, `FINISH`/`DROP` to `info`, failures to `warn`.
//!
//! ## Example output (with a fmt subscriber)
//! ```text
//! DEBUG event: create run_id="9f1c…" record_id="doc-1" origin="producer"
//!  INFO event: finish run_id="9f1c…" record_id="doc-1" origin="writer"
//!  WARN event: fail run_id="9f1c…" record_id="doc-3" origin="executor" message="parse: bad input"
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event logging subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let kind = e.kind().as_label();
        let origin = e.origin().as_label();
        if e.is_failure() {
            warn!(
                run_id = %e.run_id(),
                record_id = %e.record_id(),
                origin,
                message = e.message().unwrap_or(""),
                "event: {kind}"
            );
            return;
        }
        match e.kind() {
            EventKind::Create => {
                debug!(run_id = %e.run_id(), record_id = %e.record_id(), origin, "event: {kind}")
            }
            EventKind::Finish | EventKind::Drop | EventKind::Fail => {
                info!(run_id = %e.run_id(), record_id = %e.record_id(), origin, "event: {kind}")
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
