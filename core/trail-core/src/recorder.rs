//! Entry points for the shell hooks: one call when a command starts, one
//! when it finishes. Recording never syncs; callers decide when to do that.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::event::{CommandContext, Event};
use crate::store::{EventStore, LogKind};

pub struct Recorder<'a> {
    store: &'a EventStore,
}

impl<'a> Recorder<'a> {
    pub fn new(store: &'a EventStore) -> Self {
        Recorder { store }
    }

    pub fn record_pre(&self, command: CommandContext, at: DateTime<Utc>) -> Result<Event> {
        let event = Event::pre(command, at);
        self.store.append(LogKind::Pre, &event)?;
        tracing::debug!(session_id = event.session_id, "Recorded pre event");
        Ok(event)
    }

    pub fn record_post(
        &self,
        command: CommandContext,
        at: DateTime<Utc>,
        result: i32,
    ) -> Result<Event> {
        let event = Event::post(command, at, result);
        self.store.append(LogKind::Post, &event)?;
        tracing::debug!(session_id = event.session_id, result, "Recorded post event");
        Ok(event)
    }
}
