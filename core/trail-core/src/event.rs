//! Command events and their one-line codec.
//!
//! Every shell command produces two events: a `pre` event when the command
//! starts and a `post` event carrying the exit code when it completes. Each
//! event is encoded as one JSON object per line, so a torn write from a
//! crashed process damages at most the last line of a log.
//!
//! ```text
//! {"shell":"zsh","session_id":4242,"text":"npm test","hostname":"box","username":"dev","occurred_at":1700000000123456789,"phase":"post","result":0}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrailError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pre,
    Post,
}

/// The shell-side identity of a command, shared by its pre and post events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    pub shell: String,
    pub session_id: i64,
    pub text: String,
    pub hostname: String,
    pub username: String,
}

/// One shell command occurrence.
///
/// A `Post` event always carries `result`; a `Pre` event never does.
/// Events are immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub shell: String,
    pub session_id: i64,
    pub text: String,
    pub hostname: String,
    pub username: String,
    /// Recording time, serialized as Unix nanoseconds.
    #[serde(with = "chrono::serde::ts_nanoseconds")]
    pub occurred_at: DateTime<Utc>,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<i32>,
}

impl Event {
    pub fn pre(command: CommandContext, occurred_at: DateTime<Utc>) -> Self {
        Self::from_context(command, occurred_at, Phase::Pre, None)
    }

    pub fn post(command: CommandContext, occurred_at: DateTime<Utc>, result: i32) -> Self {
        Self::from_context(command, occurred_at, Phase::Post, Some(result))
    }

    fn from_context(
        command: CommandContext,
        occurred_at: DateTime<Utc>,
        phase: Phase,
        result: Option<i32>,
    ) -> Self {
        Self {
            shell: command.shell,
            session_id: command.session_id,
            text: command.text,
            hostname: command.hostname,
            username: command.username,
            occurred_at,
            phase,
            result,
        }
    }

    /// Checks the phase/result invariant.
    pub fn validate(&self) -> Result<()> {
        match (self.phase, self.result) {
            (Phase::Pre, None) | (Phase::Post, Some(_)) => Ok(()),
            (Phase::Pre, Some(_)) => Err(TrailError::InvalidEvent(
                "pre event must not carry a result".to_string(),
            )),
            (Phase::Post, None) => Err(TrailError::InvalidEvent(
                "post event must carry a result".to_string(),
            )),
        }
    }

    /// Recording time as Unix nanoseconds.
    pub fn occurred_at_nanos(&self) -> i64 {
        unix_nanos(&self.occurred_at)
    }

    /// Encodes the event as a single line, without the trailing newline.
    pub fn encode_line(&self) -> Result<String> {
        self.validate()?;
        serde_json::to_string(self).map_err(|err| TrailError::json("encode event", err))
    }

    /// Decodes one log line. Fails on malformed JSON and on events that
    /// violate the phase invariant.
    pub fn decode_line(line: &str) -> Result<Self> {
        let event: Event = serde_json::from_str(line.trim_end_matches('\r'))
            .map_err(|err| TrailError::json("decode event", err))?;
        event.validate()?;
        Ok(event)
    }
}

/// Converts a timestamp to Unix nanoseconds, saturating outside the
/// representable range (years before 1677 or after 2262).
pub fn unix_nanos(at: &DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(if at.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn context(session_id: i64, text: &str) -> CommandContext {
        CommandContext {
            shell: "zsh".to_string(),
            session_id,
            text: text.to_string(),
            hostname: "devbox".to_string(),
            username: "dev".to_string(),
        }
    }

    pub fn at_secs(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(secs * 1_000_000_000)
    }

    pub fn pre(session_id: i64, text: &str, secs: i64) -> Event {
        Event::pre(context(session_id, text), at_secs(secs))
    }

    pub fn post(session_id: i64, text: &str, secs: i64, result: i32) -> Event {
        Event::post(context(session_id, text), at_secs(secs), result)
    }
}
