//! Pairs each completed command with the start event that produced it.
//!
//! Events belonging to "the same command slot" share a [`CorrelationKey`]
//! derived from the session id and command text. The same command is often
//! run repeatedly in one session, so a key usually has several pre events;
//! the match is resolved by time.
//!
//! # Match Policy
//!
//! A post event matches the candidate with the latest `occurred_at` that is
//! not after the post's own `occurred_at`. When several candidates share
//! that timestamp, the one recorded last in log order wins. Candidates
//! strictly after the post are never selected, even if they are the only
//! ones: a command cannot finish before it starts.

use std::collections::HashMap;

use crate::event::Event;

/// Derived identity of a (session, command text) slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    pub fn new(session_id: i64, text: &str) -> Self {
        let material = format!("{}\u{0}{}", session_id, text);
        CorrelationKey(format!("{:x}", md5::compute(material)))
    }

    pub fn of(event: &Event) -> Self {
        Self::new(event.session_id, &event.text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// How a post event relates to the recorded pre events.
#[derive(Debug, PartialEq, Eq)]
pub enum Correlation<'a> {
    /// No pre event shares the key; the post cannot be attributed.
    Orphan,
    /// Pre events share the key but all were recorded after the post.
    NoPreceding,
    Matched(&'a Event),
}

/// Selects the nearest preceding candidate for `post`.
///
/// Candidates with a different session or command text are ignored, so the
/// result is exact even if two slots ever hash to the same key.
pub fn find_match<'a>(post: &Event, candidates: &'a [Event]) -> Option<&'a Event> {
    nearest_preceding(post, candidates.iter().enumerate()).map(|(_, pre)| pre)
}

fn nearest_preceding<'a>(
    post: &Event,
    candidates: impl IntoIterator<Item = (usize, &'a Event)>,
) -> Option<(usize, &'a Event)> {
    candidates
        .into_iter()
        .filter(|(_, candidate)| {
            candidate.session_id == post.session_id
                && candidate.text == post.text
                && candidate.occurred_at <= post.occurred_at
        })
        .fold(None, |best: Option<(usize, &Event)>, candidate| match best {
            Some(current) if current.1.occurred_at > candidate.1.occurred_at => Some(current),
            _ => Some(candidate),
        })
}

/// Pre events grouped by correlation key.
///
/// Events keep the position they were given to [`PreIndex::build`] in, so
/// callers can tell which recorded event a post resolved to.
#[derive(Debug, Default)]
pub struct PreIndex {
    events: Vec<Event>,
    groups: HashMap<CorrelationKey, Vec<usize>>,
}

impl PreIndex {
    pub fn build(events: impl IntoIterator<Item = Event>) -> Self {
        let events: Vec<Event> = events.into_iter().collect();
        let mut groups: HashMap<CorrelationKey, Vec<usize>> = HashMap::new();
        for (position, event) in events.iter().enumerate() {
            groups
                .entry(CorrelationKey::of(event))
                .or_default()
                .push(position);
        }
        PreIndex { events, groups }
    }

    /// Pre events sharing `key`, in log order.
    pub fn candidates(&self, key: &CorrelationKey) -> Vec<&Event> {
        self.positions(key)
            .iter()
            .map(|&position| &self.events[position])
            .collect()
    }

    pub fn correlate(&self, post: &Event) -> Correlation<'_> {
        let positions = self.positions(&CorrelationKey::of(post));
        if positions.is_empty() {
            return Correlation::Orphan;
        }
        match self.nearest_in(post, positions) {
            Some((_, pre)) => Correlation::Matched(pre),
            None => Correlation::NoPreceding,
        }
    }

    /// Position of the pre event `post` resolves to, if any.
    pub fn matched_position(&self, post: &Event) -> Option<usize> {
        self.nearest_in(post, self.positions(&CorrelationKey::of(post)))
            .map(|(position, _)| position)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    fn positions(&self, key: &CorrelationKey) -> &[usize] {
        self.groups.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    fn nearest_in(&self, post: &Event, positions: &[usize]) -> Option<(usize, &Event)> {
        nearest_preceding(
            post,
            positions
                .iter()
                .map(|&position| (position, &self.events[position])),
        )
    }
}
