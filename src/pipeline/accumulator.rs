//! Reassembles fragmented tool-call argument streams into complete JSON
//! objects.
//!
//! One `Accumulator` is exclusively owned by a single in-flight request. It
//! tracks every tool-call id it has seen, in first-seen order, so that
//! `finish()` can emit `ToolCallEnded` events in a stable, deterministic
//! sequence rather than hash-map iteration order.

use crate::types::event::CanonicalEvent;
use std::collections::HashMap;

struct CallState {
    name: String,
    buffer: String,
    finished: bool,
}

/// Stateful tool-call reassembler. See module docs.
#[derive(Default)]
pub struct Accumulator {
    order: Vec<String>,
    calls: HashMap<String, CallState>,
}

impl Accumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a tool call with `id`/`name` began. Emits
    /// `ToolCallStarted` exactly once per id, even if called again for the
    /// same id (a provider resending a start frame is a no-op here).
    pub fn on_tool_call_start(&mut self, id: &str, name: &str) -> Option<CanonicalEvent> {
        if self.calls.contains_key(id) {
            return None;
        }
        self.order.push(id.to_string());
        self.calls.insert(
            id.to_string(),
            CallState { name: name.to_string(), buffer: String::new(), finished: false },
        );
        Some(CanonicalEvent::ToolCallStarted { id: id.to_string(), name: name.to_string() })
    }

    /// Records a fragment of `id`'s arguments. If `id` has not seen a
    /// start frame, one is synthesized with an empty name so reassembly
    /// can still proceed (some providers elide an explicit start event).
    pub fn on_tool_call_delta(&mut self, id: &str, args_delta: &str) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();
        if !self.calls.contains_key(id) {
            if let Some(event) = self.on_tool_call_start(id, "") {
                events.push(event);
            }
        }
        let state = self.calls.get_mut(id).expect("just inserted above if missing");
        state.buffer.push_str(args_delta);
        events.push(CanonicalEvent::PartialToolCall {
            id: id.to_string(),
            args_delta: args_delta.to_string(),
            is_complete: false,
        });
        events
    }

    /// Returns `true` if any tool call has been started.
    #[must_use]
    pub fn has_calls(&self) -> bool {
        !self.order.is_empty()
    }

    /// Returns the tool name associated with `id`, if known.
    #[must_use]
    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.calls.get(id).map(|s| s.name.as_str())
    }

    /// Finalizes every tracked call, in first-seen order: each id's
    /// accumulated buffer is parsed as JSON. A successful parse emits a
    /// final `PartialToolCall{is_complete: true}` followed by
    /// `ToolCallEnded`; a parse failure returns `Err` with the offending
    /// id and message, per the "parse failure emits `StreamError` and
    /// terminates" rule in the streaming pipeline's accumulator contract.
    pub fn finish(&mut self) -> Result<Vec<CanonicalEvent>, (String, String)> {
        let mut events = Vec::with_capacity(self.order.len() * 2);
        let ids: Vec<String> = self.order.clone();
        for id in &ids {
            if self.calls.get(id).is_some_and(|s| s.finished) {
                continue;
            }
            events.extend(self.finish_one(id)?);
        }
        Ok(events)
    }

    /// Finalizes a single call by id, e.g. on an explicit
    /// tool-call-end selection (`content_block_stop` in Anthropic's
    /// dialect) rather than waiting for overall stream end. A no-op
    /// (returns an empty vec) if `id` is unknown or already finished.
    pub fn finish_one(&mut self, id: &str) -> Result<Vec<CanonicalEvent>, (String, String)> {
        let Some(state) = self.calls.get_mut(id) else { return Ok(vec![]) };
        if state.finished {
            return Ok(vec![]);
        }
        if !state.buffer.trim().is_empty() {
            if let Err(e) = serde_json::from_str::<serde_json::Value>(&state.buffer) {
                return Err((id.to_string(), format!("tool call '{id}' arguments failed to parse as JSON: {e}")));
            }
        }
        state.finished = true;
        Ok(vec![
            CanonicalEvent::PartialToolCall { id: id.to_string(), args_delta: String::new(), is_complete: true },
            CanonicalEvent::ToolCallEnded { id: id.to_string() },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_single_call_reassembly() {
        let mut acc = Accumulator::new();
        acc.on_tool_call_start("t1", "get_weather");
        acc.on_tool_call_delta("t1", "{\"city\":");
        acc.on_tool_call_delta("t1", "\"Tokyo\"");
        acc.on_tool_call_delta("t1", "}");
        let events = acc.finish().unwrap();
        assert_eq!(
            events,
            vec![
                CanonicalEvent::PartialToolCall { id: "t1".into(), args_delta: String::new(), is_complete: true },
                CanonicalEvent::ToolCallEnded { id: "t1".into() },
            ]
        );
    }

    #[test]
    fn test_malformed_arguments_reported() {
        let mut acc = Accumulator::new();
        acc.on_tool_call_start("t1", "get_weather");
        acc.on_tool_call_delta("t1", "{not json");
        let err = acc.finish().unwrap_err();
        assert_eq!(err.0, "t1");
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut acc = Accumulator::new();
        assert!(acc.on_tool_call_start("t1", "a").is_some());
        assert!(acc.on_tool_call_start("t1", "a").is_none());
    }

    #[test]
    fn test_delta_without_start_synthesizes_one() {
        let mut acc = Accumulator::new();
        let events = acc.on_tool_call_delta("t1", "{}");
        assert!(matches!(&events[0], CanonicalEvent::ToolCallStarted { id, .. } if id == "t1"));
    }

    proptest! {
        #[test]
        fn test_reassembly_concatenates_and_orders_correctly(
            ids in prop::collection::vec("[a-c]", 1..4),
            fragment_seed in prop::collection::vec(0u8..3, 0..20),
        ) {
            let distinct_ids: Vec<String> = {
                let mut seen = HashSet::new();
                ids.iter().filter(|id| seen.insert((*id).clone())).cloned().collect()
            };
            if distinct_ids.is_empty() {
                return Ok(());
            }

            let mut acc = Accumulator::new();
            for id in &distinct_ids {
                acc.on_tool_call_start(id, "tool");
            }

            for seed in &fragment_seed {
                let id = &distinct_ids[*seed as usize % distinct_ids.len()];
                acc.on_tool_call_delta(id, "1");
            }

            let events = acc.finish().unwrap();

            // Every id ends with exactly one PartialToolCall{is_complete:true}
            // followed immediately by exactly one ToolCallEnded, in first-seen order.
            prop_assert_eq!(events.len(), distinct_ids.len() * 2);
            for (i, id) in distinct_ids.iter().enumerate() {
                match &events[i * 2] {
                    CanonicalEvent::PartialToolCall { id: eid, is_complete, .. } => {
                        prop_assert_eq!(eid, id);
                        prop_assert!(*is_complete);
                    }
                    other => prop_assert!(false, "expected PartialToolCall, got {:?}", other),
                }
                match &events[i * 2 + 1] {
                    CanonicalEvent::ToolCallEnded { id: eid } => prop_assert_eq!(eid, id),
                    other => prop_assert!(false, "expected ToolCallEnded, got {:?}", other),
                }
            }
        }
    }
}
