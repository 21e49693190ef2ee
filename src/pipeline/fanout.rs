//! Expands multi-candidate provider responses (e.g. `choices[]`) into
//! per-candidate frame streams.
//!
//! By default the pipeline only ever looks at candidate 0; a caller must
//! explicitly opt in to fan-out to receive events for other candidates.
//! Non-streaming responses never fan out (see `EventMapper`'s candidate-0
//! default), matching the resolved Open Question in `DESIGN.md`.

use crate::pipeline::selector::Selector;
use serde_json::Value;

/// A single candidate's slice of a decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFrame {
    /// Index into the fanned-out array this slice came from.
    pub candidate_index: usize,
    /// The candidate's own sub-value.
    pub value: Value,
}

/// Splits a frame into per-candidate slices using the manifest's
/// `fan_out_path`, or treats the whole frame as a single candidate 0 when
/// no fan-out path is declared or the caller did not request fan-out.
pub struct FanOut {
    path: Option<Selector>,
    enabled: bool,
}

impl FanOut {
    /// Creates a FanOut operator. `enabled` mirrors whether the caller
    /// requested multi-candidate fan-out for this request; when `false`,
    /// [`Self::expand`] always yields exactly the candidate-0 slice.
    #[must_use]
    pub fn new(fan_out_path: Option<&str>, enabled: bool) -> Self {
        Self { path: fan_out_path.and_then(Selector::parse), enabled }
    }

    /// Expands `frame` into one or more candidate slices, in ascending
    /// candidate-index order. When fan-out is disabled, the whole frame
    /// passes through unchanged as candidate 0 regardless of whether a
    /// `fan_out_path` is configured — the rest of the pipeline (in
    /// particular any frame-relative `content_path`) always sees the
    /// original frame, never a candidate-array element, unless fan-out is
    /// actually enabled.
    #[must_use]
    pub fn expand(&self, frame: &Value) -> Vec<CandidateFrame> {
        if !self.enabled {
            return vec![CandidateFrame { candidate_index: 0, value: frame.clone() }];
        }

        let Some(selector) = &self.path else {
            return vec![CandidateFrame { candidate_index: 0, value: frame.clone() }];
        };
        let Some(Value::Array(candidates)) = selector.evaluate(frame) else {
            return vec![CandidateFrame { candidate_index: 0, value: frame.clone() }];
        };

        candidates
            .iter()
            .enumerate()
            .map(|(index, value)| CandidateFrame { candidate_index: index, value: value.clone() })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_fan_out_path_yields_whole_frame_as_candidate_zero() {
        let fanout = FanOut::new(None, true);
        let frame = json!({"delta": "hi"});
        let candidates = fanout.expand(&frame);
        assert_eq!(candidates, vec![CandidateFrame { candidate_index: 0, value: frame }]);
    }

    #[test]
    fn test_disabled_fan_out_passes_whole_frame_through() {
        let fanout = FanOut::new(Some("$.choices"), false);
        let frame = json!({"choices": [{"text": "a"}, {"text": "b"}]});
        let candidates = fanout.expand(&frame);
        assert_eq!(candidates, vec![CandidateFrame { candidate_index: 0, value: frame }]);
    }

    #[test]
    fn test_disabled_fan_out_does_not_drop_frame_relative_fields() {
        let fanout = FanOut::new(Some("$.choices"), false);
        let frame = json!({"choices": [{"text": "a"}], "delta": {"content": "hi"}});
        let candidates = fanout.expand(&frame);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].value["delta"]["content"], "hi");
    }

    #[test]
    fn test_enabled_fan_out_expands_all_candidates() {
        let fanout = FanOut::new(Some("$.choices"), true);
        let frame = json!({"choices": [{"text": "a"}, {"text": "b"}]});
        let candidates = fanout.expand(&frame);
        assert_eq!(
            candidates,
            vec![
                CandidateFrame { candidate_index: 0, value: json!({"text": "a"}) },
                CandidateFrame { candidate_index: 1, value: json!({"text": "b"}) },
            ]
        );
    }

    #[test]
    fn test_empty_candidate_array_still_passes_whole_frame_through_when_disabled() {
        let fanout = FanOut::new(Some("$.choices"), false);
        let frame = json!({"choices": []});
        assert_eq!(fanout.expand(&frame), vec![CandidateFrame { candidate_index: 0, value: frame }]);
    }

    #[test]
    fn test_empty_candidate_array_yields_nothing_when_enabled() {
        let fanout = FanOut::new(Some("$.choices"), true);
        let frame = json!({"choices": []});
        assert!(fanout.expand(&frame).is_empty());
    }
}
