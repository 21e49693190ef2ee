//! The per-request streaming pipeline: `Decoder -> Selector -> Accumulator
//! -> FanOut -> EventMapper`, turning a raw byte stream into the canonical
//! event sequence callers consume.
//!
//! One [`Pipeline`] is exclusively owned by a single in-flight request;
//! none of its operators are shared or reused across requests.

pub mod accumulator;
pub mod decoder;
pub mod fanout;
pub mod mapper;
pub mod selector;

pub use accumulator::Accumulator;
pub use decoder::{DecodeOutcome, Decoder};
pub use fanout::FanOut;
pub use mapper::{map_non_streaming_response, map_stream_error, EventMapper};
pub use selector::Selector;

use crate::cancellation::CancelToken;
use crate::error::ErrorKind;
use crate::manifest::schema::StreamingConfig;
use crate::transport::ByteStream;
use crate::types::event::CanonicalEvent;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;

/// Assembles the full operator chain for one request and drives a byte
/// stream through it, yielding [`CanonicalEvent`]s in arrival order.
pub struct Pipeline {
    decoder: Decoder,
    mapper: EventMapper,
    accumulator: Accumulator,
    fanout: FanOut,
    cancel: CancelToken,
}

impl Pipeline {
    /// Builds a pipeline for the given manifest streaming config. Fan-out
    /// is always disabled by default (candidate-0 only); see `DESIGN.md`
    /// for why non-streaming and default-streaming both pin to candidate 0.
    #[must_use]
    pub fn new(config: &StreamingConfig, cancel: CancelToken) -> Self {
        Self {
            decoder: Decoder::new(config.decoder),
            mapper: EventMapper::for_streaming_config(config),
            accumulator: Accumulator::new(),
            fanout: FanOut::new(config.fan_out_path.as_deref(), false),
            cancel,
        }
    }

    /// Consumes `byte_stream`, producing the canonical event sequence.
    /// Terminates after exactly one terminal event (`StreamEnd` or
    /// `StreamError`), per the pipeline's output-alphabet contract.
    pub fn run(self, byte_stream: ByteStream) -> impl Stream<Item = CanonicalEvent> {
        let state = PipelineState {
            decoder: self.decoder,
            mapper: self.mapper,
            accumulator: self.accumulator,
            fanout: self.fanout,
            cancel: self.cancel,
            byte_stream,
            pending: VecDeque::new(),
            done: false,
        };
        futures::stream::unfold(state, drive_one_step)
    }
}

struct PipelineState {
    decoder: Decoder,
    mapper: EventMapper,
    accumulator: Accumulator,
    fanout: FanOut,
    cancel: CancelToken,
    byte_stream: ByteStream,
    pending: VecDeque<CanonicalEvent>,
    done: bool,
}

async fn drive_one_step(mut state: PipelineState) -> Option<(CanonicalEvent, PipelineState)> {
    loop {
        if let Some(event) = state.pending.pop_front() {
            return Some((event, state));
        }
        if state.done {
            return None;
        }
        if state.cancel.is_cancelled() {
            state.done = true;
            return Some((
                map_stream_error(ErrorKind::Cancelled, "cancelled by caller"),
                state,
            ));
        }

        let next = tokio::select! {
            biased;
            () = state.cancel.cancelled() => {
                state.done = true;
                return Some((map_stream_error(ErrorKind::Cancelled, "cancelled by caller"), state));
            }
            next = state.byte_stream.next() => next,
        };

        match next {
            None => {
                finalize_on_stream_close(&mut state);
            }
            Some(Err(core_err)) => {
                state.done = true;
                state.pending.push_back(map_stream_error(core_err.kind(), core_err.to_string()));
            }
            Some(Ok(bytes)) => {
                let outcome = state.decoder.feed(&bytes);
                apply_decode_outcome(&mut state, outcome);
            }
        }
    }
}

fn apply_decode_outcome(state: &mut PipelineState, outcome: DecodeOutcome) {
    match outcome {
        DecodeOutcome::Malformed(message) => {
            state.done = true;
            state.pending.push_back(map_stream_error(ErrorKind::ServerError, message));
        }
        DecodeOutcome::Frames(frames) => {
            map_frames_into_pending(state, frames);
        }
        DecodeOutcome::Done(frames) => {
            map_frames_into_pending(state, frames);
            if !state.done {
                finalize_on_stream_close(state);
            }
        }
    }
}

fn map_frames_into_pending(state: &mut PipelineState, frames: Vec<decoder::DecodedFrame>) {
    for frame in frames {
        if state.done {
            break;
        }
        for candidate in state.fanout.expand(&frame.value) {
            if candidate.candidate_index != 0 {
                continue;
            }
            let candidate_frame = decoder::DecodedFrame { event_name: frame.event_name.clone(), value: candidate.value };
            match state.mapper.map_frame(&candidate_frame, &mut state.accumulator) {
                Ok(events) => {
                    let saw_terminal = events.iter().any(CanonicalEvent::is_terminal);
                    state.pending.extend(events);
                    if saw_terminal {
                        state.done = true;
                    }
                }
                Err((_id, message)) => {
                    state.done = true;
                    state.pending.push_back(map_stream_error(ErrorKind::ServerError, message));
                }
            }
        }
    }
}

fn finalize_on_stream_close(state: &mut PipelineState) {
    state.done = true;
    match state.accumulator.finish() {
        Ok(events) => {
            state.pending.extend(events);
        }
        Err((_id, message)) => {
            state.pending.push_back(map_stream_error(ErrorKind::ServerError, message));
            return;
        }
    }
    if !state.pending.iter().any(CanonicalEvent::is_terminal) {
        state.pending.push_back(CanonicalEvent::StreamEnd { finish_reason: "stop".to_string() });
    }
}
