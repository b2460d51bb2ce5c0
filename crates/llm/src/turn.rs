//! Streaming turn driver
//!
//! Feeds a completion body through the parser, pushes sentence units to the
//! observer as they complete, and returns the assembled turn once the stream
//! has ended. Tool calls are only materialized after the terminal chunk.

use futures::StreamExt;

use avatar_agent_core::ToolCall;

use crate::client::ByteStream;
use crate::parser::{ResponseShape, StreamEvent, StreamParser};
use crate::segmenter::SentenceSegmenter;
use crate::tool_calls::ToolCallAccumulator;
use crate::LlmError;

/// Receives incremental output while a turn streams
pub trait TurnObserver: Send {
    /// A speakable sentence unit is ready
    fn on_sentence(&mut self, sentence: String);

    /// Transcript text, flushed once per chunk when display is not aligned with speech
    fn on_display(&mut self, text: String);
}

/// Assembled result of one streamed turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutput {
    /// Concatenation of all content deltas, in order
    pub reply: String,
    /// Last grounding citation payload (grounded shape only)
    pub citations: String,
    /// Completed tool calls in index order
    pub tool_calls: Vec<ToolCall>,
}

struct TurnState<'a> {
    segmenter: SentenceSegmenter,
    accumulator: ToolCallAccumulator,
    output: TurnOutput,
    display: String,
    observer: &'a mut dyn TurnObserver,
}

impl TurnState<'_> {
    fn handle(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Content(token) => {
                self.output.reply.push_str(&token);
                self.display.push_str(&token);
                if let Some(sentence) = self.segmenter.push(&token) {
                    self.observer.on_sentence(sentence);
                }
            }
            StreamEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => self.accumulator.apply(
                index,
                id.as_deref(),
                name.as_deref(),
                arguments.as_deref(),
            ),
            StreamEvent::Citations(content) => self.output.citations = content,
        }
    }

    fn flush_display(&mut self, align_display_with_speech: bool) {
        if !align_display_with_speech && !self.display.is_empty() {
            self.observer.on_display(std::mem::take(&mut self.display));
        }
    }
}

/// Drive one completion body to its end
pub async fn stream_turn(
    mut body: ByteStream,
    shape: ResponseShape,
    align_display_with_speech: bool,
    observer: &mut dyn TurnObserver,
) -> Result<TurnOutput, LlmError> {
    let mut parser = StreamParser::new(shape);
    let mut state = TurnState {
        segmenter: SentenceSegmenter::default(),
        accumulator: ToolCallAccumulator::new(),
        output: TurnOutput::default(),
        display: String::new(),
        observer,
    };

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for event in parser.feed(&chunk) {
            state.handle(event);
        }
        state.flush_display(align_display_with_speech);
    }

    for event in parser.finish() {
        state.handle(event);
    }
    state.flush_display(align_display_with_speech);

    if let Some(residual) = state.segmenter.flush() {
        state.observer.on_sentence(residual);
    }

    let TurnState {
        accumulator,
        mut output,
        ..
    } = state;
    output.tool_calls = accumulator.finish();

    tracing::debug!(
        reply_len = output.reply.len(),
        tool_calls = output.tool_calls.len(),
        parse_errors = parser.parse_errors(),
        "Completion stream finished"
    );

    Ok(output)
}
