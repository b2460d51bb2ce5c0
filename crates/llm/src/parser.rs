//! Incremental parser for streamed chat completion bodies
//!
//! The response arrives as `data: {json}` events separated by blank lines,
//! split across arbitrary byte chunks. [`StreamParser::feed`] keeps the
//! unterminated tail of each chunk and prepends it to the next one, so an
//! event (or a multi-byte character) straddling two reads is parsed once,
//! whole.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// Inline grounding citation markers, including the whitespace before them
static CITATION_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\[doc\d+\]").expect("valid regex"));

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

/// Which response layout the endpoint produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `choices[0].delta` with `content` or `tool_calls`
    Standard,
    /// `choices[0].messages[0].delta` with a role; `tool` carries citations
    Grounded,
}

/// One classified delta
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Assistant text token
    Content(String),
    /// Fragment of a tool call at `index`
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
    /// Grounding citation payload (grounded shape only)
    Citations(String),
}

#[derive(Debug, Deserialize)]
struct StandardChunk {
    #[serde(default)]
    choices: Vec<StandardChoice>,
}

#[derive(Debug, Deserialize)]
struct StandardChoice {
    #[serde(default)]
    delta: Option<StandardDelta>,
}

#[derive(Debug, Deserialize)]
struct StandardDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionFragment>,
}

#[derive(Debug, Deserialize)]
struct FunctionFragment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroundedChunk {
    #[serde(default)]
    choices: Vec<GroundedChoice>,
}

#[derive(Debug, Deserialize)]
struct GroundedChoice {
    #[serde(default)]
    messages: Vec<GroundedMessage>,
}

#[derive(Debug, Deserialize)]
struct GroundedMessage {
    #[serde(default)]
    delta: Option<GroundedDelta>,
}

#[derive(Debug, Deserialize)]
struct GroundedDelta {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// Remove `[docN]` markers from grounded content
pub fn strip_citations(text: &str) -> String {
    if !text.contains("[doc") {
        return text.to_string();
    }
    CITATION_MARKER.replace_all(text, "").trim().to_string()
}

/// Stateful `feed(bytes) -> events` parser
#[derive(Debug)]
pub struct StreamParser {
    shape: ResponseShape,
    carry: Vec<u8>,
    parse_errors: usize,
}

impl StreamParser {
    pub fn new(shape: ResponseShape) -> Self {
        Self {
            shape,
            carry: Vec::new(),
            parse_errors: 0,
        }
    }

    pub fn shape(&self) -> ResponseShape {
        self.shape
    }

    /// Malformed lines skipped so far
    pub fn parse_errors(&self) -> usize {
        self.parse_errors
    }

    /// Consume one physical chunk, returning events completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.carry
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = find_event_end(&self.carry) {
            let block: Vec<u8> = self.carry.drain(..end + 2).collect();
            self.parse_block(&block[..end], &mut events);
        }
        events
    }

    /// Flush a trailing event that was never terminated by a blank line
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.carry.is_empty() {
            let block = std::mem::take(&mut self.carry);
            self.parse_block(&block, &mut events);
        }
        events
    }

    fn parse_block(&mut self, block: &[u8], events: &mut Vec<StreamEvent>) {
        let text = String::from_utf8_lossy(block);
        for line in text.lines() {
            let line = line.trim();
            if !line.starts_with(DATA_PREFIX) || line.ends_with(DONE_MARKER) {
                continue;
            }
            let payload = line[DATA_PREFIX.len()..].trim();
            let parsed = match self.shape {
                ResponseShape::Standard => Self::parse_standard(payload, events),
                ResponseShape::Grounded => Self::parse_grounded(payload, events),
            };
            if let Err(e) = parsed {
                self.parse_errors += 1;
                metrics::counter!("avatar_stream_parse_errors_total").increment(1);
                tracing::warn!(error = %e, line = %line, "Skipping malformed stream line");
            }
        }
    }

    fn parse_standard(
        payload: &str,
        events: &mut Vec<StreamEvent>,
    ) -> Result<(), serde_json::Error> {
        let chunk: StandardChunk = serde_json::from_str(payload)?;
        let Some(delta) = chunk.choices.into_iter().next().and_then(|c| c.delta) else {
            return Ok(());
        };

        match delta.tool_calls {
            Some(fragments) => {
                for fragment in fragments {
                    let (name, arguments) = match fragment.function {
                        Some(f) => (f.name, f.arguments),
                        None => (None, None),
                    };
                    events.push(StreamEvent::ToolCallDelta {
                        index: fragment.index,
                        id: fragment.id,
                        name,
                        arguments,
                    });
                }
            }
            None => {
                if let Some(content) = delta.content {
                    if !content.is_empty() {
                        events.push(StreamEvent::Content(content));
                    }
                }
            }
        }
        Ok(())
    }

    fn parse_grounded(
        payload: &str,
        events: &mut Vec<StreamEvent>,
    ) -> Result<(), serde_json::Error> {
        let chunk: GroundedChunk = serde_json::from_str(payload)?;
        let Some(delta) = chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.messages.into_iter().next())
            .and_then(|m| m.delta)
        else {
            return Ok(());
        };

        let Some(content) = delta.content else {
            return Ok(());
        };

        if delta.role.as_deref() == Some("tool") {
            events.push(StreamEvent::Citations(content));
            return Ok(());
        }

        let token = strip_citations(&content);
        if !token.is_empty() && token != DONE_MARKER {
            events.push(StreamEvent::Content(token));
        }
        Ok(())
    }
}

fn find_event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_line(token: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": token}}]})
        )
    }

    fn grounded_line(role: &str, content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"messages": [{"delta": {"role": role, "content": content}}]}]})
        )
    }

    #[test]
    fn test_event_split_across_chunks() {
        let body = content_line("Hello");
        let (a, b) = body.split_at(17);
        let mut parser = StreamParser::new(ResponseShape::Standard);
        assert!(parser.feed(a.as_bytes()).is_empty());
        assert_eq!(
            parser.feed(b.as_bytes()),
            vec![StreamEvent::Content("Hello".to_string())]
        );
    }

    #[test]
    fn test_multiple_events_in_one_chunk() {
        let body = format!("{}{}data: [DONE]\n\n", content_line("a"), content_line("b"));
        let mut parser = StreamParser::new(ResponseShape::Standard);
        assert_eq!(
            parser.feed(body.as_bytes()),
            vec![
                StreamEvent::Content("a".to_string()),
                StreamEvent::Content("b".to_string())
            ]
        );
        assert_eq!(parser.parse_errors(), 0);
    }

    #[test]
    fn test_multibyte_character_split() {
        let body = content_line("你好。");
        let bytes = body.as_bytes();
        // Split inside the first CJK character
        let split = body.find('你').unwrap() + 1;
        let mut parser = StreamParser::new(ResponseShape::Standard);
        assert!(parser.feed(&bytes[..split]).is_empty());
        assert_eq!(
            parser.feed(&bytes[split..]),
            vec![StreamEvent::Content("你好。".to_string())]
        );
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let body = format!("data: {{oops\n\n{}", content_line("ok"));
        let mut parser = StreamParser::new(ResponseShape::Standard);
        assert_eq!(
            parser.feed(body.as_bytes()),
            vec![StreamEvent::Content("ok".to_string())]
        );
        assert_eq!(parser.parse_errors(), 1);
    }

    #[test]
    fn test_non_data_lines_discarded() {
        let body = format!(": keep-alive\nevent: ping\n\n{}", content_line("x"));
        let mut parser = StreamParser::new(ResponseShape::Standard);
        assert_eq!(parser.feed(body.as_bytes()).len(), 1);
    }

    #[test]
    fn test_tool_call_fragments() {
        let body = "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"createMermaid\",\"arguments\":\"\"}}]}}]}\n\n";
        let mut parser = StreamParser::new(ResponseShape::Standard);
        assert_eq!(
            parser.feed(body.as_bytes()),
            vec![StreamEvent::ToolCallDelta {
                index: 0,
                id: Some("call_1".to_string()),
                name: Some("createMermaid".to_string()),
                arguments: Some(String::new()),
            }]
        );
    }

    #[test]
    fn test_empty_choices_ignored() {
        let body = "data: {\"choices\":[],\"prompt_filter_results\":[]}\n\n";
        let mut parser = StreamParser::new(ResponseShape::Standard);
        assert!(parser.feed(body.as_bytes()).is_empty());
        assert_eq!(parser.parse_errors(), 0);
    }

    #[test]
    fn test_citation_markers_stripped() {
        let mut parser = StreamParser::new(ResponseShape::Grounded);
        let events = parser.feed(grounded_line("assistant", "See [doc1] for details [doc2].").as_bytes());
        assert_eq!(events, vec![StreamEvent::Content("See for details.".to_string())]);
    }

    #[test]
    fn test_grounded_tool_role_carries_citations() {
        let mut parser = StreamParser::new(ResponseShape::Grounded);
        let mut body = grounded_line("tool", "{\"citations\":[]}");
        body.push_str(&grounded_line("assistant", " [doc3]"));
        body.push_str(&grounded_line("assistant", " more"));
        assert_eq!(
            parser.feed(body.as_bytes()),
            vec![
                StreamEvent::Citations("{\"citations\":[]}".to_string()),
                StreamEvent::Content(" more".to_string()),
            ]
        );
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let body = content_line("tail");
        let mut parser = StreamParser::new(ResponseShape::Standard);
        assert!(parser.feed(body.trim_end().as_bytes()).is_empty());
        assert_eq!(parser.finish(), vec![StreamEvent::Content("tail".to_string())]);
    }
}
