//! Accumulation of streamed tool-call fragments

use avatar_agent_core::ToolCall;
use std::collections::BTreeMap;

/// Partially assembled call; strings only ever grow by append
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Index-keyed accumulator, created empty per turn
///
/// Calls are handed out only through [`ToolCallAccumulator::finish`], which
/// the turn driver invokes after the terminal stream event.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, PendingToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment into the entry for `index`
    pub fn apply(
        &mut self,
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) {
        let entry = self.calls.entry(index).or_default();
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            entry.id = id.to_string();
        }
        if let Some(name) = name {
            entry.name.push_str(name);
        }
        if let Some(arguments) = arguments {
            entry.arguments.push_str(arguments);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn get(&self, index: u32) -> Option<&PendingToolCall> {
        self.calls.get(&index)
    }

    /// Completed calls in index order
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_values()
            .map(|c| ToolCall::new(c.id, c.name, c.arguments))
            .collect()
    }
}
