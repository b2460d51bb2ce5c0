//! Conversation history
//!
//! Owned by the chat controller and mutated only from inside a turn. The
//! system message is present only for ungrounded conversations; grounded
//! requests carry the prompt as the data source's role information instead.

use avatar_agent_core::Message;

/// Background material appended to the system prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentContext {
    pub file_name: String,
    pub text: String,
}

impl DocumentContext {
    pub fn new(file_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            text: text.into(),
        }
    }

    fn render(&self) -> Option<String> {
        if self.text.trim().is_empty() {
            return None;
        }
        Some(format!(
            "\n\n--- BACKGROUND CONTEXT FROM PDF ---\nThe following content has been extracted from the uploaded PDF file \"{}\" and should be used as background context for your responses:\n\n{}\n\n--- END OF PDF CONTEXT ---\n\nUse this information as background knowledge to understand the process before generating any questions.",
            self.file_name, self.text
        ))
    }
}

#[derive(Debug, Clone)]
pub struct Conversation {
    system_prompt: String,
    grounded: bool,
    document: Option<DocumentContext>,
    messages: Vec<Message>,
    started: bool,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>, grounded: bool) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            grounded,
            document: None,
            messages: Vec::new(),
            started: false,
        }
    }

    /// Update prompt and grounding for the next initialization
    pub fn configure(&mut self, system_prompt: impl Into<String>, grounded: bool) {
        self.system_prompt = system_prompt.into();
        self.grounded = grounded;
    }

    /// Reset history to its initial state
    pub fn init_messages(&mut self) {
        self.messages.clear();
        if !self.grounded {
            let mut prompt = self.system_prompt.clone();
            if let Some(context) = self.document.as_ref().and_then(DocumentContext::render) {
                prompt.push_str(&context);
            }
            self.messages.push(Message::system(prompt));
        }
        self.started = true;
    }

    /// Initialize on first use only
    ///
    /// Returns whether initialization happened.
    pub fn ensure_initialized(&mut self) -> bool {
        if self.started {
            return false;
        }
        self.init_messages();
        true
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Replace the document context; a started conversation is re-initialized
    pub fn set_document(&mut self, document: Option<DocumentContext>) {
        self.document = document;
        if self.started {
            self.init_messages();
        }
    }

    pub fn document(&self) -> Option<&DocumentContext> {
        self.document.as_ref()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
