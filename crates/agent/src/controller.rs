//! Chat controller
//!
//! Processes one user query at a time: appends it to history, streams the
//! completion while queueing sentences for speech, then resolves any tool
//! calls the model requested. Turns are serialized through the conversation
//! lock, so a second query waits until the current turn has written its
//! history entries.

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use avatar_agent_config::constants::speech::{QUICK_REPLIES, QUICK_REPLY_SILENCE_MS};
use avatar_agent_config::{AppConfig, BehaviorConfig};
use avatar_agent_core::{Message, SpeechActivity, ToolCall};
use avatar_agent_llm::{
    stream_turn, CompletionBackend, CompletionRequest, DataSource, ResponseShape, TurnObserver,
    TurnOutput,
};
use avatar_agent_pipeline::SpeakQueue;
use avatar_agent_tools::ToolExecutor;
use avatar_agent_transport::MediaSession;

use crate::conversation::{Conversation, DocumentContext};
use crate::events::SessionEvent;
use crate::AgentError;

/// Records user interaction for the reconnect eligibility window
pub trait InteractionTracker: Send + Sync {
    fn touch(&self);
}

impl InteractionTracker for MediaSession {
    fn touch(&self) {
        self.touch_interaction();
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub system_prompt: String,
    /// Present when grounding is enabled
    pub data_source: Option<DataSource>,
    pub enable_quick_reply: bool,
    pub align_display_with_speech: bool,
}

impl ControllerConfig {
    pub fn from_config(config: &AppConfig, behavior: &BehaviorConfig) -> Self {
        Self {
            system_prompt: config.azure_openai.system_prompt.clone(),
            data_source: DataSource::from_app_config(config),
            enable_quick_reply: behavior.enable_quick_reply,
            align_display_with_speech: behavior.enable_display_text_alignment_with_speech,
        }
    }

    pub fn is_grounded(&self) -> bool {
        self.data_source.is_some()
    }
}

/// Queues sentences for speech and forwards unaligned display text
struct SpeechObserver {
    queue: SpeakQueue,
    events: broadcast::Sender<SessionEvent>,
}

impl TurnObserver for SpeechObserver {
    fn on_sentence(&mut self, sentence: String) {
        if sentence.trim().is_empty() {
            return;
        }
        self.queue.speak(sentence, 0);
    }

    fn on_display(&mut self, text: String) {
        let _ = self.events.send(SessionEvent::DisplayText { text });
    }
}

/// Why a streamed tool call cannot be executed
fn validate_arguments(arguments: &str) -> Result<(), &'static str> {
    let trimmed = arguments.trim();
    if trimmed.is_empty() {
        return Err("Function arguments are empty or incomplete");
    }
    if !trimmed.starts_with('{') || !trimmed.ends_with('}') {
        return Err("Function arguments do not appear to be complete JSON");
    }
    Ok(())
}

pub struct ChatController {
    conversation: Mutex<Conversation>,
    config: RwLock<ControllerConfig>,
    backend: RwLock<Arc<dyn CompletionBackend>>,
    tools: Arc<dyn ToolExecutor>,
    queue: SpeakQueue,
    interaction: RwLock<Option<Arc<dyn InteractionTracker>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl ChatController {
    pub fn new(
        config: ControllerConfig,
        backend: Arc<dyn CompletionBackend>,
        tools: Arc<dyn ToolExecutor>,
        queue: SpeakQueue,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let conversation = Conversation::new(config.system_prompt.clone(), config.is_grounded());
        Self {
            conversation: Mutex::new(conversation),
            config: RwLock::new(config),
            backend: RwLock::new(backend),
            tools,
            queue,
            interaction: RwLock::new(None),
            events,
        }
    }

    /// Swap configuration and completion backend, e.g. after new keys were saved
    pub async fn reconfigure(&self, config: ControllerConfig, backend: Arc<dyn CompletionBackend>) {
        self.conversation
            .lock()
            .await
            .configure(config.system_prompt.clone(), config.is_grounded());
        *self.config.write() = config;
        *self.backend.write() = backend;
    }

    pub fn set_interaction_tracker(&self, tracker: Option<Arc<dyn InteractionTracker>>) {
        *self.interaction.write() = tracker;
    }

    fn touch(&self) {
        if let Some(tracker) = self.interaction.read().as_ref() {
            tracker.touch();
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Initialize history the first time a session connects
    pub async fn ensure_history(&self) {
        if self.conversation.lock().await.ensure_initialized() {
            tracing::debug!("Conversation history initialized");
        }
    }

    /// Reset history to the system prompt
    pub async fn clear_history(&self) {
        self.touch();
        self.conversation.lock().await.init_messages();
        tracing::info!("Conversation history cleared");
    }

    pub async fn set_document(&self, document: Option<DocumentContext>) {
        match &document {
            Some(doc) => tracing::info!(file = %doc.file_name, chars = doc.text.len(), "Document context set"),
            None => tracing::info!("Document context cleared"),
        }
        self.conversation.lock().await.set_document(document);
    }

    pub async fn history(&self) -> Vec<Message> {
        self.conversation.lock().await.messages().to_vec()
    }

    /// Run one conversational turn
    ///
    /// Completion failures are reported as a status event and returned;
    /// tool failures are recorded in history and never fail the turn.
    pub async fn handle_user_query(
        &self,
        text: &str,
        image_url: Option<&str>,
    ) -> Result<(), AgentError> {
        self.touch();
        let mut conversation = self.conversation.lock().await;
        conversation.ensure_initialized();

        let message = match image_url.map(str::trim).filter(|url| !url.is_empty()) {
            Some(url) => Message::user_with_image(text, url),
            None => Message::user(text),
        };
        conversation.push(message);
        self.emit(SessionEvent::UserMessage {
            text: text.to_string(),
        });

        if self.queue.is_speaking() {
            self.queue.stop().await;
        }

        let config = self.config.read().clone();
        let grounded = config.is_grounded();
        if grounded && config.enable_quick_reply {
            let mut rng = rand::thread_rng();
            if let Some(reply) = QUICK_REPLIES.choose(&mut rng) {
                self.queue.speak(*reply, QUICK_REPLY_SILENCE_MS);
            }
        }

        let mut request =
            CompletionRequest::new(conversation.messages().to_vec(), self.tools.definitions());
        if let Some(source) = config.data_source.clone() {
            request = request.with_data_sources(vec![source]);
        }
        let shape = if grounded {
            ResponseShape::Grounded
        } else {
            ResponseShape::Standard
        };

        let mut observer = SpeechObserver {
            queue: self.queue.clone(),
            events: self.events.clone(),
        };
        let backend = self.backend.read().clone();
        let result = match backend.stream_completion(&request).await {
            Ok(body) => {
                stream_turn(body, shape, config.align_display_with_speech, &mut observer).await
            }
            Err(e) => Err(e),
        };

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, "Completion failed");
                self.emit(SessionEvent::status(format!("❌ {}", e)));
                return Err(e.into());
            }
        };

        self.record_turn(&mut conversation, output, grounded).await;
        Ok(())
    }

    async fn record_turn(&self, conversation: &mut Conversation, output: TurnOutput, grounded: bool) {
        let TurnOutput {
            reply,
            citations,
            tool_calls,
        } = output;

        if !tool_calls.is_empty() {
            conversation.push(Message::assistant_tool_calls(reply, tool_calls.clone()));
            for call in &tool_calls {
                let content = self.run_tool_call(call).await;
                conversation.push(Message::tool_result(call.id.clone(), content));
            }
            return;
        }

        if grounded {
            conversation.push(Message::citations(citations));
        }
        conversation.push(Message::assistant(reply));
    }

    async fn run_tool_call(&self, call: &ToolCall) -> String {
        let name = &call.function.name;
        if let Err(reason) = validate_arguments(&call.function.arguments) {
            tracing::warn!(tool = %name, arguments = %call.function.arguments, reason, "Tool call rejected");
            metrics::counter!("avatar_tool_calls_total", "outcome" => "rejected").increment(1);
            self.emit(SessionEvent::ToolMarker {
                text: format!("❌ Function execution failed: {}", reason),
                success: false,
            });
            return format!("Error executing function: {}", reason);
        }

        tracing::info!(tool = %name, "Executing tool call");
        let result = self.tools.execute(name, &call.function.arguments).await;
        self.emit(SessionEvent::ToolMarker {
            text: format!("🔧 Function executed: {}", name),
            success: true,
        });
        result
    }
}
