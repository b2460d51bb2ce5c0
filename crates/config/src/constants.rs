//! Centralized constants for the avatar agent
//!
//! Single source of truth for default thresholds, endpoint formats and the
//! compiled-in fallback configuration values.

/// Session timing defaults (milliseconds)
pub mod timeouts {
    /// Auto-reconnect is only attempted within this long after the last user interaction
    pub const RECONNECT_WINDOW_MS: u64 = 300_000;

    /// Silence after which an idle-video session is torn down
    pub const IDLE_DISCONNECT_MS: u64 = 15_000;

    /// Delay between first video frame and marking the session active
    pub const ACTIVATION_GRACE_MS: u64 = 1_000;

    /// Watchdog tick
    pub const WATCHDOG_INTERVAL_MS: u64 = 2_000;

    /// Video clock sampling window for hang detection
    pub const HUNG_SAMPLE_WINDOW_MS: u64 = 2_000;

    /// Upper bound on a connect attempt until video plays
    pub const CONNECT_TIMEOUT_MS: u64 = 30_000;

    /// Completion request timeout (seconds)
    pub const COMPLETION_TIMEOUT_SECS: u64 = 120;
}

/// Service endpoint formats
pub mod endpoints {
    /// Chat completions API version
    pub const COMPLETION_API_VERSION: &str = "2023-06-01-preview";

    /// Default realtime signaling endpoint
    pub const SIGNALING_URL: &str = "https://eastus2.realtimeapi-preview.ai.azure.com/v1/realtimertc";

    /// Default realtime model
    pub const SIGNALING_MODEL: &str = "gpt-4o-realtime-preview-2";

    /// Location of the configuration document
    pub const CONFIG_DOCUMENT: &str = "./config.json";

    /// Persisted key store file
    pub const KEY_STORE_PATH: &str = "./.avatar-agent/keys.json";
}

/// Speech behavior
pub mod speech {
    /// Characters that end a speakable clause (Western and CJK)
    pub const SENTENCE_PUNCTUATION: [&str; 10] =
        [".", "?", "!", ":", ";", "。", "？", "！", "：", "；"];

    /// Spoken while a grounded completion is being prepared
    pub const QUICK_REPLIES: [&str; 3] = ["Let me take a look.", "Let me check.", "One moment, please."];

    /// Trailing silence after a quick reply
    pub const QUICK_REPLY_SILENCE_MS: u64 = 2_000;

    /// SSML document language
    pub const SSML_LANG: &str = "en-US";
}

/// Names of the persisted secret keys (also the environment variable names)
pub mod secrets {
    pub const SPEECH_KEY: &str = "AZURE_SPEECH_API_KEY";
    pub const OPENAI_KEY: &str = "AZURE_OPENAI_API_KEY";
    pub const SEARCH_KEY: &str = "AZURE_SEARCH_API_KEY";
}

/// Compiled-in configuration used when the document is unavailable
pub mod fallback {
    pub const SPEECH_REGION: &str = "swedencentral";
    pub const OPENAI_ENDPOINT: &str = "https://faris-sweden.openai.azure.com/";
    pub const OPENAI_DEPLOYMENT: &str = "gpt-4.1";
    pub const SYSTEM_PROMPT: &str = "You are a Risk and Controls expert that supports various teams from a company to create a risk and controls self-assessment. In order to do that, you have to go through a thorough discussion with the team you are working with to deeply understand the process they are trying to create a risk assessment for. Ask as much questions and follow-up questions as you need until you have a full understanding of the process being discussed. Only ask 1-2 questions at a time when have questions on the process. Only use alphabets, numbers and punctuation in your response. Don't use symbols or markdown in your communication, and don't use short forms or abbreviations.";
    pub const STT_LOCALES: &str = "en-US";
    pub const TTS_VOICE: &str = "en-US-AvaMultilingualNeural";
    pub const AVATAR_CHARACTER: &str = "meg";
    pub const AVATAR_STYLE: &str = "business";
}
