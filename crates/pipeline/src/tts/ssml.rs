//! SSML documents for the avatar voice

use avatar_agent_config::constants::speech::SSML_LANG;

/// Escape text for embedding in markup
pub fn html_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wrap `text` for `voice` with no leading silence and optional trailing silence
pub fn build_ssml(voice: &str, text: &str, trailing_silence_ms: u64) -> String {
    let trailing = if trailing_silence_ms > 0 {
        format!("<break time='{}ms' />", trailing_silence_ms)
    } else {
        String::new()
    };
    format!(
        "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xmlns:mstts='http://www.w3.org/2001/mstts' xml:lang='{}'><voice name='{}'><mstts:leadingsilence-exact value='0'/>{}{}</voice></speak>",
        SSML_LANG,
        voice,
        html_encode(text),
        trailing
    )
}
