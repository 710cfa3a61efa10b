//! User-facing text: reply shaping, the system instruction, and the fixed
//! notices the relay posts on the user's behalf.

use std::borrow::Cow;

/// Longest reply the relay posts, in characters.
pub const MESSAGE_LIMIT: usize = 4000;

/// Headroom subtracted from [`MESSAGE_LIMIT`] when asking the model to stay short.
pub const SYSTEM_PROMPT_BUFFER: usize = 200;

/// Appended to a reply that had to be cut.
pub const TRUNCATION_MARKER: &str = "... (response truncated)";

const SHORT_MARKER: &str = "...";

/// Placeholder posted while the model is working.
pub const THINKING: &str = "🤔 Bot is thinking...";

/// Posted to the channel when the placeholder itself could not be sent.
pub const PLACEHOLDER_FAILED: &str = "😭 Sorry, something went wrong before I could think!";

/// Posted when no conversation could be created for the author.
pub const SESSION_APOLOGY: &str =
    "😭 Sorry, I couldn't initialize a chat session for you right now.";

/// Replaces the reply when the model call failed.
pub const ERROR_APOLOGY: &str =
    "😭 Sorry, I encountered an error while processing your request. Please try again.";

/// Replaces the reply when the model answered with nothing usable.
pub const EMPTY_APOLOGY: &str =
    "😭 I'm sorry, I couldn't generate a response. Please try rephrasing.";

/// Last-resort notice when neither editing nor replying worked.
pub const DELIVERY_FAILED: &str =
    "😭 I tried to respond. The content might be too long or invalid.";

/// Fit `text` within `limit` characters.
///
/// Text that already fits is returned unchanged. Longer text is cut and
/// suffixed with [`TRUNCATION_MARKER`], or with `...` when the limit is too
/// small for the marker, or cut bare when even that does not fit.
pub fn shape_reply(text: &str, limit: usize) -> Cow<'_, str> {
    if text.chars().count() <= limit {
        return Cow::Borrowed(text);
    }

    let suffix = [TRUNCATION_MARKER, SHORT_MARKER]
        .into_iter()
        .find(|marker| marker.chars().count() <= limit)
        .unwrap_or("");
    let keep = limit - suffix.chars().count();

    let mut shaped: String = text.chars().take(keep).collect();
    shaped.push_str(suffix);
    Cow::Owned(shaped)
}

/// System instruction given to every new conversation.
pub fn system_instruction(bot_name: &str, message_limit: usize) -> String {
    let target = message_limit.saturating_sub(SYSTEM_PROMPT_BUFFER);
    format!(
        "You are a helpful assistant on a Discord server. Your name is {bot_name}. \
         Please keep your answers very concise and to the point, specifically for Discord messages. \
         Aim for responses well under {target} characters. \
         If a topic is complex, provide a summary or the most critical information. \
         Avoid lengthy explanations unless explicitly asked to elaborate and even then, \
         be mindful of message limits."
    )
}
