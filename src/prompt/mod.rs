//! Prompt Builder
//!
//! Turns a resolved [`JobShape`] into the message list sent to the backend.
//!
//! - raw message lists go out verbatim
//! - assistant context plus a job-supplied system prompt become three
//!   messages: assistant, system, user
//! - everything else is folded into a single user message

pub mod schemas;

use crate::queue::jobs::JobShape;
use crate::types::LLMMessage;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert financial news editor with a sense of humour. \
Ignore any text about cookies or website errors. \
Be precise with names, tickers and numbers, and never invent facts that are not in the text.";

/// Extra instructions for the structured extraction pass.
pub const STRUCTURED_INSTRUCTIONS: &str = "From the following text, clean it. \
No markdown on gif_keywords, find a funny list of keywords appropriate to the text to find an image that represents the text, and meme related. \
If there is a company, evaluate the sentiment in the stock market for the company involved. \
Write a bullshit to no bullshit field as described.";

const TRANSLATION_INSTRUCTIONS: &str = "As an expert native and professional translator, \
transcribe the following text adjusted to the locale required:";

/// Build the message list for `shape`.
///
/// `job_system` is the job's own `system` field; `default_system` is used
/// when the job does not supply one.
pub fn build_messages(
    shape: &JobShape,
    job_system: Option<&str>,
    default_system: &str,
) -> Vec<LLMMessage> {
    match shape {
        JobShape::Raw { messages, .. } => messages.clone(),
        JobShape::Translation { text } => {
            vec![LLMMessage::user(format!("{}\n\n{}", TRANSLATION_INSTRUCTIONS, text))]
        }
        JobShape::Legacy {
            assistant,
            user,
            structured,
        } => {
            let mut system = job_system.unwrap_or(default_system).to_string();
            if *structured {
                if !system.is_empty() {
                    system.push(' ');
                }
                system.push_str(STRUCTURED_INSTRUCTIONS);
            }

            if !assistant.is_empty() && job_system.is_some() {
                vec![
                    LLMMessage::assistant(assistant.as_str()),
                    LLMMessage::system(system),
                    LLMMessage::user(user.as_str()),
                ]
            } else {
                let content = [assistant.as_str(), system.as_str(), user.as_str()]
                    .into_iter()
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                vec![LLMMessage::user(content)]
            }
        }
    }
}

/// Flatten messages into one prompt string for text-only backends:
/// one `role: content` line per message.
pub fn flatten_messages(messages: &[LLMMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}\n", m.role, m.content))
        .collect()
}
