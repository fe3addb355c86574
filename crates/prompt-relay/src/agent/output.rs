//! Output segments streamed back to the chat surface.
//!
//! A turn produces an ordered list of [`OutputSegment`]s. Hosts either
//! render them individually with [`OutputSegment::render`] or join a whole
//! turn with [`render_segments`].

use crate::EnhancementData;
use crate::error::{EnhanceError, ErrorKind};
use serde::Serialize;

/// Maximum number of suggestions shown per turn.
pub const MAX_DISPLAYED_SUGGESTIONS: usize = 5;

/// One piece of chat output.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputSegment {
    /// Relay disabled: the original prompt, marked as unenhanced.
    Passthrough { prompt: String },
    /// The server's rewritten prompt.
    EnhancedPrompt { text: String },
    /// The server accepted the prompt but had nothing to add.
    Unchanged { prompt: String },
    /// Extra context the server attached.
    AdditionalContext { text: String },
    /// Follow-up suggestions, already capped.
    Suggestions { items: Vec<String> },
    /// Raw response metadata (debug logging only).
    Metadata { value: serde_json::Value },
    /// Fixed explanation for a failed turn.
    Error {
        kind: ErrorKind,
        message: String,
        detail: String,
    },
    /// The original prompt shown after a failure.
    Fallback { prompt: String },
}

impl OutputSegment {
    /// Render as Markdown.
    pub fn render(&self) -> String {
        match self {
            OutputSegment::Passthrough { prompt } => {
                format!(
                    "{prompt}\n\n_(prompt enhancement is disabled; showing the original prompt)_"
                )
            }
            OutputSegment::EnhancedPrompt { text } => format!("**Enhanced prompt:**\n\n{text}"),
            OutputSegment::Unchanged { prompt } => {
                format!("{prompt}\n\n_(no changes suggested)_")
            }
            OutputSegment::AdditionalContext { text } => {
                format!("**Additional context:**\n\n{text}")
            }
            OutputSegment::Suggestions { items } => {
                let list: Vec<String> = items
                    .iter()
                    .enumerate()
                    .map(|(i, s)| format!("{}. {s}", i + 1))
                    .collect();
                format!("**Suggestions:**\n{}", list.join("\n"))
            }
            OutputSegment::Metadata { value } => {
                let pretty =
                    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
                format!("**Response metadata:**\n```json\n{pretty}\n```")
            }
            OutputSegment::Error {
                message, detail, ..
            } => {
                if detail.is_empty() || detail == message {
                    format!("> {message}")
                } else {
                    format!("> {message}\n>\n> _Details: {detail}_")
                }
            }
            OutputSegment::Fallback { prompt } => format!("**Original prompt:**\n\n{prompt}"),
        }
    }
}

/// Join a turn's segments into one Markdown document.
pub fn render_segments(segments: &[OutputSegment]) -> String {
    segments
        .iter()
        .map(OutputSegment::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Segments for a successful enhancement, in display order.
///
/// Never empty: a success with nothing new to show yields
/// [`OutputSegment::Unchanged`] carrying the original prompt.
pub fn success_segments(
    original: &str,
    data: &EnhancementData,
    verbose: bool,
) -> Vec<OutputSegment> {
    let mut segments = Vec::new();

    if let Some(enhanced) = &data.enhanced_prompt
        && enhanced != original
    {
        segments.push(OutputSegment::EnhancedPrompt {
            text: enhanced.clone(),
        });
    }

    if let Some(context) = &data.additional_context {
        segments.push(OutputSegment::AdditionalContext {
            text: context.clone(),
        });
    }

    if !data.suggestions.is_empty() {
        segments.push(OutputSegment::Suggestions {
            items: data
                .suggestions
                .iter()
                .take(MAX_DISPLAYED_SUGGESTIONS)
                .cloned()
                .collect(),
        });
    }

    if segments.is_empty() {
        segments.push(OutputSegment::Unchanged {
            prompt: original.to_string(),
        });
    }

    if verbose && let Some(metadata) = &data.metadata {
        segments.push(OutputSegment::Metadata {
            value: metadata.clone(),
        });
    }

    segments
}

/// Segments for a failed turn: the fixed template, then the original prompt.
pub fn failure_segments(original: &str, error: &EnhanceError) -> Vec<OutputSegment> {
    vec![
        OutputSegment::Error {
            kind: error.kind,
            message: error.user_message().to_string(),
            detail: error.message.clone(),
        },
        OutputSegment::Fallback {
            prompt: original.to_string(),
        },
    ]
}
