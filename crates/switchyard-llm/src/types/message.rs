use serde::{Deserialize, Serialize};

/// Role of a message participant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction
    System,
    /// User message
    User,
    /// Assistant response; also assumed for deltas that carry no role
    #[default]
    Assistant,
    /// Tool/function result
    Tool,
}

/// Message in a conversation, or a fragment of one when used as a delta
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message author
    #[serde(default)]
    pub role: Role,
    /// Message content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    /// Optional participant name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool calls made by the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// ID of the tool call this message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set when the answered tool invocation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_is_error: Option<bool>,
    /// Reasoning ("thinking") text, kept apart from content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    /// Opaque signature attached to the reasoning text by the vendor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_signature: Option<String>,
}

impl Message {
    /// Plain text message with the given role
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(Content::Text(text.into())),
            ..Self::default()
        }
    }

    /// Text of the content, empty when there is none
    pub fn content_text(&self) -> String {
        self.content.as_ref().map(Content::as_text).unwrap_or_default()
    }
}

/// Message content, either plain text or an ordered list of parts
///
/// Deserialization tries `Text` first, then `Parts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text content
    Text(String),
    /// Typed content parts
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Build content from parts, collapsing a lone text part to plain text
    pub fn from_parts(parts: Vec<ContentPart>) -> Self {
        match <[ContentPart; 1]>::try_from(parts) {
            Ok([ContentPart::Text { text }]) => Self::Text(text),
            Ok([other]) => Self::Parts(vec![other]),
            Err(parts) => Self::Parts(parts),
        }
    }

    /// Text of all text parts, concatenated
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } | ContentPart::InputAudio { .. } => None,
                })
                .collect(),
        }
    }

    /// Content as a part list
    pub fn into_parts(self) -> Vec<ContentPart> {
        match self {
            Self::Text(text) => vec![ContentPart::Text { text }],
            Self::Parts(parts) => parts,
        }
    }
}

/// Individual part within multipart content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text segment
    Text {
        /// The text string
        text: String,
    },
    /// Image by URL or data URI
    ImageUrl {
        /// URL or `data:` URI
        url: String,
        /// Detail level hint (e.g. "auto", "low", "high")
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// Inline audio
    InputAudio {
        /// Base64 audio data
        data: String,
        /// Encoding (e.g. "wav", "mp3")
        format: String,
    },
}

/// A tool call requested by the assistant
///
/// In streams the same `index` appears across many deltas; `id` and the
/// function name arrive once while `arguments` arrives in fragments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Position among the tool calls of one assistant turn
    #[serde(default)]
    pub index: u32,
    /// Unique identifier for this tool call
    #[serde(default)]
    pub id: String,
    /// Always "function"
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    /// Function name and arguments
    #[serde(default)]
    pub function: FunctionCall,
}

impl ToolCall {
    /// Tool call with a complete set of fields
    pub fn new(index: u32, id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            index,
            id: id.into(),
            call_type: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Function name and arguments within a tool call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name
    #[serde(default)]
    pub name: String,
    /// JSON-encoded arguments, concatenated across stream fragments
    #[serde(default)]
    pub arguments: String,
}

pub(crate) fn function_type() -> String {
    "function".to_owned()
}
