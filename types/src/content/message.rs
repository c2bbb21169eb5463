use crate::content::items::{ItemHeader, ItemStatus};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MessageItem {
    #[serde(flatten)]
    header: ItemHeader,

    /// The role of the message sender: "user", "assistant", "system"
    role: MessageRole,

    content: Vec<Content>,
}

impl MessageItem {
    pub fn builder() -> MessageItemBuilder {
        MessageItemBuilder::new()
    }

    /// A system message carrying one `input_text` part.
    pub fn system(text: &str) -> Self {
        Self::builder()
            .with_role(MessageRole::System)
            .with_input_text(text)
            .build()
    }

    pub fn id(&self) -> Option<&str> {
        self.header.id.as_deref()
    }

    pub fn status(&self) -> Option<&ItemStatus> {
        self.header.status.as_ref()
    }

    pub fn role(&self) -> &MessageRole {
        &self.role
    }

    pub fn content(&self) -> &[Content] {
        &self.content
    }

    /// Text or transcript of every part, joined with spaces.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(Content::text)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub struct MessageItemBuilder {
    item: MessageItem,
}

impl Default for MessageItemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageItemBuilder {
    pub fn new() -> Self {
        Self {
            item: MessageItem {
                header: ItemHeader::default(),
                role: MessageRole::User,
                content: Vec::new(),
            },
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.item.header.id = Some(id.to_string());
        self
    }

    pub fn with_role(mut self, role: MessageRole) -> Self {
        self.item.role = role;
        self
    }

    pub fn with_input_text(mut self, text: &str) -> Self {
        self.item.content.push(Content::input_text(text));
        self
    }

    pub fn build(self) -> MessageItem {
        self.item
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub enum MessageRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "system")]
    System,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Content {
    #[serde(rename = "input_text")]
    InputText(TextContent),
    /// Audio travels over the media track, only the transcript shows up here.
    #[serde(rename = "input_audio")]
    InputAudio(AudioContent),
    #[serde(rename = "text")]
    Text(TextContent),
    #[serde(rename = "audio")]
    Audio(AudioContent),
    #[serde(other)]
    Other,
}

impl Content {
    pub fn input_text(text: &str) -> Self {
        Content::InputText(TextContent::new(text))
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Content::InputText(c) | Content::Text(c) => Some(c.text()),
            Content::InputAudio(c) | Content::Audio(c) => c.transcript(),
            Content::Other => None,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct TextContent {
    text: String,
}

impl TextContent {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct AudioContent {
    #[serde(default)]
    transcript: Option<String>,
}

impl AudioContent {
    pub fn transcript(&self) -> Option<&str> {
        self.transcript.as_deref()
    }
}
