pub const BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

pub const SESSIONS_PATH: &str = "/realtime/sessions";
pub const SIGNALING_PATH: &str = "/realtime";
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

pub const CONTROL_CHANNEL_LABEL: &str = "oai-events";
pub const CHANNEL_OPEN_TIMEOUT_SECS: u64 = 10;

pub const CREDENTIAL_PREFIX: &str = "sk-";
pub const CREDENTIAL_ATTEMPTS: usize = 3;

pub const DEFAULT_STORE_PATH: &str = ".realtime-call/store.json";

pub const BASE_INSTRUCTIONS: &str = "You are a helpful Japanese language tutor. Speak primarily in Japanese at a conversational pace. Help the user practice everyday dialogues and conversations.";

pub const EVENT_CAPACITY: usize = 1024;
