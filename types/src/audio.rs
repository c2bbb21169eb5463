mod turn_detection;
mod transcription;
mod consts;

pub use turn_detection::{TurnDetection, ServerVadTurnDetection, SemanticVadTurnDetection};
pub use transcription::InputAudioTranscription;
pub use consts::*;
