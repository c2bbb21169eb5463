mod call;
mod credential;
mod error;
mod negotiator;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use realtime_call_types as types;
pub use call::{
    CallController, CallManager, CallSession, CallState, Config, ConfigBuilder, ConfigError, ServerRx,
    SessionUpdatePolicy, Stats,
};
pub use credential::{validate_credential, CredentialPrompt, CredentialStore, TerminalPrompt, CREDENTIAL_KEY};
pub use error::{CallError, Result};
pub use negotiator::{EphemeralToken, HttpNegotiator, Negotiator};

#[cfg(feature = "native")]
pub use realtime_call_utils as utils;
