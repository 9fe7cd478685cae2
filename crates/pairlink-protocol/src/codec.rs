use crate::error::ProtocolError;
use crate::identifier::RendezvousIdentifier;

/// Prefix of the first message sent into a freshly opened channel.
pub const CHANNEL_OPEN_PREFIX: &str = "@channel-open";

/// SDK version, read from Cargo.toml at compile time.
/// Recorded as the "last-seen SDK version" after migrations run.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Format `@channel-open:<recipient>:<payload>`.
pub fn channel_open_envelope(recipient: &RendezvousIdentifier, payload: &str) -> String {
    format!("{CHANNEL_OPEN_PREFIX}:{recipient}:{payload}")
}

pub fn is_channel_open(body: &str) -> bool {
    body.starts_with(CHANNEL_OPEN_PREFIX)
}

/// Split a channel-open envelope into its recipient and payload.
///
/// The payload is hex, so it never contains `:`; the recipient is
/// everything between the prefix and the last separator, which keeps
/// relay servers with ports intact.
pub fn parse_channel_open(body: &str) -> Result<(RendezvousIdentifier, String), ProtocolError> {
    let rest = body
        .strip_prefix(CHANNEL_OPEN_PREFIX)
        .and_then(|rest| rest.strip_prefix(':'))
        .ok_or(ProtocolError::NotChannelOpen)?;
    let (recipient, payload) = rest.rsplit_once(':').ok_or(ProtocolError::NotChannelOpen)?;
    if payload.is_empty() {
        return Err(ProtocolError::InvalidPayload("empty channel-open payload".into()));
    }
    Ok((RendezvousIdentifier::parse(recipient)?, payload.to_string()))
}
