//! GMGN Subscription Authentication
//!
//! Wallet-trade and limit-order channels require a bearer token on the
//! subscribe frame. There is no separate login step: the token rides along
//! with each subscribe request and the server rejects the subscription, not
//! the connection, when it is missing or invalid.
//!
//! # Rejection Codes
//!
//! - 401: Not authenticated
//! - 403: Token not permitted for this channel

use thiserror::Error;

use crate::domain::channel::Channel;
pub use crate::domain::subscription::AccessToken;

/// Status codes the server uses for token rejections.
pub const AUTH_REJECTION_CODES: &[i64] = &[401, 403];

/// Authentication failures scoped to a single subscription.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthenticationError {
    /// The channel requires a token and none was configured.
    #[error("channel {channel} requires an access token")]
    MissingToken {
        /// Channel that needs the token.
        channel: Channel,
    },

    /// The server refused the token.
    #[error("access token rejected for {channel}: {reason}")]
    Rejected {
        /// Channel whose subscribe was refused.
        channel: Channel,
        /// Server-provided reason.
        reason: String,
    },
}

/// Pick the token for a subscribe request.
///
/// A per-subscription override wins over the client default. Channels that
/// do not need a token never get one attached.
///
/// # Errors
///
/// Returns [`AuthenticationError::MissingToken`] when the channel requires a
/// token and neither source provides one.
pub fn resolve_token(
    channel: &Channel,
    override_token: Option<AccessToken>,
    default_token: Option<&AccessToken>,
) -> Result<Option<AccessToken>, AuthenticationError> {
    if !channel.requires_token() {
        return Ok(None);
    }
    override_token
        .or_else(|| default_token.cloned())
        .map(Some)
        .ok_or_else(|| AuthenticationError::MissingToken {
            channel: channel.clone(),
        })
}

/// Whether a rejection is about the access token.
#[must_use]
pub fn is_auth_rejection(code: Option<i64>, message: &str) -> bool {
    if code.is_some_and(|c| AUTH_REJECTION_CODES.contains(&c)) {
        return true;
    }
    let message = message.to_ascii_lowercase();
    message.contains("auth") || message.contains("token")
}
