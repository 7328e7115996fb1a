//! Identity bound to a connection.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Who is behind a connection.
///
/// Supplied by the authenticating front end (user id) and the client's
/// `identify` event (display name, avatar). Bound once per connection and
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Stable user identifier from the identity service.
    pub user_id: String,
    /// Name shown to other room members.
    pub display_name: String,
    /// Avatar reference (URL or avatar slot) shown next to messages.
    pub avatar_ref: String,
}

impl Identity {
    /// Creates a new identity.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        avatar_ref: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            avatar_ref: avatar_ref.into(),
        }
    }
}
