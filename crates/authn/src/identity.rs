//! User lifecycle events from the identity provider.
//!
//! [`SessionMintingHandler`] turns `user.created` and `user.updated` events
//! into local sessions and hands them, with the user's profile, to an
//! [`IdentitySink`]. `user.deleted` deactivates the user. Other event types
//! are ignored.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AuthError, Result},
    token::{IssuedToken, TokenAuthority},
    webhook::{HandlerError, WebhookEvent, WebhookHandler},
};

/// A user lifecycle event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserEventKind {
    /// `user.created`
    Created,
    /// `user.updated`
    Updated,
    /// `user.deleted`
    Deleted,
}

impl UserEventKind {
    /// Maps a webhook event type, or `None` for non-user events.
    #[must_use]
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "user.created" => Some(Self::Created),
            "user.updated" => Some(Self::Updated),
            "user.deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// The webhook event type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "user.created",
            Self::Updated => "user.updated",
            Self::Deleted => "user.deleted",
        }
    }
}

/// The profile fields Forge keeps for a provider user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalUser {
    /// Provider user id.
    pub id: String,
    /// Primary email address.
    pub email: Option<String>,
    /// Username, or the email's local part when the provider has none.
    pub username: Option<String>,
}

#[derive(Deserialize)]
struct UserPayload {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    email_addresses: Vec<EmailAddress>,
    #[serde(default)]
    primary_email_address_id: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Deserialize)]
struct EmailAddress {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    email_address: Option<String>,
}

impl ExternalUser {
    /// Reads the user from an event's `data`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedPayload`] if `data` is not a user
    /// object with an id.
    pub fn from_event(event: &WebhookEvent) -> Result<Self> {
        let payload = UserPayload::deserialize(&event.data)
            .map_err(|e| AuthError::malformed_payload(format!("user payload: {e}")))?;
        let id = payload
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AuthError::malformed_payload("user payload has no id"))?;

        let primary = payload.primary_email_address_id.as_deref();
        let email = payload
            .email_addresses
            .iter()
            .find(|address| primary.is_some() && address.id.as_deref() == primary)
            .or_else(|| payload.email_addresses.first())
            .and_then(|address| address.email_address.clone())
            .filter(|email| !email.is_empty());

        let username = payload.username.filter(|name| !name.is_empty()).or_else(|| {
            email.as_deref().and_then(|email| email.split('@').next()).map(str::to_owned)
        });

        Ok(Self { id, email, username })
    }
}

/// Where provisioned identities go, typically the user store.
#[async_trait]
pub trait IdentitySink: Send + Sync {
    /// A user was created or updated and a session was minted for it.
    async fn session_minted(
        &self,
        kind: UserEventKind,
        user: &ExternalUser,
        session: &IssuedToken,
    ) -> std::result::Result<(), HandlerError>;

    /// A user was deleted upstream.
    async fn user_deleted(&self, user: &ExternalUser) -> std::result::Result<(), HandlerError>;
}

#[async_trait]
impl<T: IdentitySink + ?Sized> IdentitySink for Arc<T> {
    async fn session_minted(
        &self,
        kind: UserEventKind,
        user: &ExternalUser,
        session: &IssuedToken,
    ) -> std::result::Result<(), HandlerError> {
        (**self).session_minted(kind, user, session).await
    }

    async fn user_deleted(&self, user: &ExternalUser) -> std::result::Result<(), HandlerError> {
        (**self).user_deleted(user).await
    }
}

/// Mints local sessions for provider users as they are created or updated.
pub struct SessionMintingHandler<S> {
    authority: TokenAuthority,
    sink: S,
}

impl<S: IdentitySink> SessionMintingHandler<S> {
    /// Creates a handler issuing sessions from `authority`.
    pub fn new(authority: TokenAuthority, sink: S) -> Self {
        Self { authority, sink }
    }
}

#[async_trait]
impl<S: IdentitySink> WebhookHandler for SessionMintingHandler<S> {
    fn name(&self) -> &str {
        "session-minting"
    }

    async fn handle(&self, event: &WebhookEvent) -> std::result::Result<(), HandlerError> {
        let Some(kind) = UserEventKind::from_event_type(&event.event_type) else {
            tracing::debug!(event_type = %event.event_type, "ignoring non-user event");
            return Ok(());
        };
        let user = ExternalUser::from_event(event)
            .map_err(|e| HandlerError::with_source("unreadable user payload", e))?;

        match kind {
            UserEventKind::Created | UserEventKind::Updated => {
                let session = self
                    .authority
                    .issue(&user.id, None)
                    .map_err(|e| HandlerError::with_source("session issuance failed", e))?;
                tracing::info!(user_id = %user.id, kind = kind.as_str(), "session minted for provider user");
                self.sink.session_minted(kind, &user, &session).await
            }
            UserEventKind::Deleted => {
                tracing::info!(user_id = %user.id, "provider user deleted");
                self.sink.user_deleted(&user).await
            }
        }
    }
}
