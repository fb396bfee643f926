use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::db::AccountRecord;
use crate::error::BridgeError;
use crate::protocol::ProtocolSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticated,
}

/// Owns the one live protocol session handle. The dispatcher and the event
/// router both act on the network through this manager; neither holds its
/// own handle.
pub struct SessionManager {
    session: Arc<dyn ProtocolSession>,
    state: RwLock<SessionState>,
}

impl SessionManager {
    pub fn new(session: Arc<dyn ProtocolSession>) -> Self {
        Self {
            session,
            state: RwLock::new(SessionState::Disconnected),
        }
    }

    pub fn handle(&self) -> &dyn ProtocolSession {
        self.session.as_ref()
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == SessionState::Authenticated
    }

    /// Issues the login action with the decoded credential. The outcome
    /// arrives later as an auth event; until then the session is Connecting.
    pub async fn connect(&self, account: &AccountRecord) -> Result<(), BridgeError> {
        let encoded = account
            .whatsapp_password
            .as_deref()
            .ok_or_else(|| BridgeError::Auth("account has no credential".to_string()))?;
        let secret = BASE64
            .decode(encoded)
            .map_err(|err| BridgeError::Auth(format!("credential is not valid base64: {err}")))?;

        info!(account = %account.phone_number, "connecting");
        *self.state.write().await = SessionState::Connecting;
        self.session.login(&account.phone_number, &secret).await
    }

    /// Post-auth handshake issued once the network confirms the login.
    pub async fn complete_handshake(&self) -> Result<(), BridgeError> {
        *self.state.write().await = SessionState::Authenticated;
        self.session.ready().await?;
        self.session.sync_config().await?;
        self.session.announce_presence().await?;
        Ok(())
    }

    pub async fn mark_disconnected(&self) {
        *self.state.write().await = SessionState::Disconnected;
    }
}
