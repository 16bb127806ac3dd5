pub mod server;

use secrecy::SecretString;
use url::Url;

use crate::gateway::ProviderCredentials;

/// How verification emails leave the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmailSenderKind {
    /// Enqueue into the `email_outbox` table.
    Outbox,
    /// Log-only stub for local development.
    Log,
}

/// Everything the server action needs, resolved from CLI/env.
#[derive(Clone, Debug)]
pub struct ServerSettings {
    pub port: u16,
    pub dsn: String,
    pub web_base_url: Url,
    pub mobile_base_url: Url,
    pub state_secret: SecretString,
    pub email_sender: EmailSenderKind,
    pub google: Option<ProviderCredentials>,
    pub discord: Option<ProviderCredentials>,
}

#[derive(Debug)]
pub enum Action {
    Server { settings: Box<ServerSettings> },
}
