use anyhow::{Context, Result};
use secrecy::SecretString;
use url::Url;

use crate::cli::actions::{Action, EmailSenderKind, ServerSettings};
use crate::gateway::ProviderCredentials;

fn required(matches: &clap::ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .with_context(|| format!("missing required argument: --{name}"))
}

fn parse_url(matches: &clap::ArgMatches, name: &str) -> Result<Url> {
    let raw = required(matches, name)?;
    Url::parse(&raw).with_context(|| format!("invalid URL for --{name}: {raw}"))
}

fn provider_credentials(
    matches: &clap::ArgMatches,
    prefix: &str,
) -> Result<Option<ProviderCredentials>> {
    let Some(client_id) = matches.get_one::<String>(&format!("{prefix}-client-id")) else {
        return Ok(None);
    };
    let client_secret = required(matches, &format!("{prefix}-client-secret"))?;
    let redirect_uri = parse_url(matches, &format!("{prefix}-redirect-uri"))?;
    Ok(Some(ProviderCredentials {
        client_id: client_id.clone(),
        client_secret: SecretString::from(client_secret),
        redirect_uri,
    }))
}

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let email_sender = match matches
        .get_one::<String>("email-sender")
        .map(String::as_str)
    {
        Some("log") => EmailSenderKind::Log,
        _ => EmailSenderKind::Outbox,
    };

    let settings = ServerSettings {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: required(matches, "dsn")?,
        web_base_url: parse_url(matches, "web-base-url")?,
        mobile_base_url: parse_url(matches, "mobile-base-url")?,
        state_secret: SecretString::from(required(matches, "state-secret")?),
        email_sender,
        google: provider_credentials(matches, "google")?,
        discord: provider_credentials(matches, "discord")?,
    };

    Ok(Action::Server {
        settings: Box::new(settings),
    })
}
