pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let command = Command::new("pordisto")
        .about("Session lifecycle and federated identity service")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("PORDISTO_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .env("PORDISTO_DSN")
                .required(true),
        )
        .arg(
            Arg::new("web-base-url")
                .long("web-base-url")
                .help("Allow-listed base URL for the web client surface")
                .env("PORDISTO_WEB_BASE_URL")
                .required(true),
        )
        .arg(
            Arg::new("mobile-base-url")
                .long("mobile-base-url")
                .help("Allow-listed base URL (custom scheme) for the mobile client surface")
                .default_value("pordisto://app")
                .env("PORDISTO_MOBILE_BASE_URL"),
        )
        .arg(
            Arg::new("state-secret")
                .long("state-secret")
                .help("HMAC secret for OAuth state signing")
                .env("PORDISTO_STATE_SECRET")
                .required(true),
        )
        .arg(
            Arg::new("email-sender")
                .long("email-sender")
                .help("Verification email delivery: outbox (database queue) or log (dev stub)")
                .default_value("outbox")
                .value_parser(["outbox", "log"])
                .env("PORDISTO_EMAIL_SENDER"),
        )
        .arg(
            Arg::new("google-client-id")
                .long("google-client-id")
                .help("Google OAuth client id")
                .env("PORDISTO_GOOGLE_CLIENT_ID")
                .requires("google-client-secret")
                .requires("google-redirect-uri"),
        )
        .arg(
            Arg::new("google-client-secret")
                .long("google-client-secret")
                .help("Google OAuth client secret")
                .env("PORDISTO_GOOGLE_CLIENT_SECRET"),
        )
        .arg(
            Arg::new("google-redirect-uri")
                .long("google-redirect-uri")
                .help("Callback URL registered with Google")
                .env("PORDISTO_GOOGLE_REDIRECT_URI"),
        )
        .arg(
            Arg::new("discord-client-id")
                .long("discord-client-id")
                .help("Discord OAuth client id")
                .env("PORDISTO_DISCORD_CLIENT_ID")
                .requires("discord-client-secret")
                .requires("discord-redirect-uri"),
        )
        .arg(
            Arg::new("discord-client-secret")
                .long("discord-client-secret")
                .help("Discord OAuth client secret")
                .env("PORDISTO_DISCORD_CLIENT_SECRET"),
        )
        .arg(
            Arg::new("discord-redirect-uri")
                .long("discord-redirect-uri")
                .help("Callback URL registered with Discord")
                .env("PORDISTO_DISCORD_REDIRECT_URI"),
        );

    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::new;

    #[test]
    fn command_parses_minimal_server_args() {
        let matches = new().try_get_matches_from([
            "pordisto",
            "--dsn",
            "postgres://localhost/pordisto",
            "--web-base-url",
            "https://app.pordisto.dev",
            "--state-secret",
            "secret",
        ]);
        let matches = matches.expect("parse");
        assert_eq!(matches.get_one::<u16>("port"), Some(&8080));
        assert_eq!(
            matches.get_one::<String>("email-sender").map(String::as_str),
            Some("outbox")
        );
    }

    #[test]
    fn google_client_id_requires_secret_and_redirect() {
        let result = new().try_get_matches_from([
            "pordisto",
            "--dsn",
            "postgres://localhost/pordisto",
            "--web-base-url",
            "https://app.pordisto.dev",
            "--state-secret",
            "secret",
            "--google-client-id",
            "client-id",
        ]);
        assert!(result.is_err());
    }
}
