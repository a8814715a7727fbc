pub mod logging;

use crate::server::SameSite;
use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ArgAction, ColorChoice, Command,
};

pub const ARG_PORT: &str = "port";
pub const ARG_SECRET: &str = "secret";
pub const ARG_ENTRY_PATH: &str = "entry-path";
pub const ARG_TOKEN_AGE: &str = "token-age-seconds";
pub const ARG_AUTH_COOKIE_AGE: &str = "auth-cookie-age-seconds";
pub const ARG_DATA_COOKIE_AGE: &str = "data-cookie-age-seconds";
pub const ARG_REFRESH_PERIOD: &str = "refresh-period-seconds";
pub const ARG_COOKIE_DOMAIN: &str = "cookie-domain";
pub const ARG_COOKIE_PATH: &str = "cookie-path";
pub const ARG_SAME_SITE: &str = "same-site";
pub const ARG_INSECURE_COOKIES: &str = "insecure-cookies";
pub const ARG_REDIRECT_URL: &str = "redirect-url";
pub const ARG_DEV: &str = "dev";

fn age_arg(name: &'static str, env: &'static str, default: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .help(help)
        .default_value(default)
        .env(env)
        .value_parser(clap::value_parser!(i64).range(1..))
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("crossauth")
        .about("Cross-platform webview authentication server")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("CROSSAUTH_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_SECRET)
                .short('s')
                .long(ARG_SECRET)
                .help("Secret used to sign tokens")
                .long_help(
                    "Secret used to sign tokens. Required unless --dev is set, in which case a random one is generated per run.",
                )
                .env("CROSSAUTH_SECRET")
                .hide_env_values(true)
                .required_unless_present(ARG_DEV),
        )
        .arg(
            Arg::new(ARG_ENTRY_PATH)
                .long(ARG_ENTRY_PATH)
                .help("Path prefix the auth endpoints are served under")
                .default_value("/auth")
                .env("CROSSAUTH_ENTRY_PATH"),
        )
        .arg(age_arg(
            ARG_TOKEN_AGE,
            "CROSSAUTH_TOKEN_AGE_SECONDS",
            "3600",
            "Lifetime of an auth token",
        ))
        .arg(age_arg(
            ARG_AUTH_COOKIE_AGE,
            "CROSSAUTH_AUTH_COOKIE_AGE_SECONDS",
            "15552000",
            "Max-Age of the token and signature cookies",
        ))
        .arg(age_arg(
            ARG_DATA_COOKIE_AGE,
            "CROSSAUTH_DATA_COOKIE_AGE_SECONDS",
            "300",
            "Max-Age of the state and error cookies",
        ))
        .arg(age_arg(
            ARG_REFRESH_PERIOD,
            "CROSSAUTH_REFRESH_PERIOD_SECONDS",
            "5184000",
            "How long after issuance a refreshable token may still be refreshed",
        ))
        .arg(
            Arg::new(ARG_COOKIE_DOMAIN)
                .long(ARG_COOKIE_DOMAIN)
                .help("Domain attribute of the auth cookies (host-only when unset)")
                .env("CROSSAUTH_COOKIE_DOMAIN"),
        )
        .arg(
            Arg::new(ARG_COOKIE_PATH)
                .long(ARG_COOKIE_PATH)
                .help("Path attribute of the auth cookies")
                .default_value("/")
                .env("CROSSAUTH_COOKIE_PATH"),
        )
        .arg(
            Arg::new(ARG_SAME_SITE)
                .long(ARG_SAME_SITE)
                .help("SameSite policy of the cookies: strict, lax or none")
                .default_value("lax")
                .env("CROSSAUTH_SAME_SITE")
                .value_parser(|value: &str| value.parse::<SameSite>().map_err(|err| err.to_string())),
        )
        .arg(
            Arg::new(ARG_INSECURE_COOKIES)
                .long(ARG_INSECURE_COOKIES)
                .help("Omit the Secure attribute, for plain HTTP deployments")
                .env("CROSSAUTH_INSECURE_COOKIES")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_REDIRECT_URL)
                .long(ARG_REDIRECT_URL)
                .help("Default redirect target after a platform login")
                .env("CROSSAUTH_REDIRECT_URL")
                .value_parser(clap::value_parser!(url::Url)),
        )
        .arg(
            Arg::new(ARG_DEV)
                .long(ARG_DEV)
                .help("Development mode: enables the dev platform and http redirect targets")
                .env("CROSSAUTH_DEV")
                .action(ArgAction::SetTrue),
        );

    logging::with_args(command)
}
