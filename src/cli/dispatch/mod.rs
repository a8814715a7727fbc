use crate::{
    cli::{
        actions::{server::Args, Action},
        commands::{
            ARG_AUTH_COOKIE_AGE, ARG_COOKIE_DOMAIN, ARG_COOKIE_PATH, ARG_DATA_COOKIE_AGE, ARG_DEV,
            ARG_ENTRY_PATH, ARG_INSECURE_COOKIES, ARG_PORT, ARG_REDIRECT_URL, ARG_REFRESH_PERIOD,
            ARG_SAME_SITE, ARG_SECRET, ARG_TOKEN_AGE,
        },
    },
    server::SameSite,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use url::Url;

fn age(matches: &clap::ArgMatches, name: &str) -> Result<i64> {
    matches
        .get_one::<i64>(name)
        .copied()
        .with_context(|| format!("missing required argument: --{name}"))
}

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let dev = matches.get_flag(ARG_DEV);
    let secret = matches
        .get_one::<String>(ARG_SECRET)
        .filter(|secret| !secret.is_empty())
        .map(|secret| SecretString::from(secret.clone()));
    if secret.is_none() && !dev {
        anyhow::bail!("missing required argument: --{ARG_SECRET}");
    }

    Ok(Action::Server(Args {
        port: matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080),
        secret,
        entry_path: matches
            .get_one::<String>(ARG_ENTRY_PATH)
            .cloned()
            .unwrap_or_else(|| "/auth".to_string()),
        token_age: age(matches, ARG_TOKEN_AGE)?,
        auth_cookie_age: age(matches, ARG_AUTH_COOKIE_AGE)?,
        data_cookie_age: age(matches, ARG_DATA_COOKIE_AGE)?,
        refresh_period: age(matches, ARG_REFRESH_PERIOD)?,
        cookie_domain: matches
            .get_one::<String>(ARG_COOKIE_DOMAIN)
            .filter(|domain| !domain.is_empty())
            .cloned(),
        cookie_path: matches
            .get_one::<String>(ARG_COOKIE_PATH)
            .cloned()
            .unwrap_or_else(|| "/".to_string()),
        same_site: matches
            .get_one::<SameSite>(ARG_SAME_SITE)
            .copied()
            .unwrap_or_default(),
        secure: !matches.get_flag(ARG_INSECURE_COOKIES),
        redirect_url: matches.get_one::<Url>(ARG_REDIRECT_URL).cloned(),
        dev,
    }))
}
