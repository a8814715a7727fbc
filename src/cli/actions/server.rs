use crate::{
    cli::telemetry,
    server::{self, DevAuthorizer, SameSite, ServerAuthController, ServerAuthorizer, ServerConfig},
};
use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use secrecy::SecretString;
use std::{
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub secret: Option<SecretString>,
    pub entry_path: String,
    pub token_age: i64,
    pub auth_cookie_age: i64,
    pub data_cookie_age: i64,
    pub refresh_period: i64,
    pub cookie_domain: Option<String>,
    pub cookie_path: String,
    pub same_site: SameSite,
    pub secure: bool,
    pub redirect_url: Option<Url>,
    pub dev: bool,
}

/// Random signing secret for development runs; sessions do not survive a restart.
fn ephemeral_secret() -> Result<SecretString> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate signing secret")?;
    Ok(SecretString::from(Base64UrlUnpadded::encode_string(&bytes)))
}

/// Build the controller the server runs with.
///
/// # Errors
/// Returns an error if no secret is available or the configuration is invalid.
pub fn controller(args: Args) -> Result<ServerAuthController> {
    let secret = match args.secret {
        Some(secret) => secret,
        None if args.dev => {
            warn!("No secret given, using an ephemeral one");
            ephemeral_secret()?
        }
        None => anyhow::bail!("missing required argument: --secret"),
    };

    let config = ServerConfig::new(secret)
        .with_entry_path(&args.entry_path)
        .with_token_age(args.token_age)
        .with_auth_cookie_age(args.auth_cookie_age)
        .with_data_cookie_age(args.data_cookie_age)
        .with_refresh_period(args.refresh_period)
        .with_cookie_domain(args.cookie_domain)
        .with_cookie_path(&args.cookie_path)
        .with_same_site(args.same_site)
        .with_secure(args.secure)
        .with_dev_mode(args.dev)
        .with_redirect_url(args.redirect_url);

    let mut authorizers: Vec<Arc<dyn ServerAuthorizer>> = Vec::new();
    if args.dev {
        authorizers.push(Arc::new(DevAuthorizer));
    }

    ServerAuthController::new(config, authorizers).context("invalid server configuration")
}

fn log_startup(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("entry_path", args.entry_path.clone()),
        ("secret_set", args.secret.is_some().to_string()),
        ("token_age", format!("{}s", args.token_age)),
        ("refresh_period", format!("{}s", args.refresh_period)),
        (
            "cookie_domain",
            args.cookie_domain
                .clone()
                .unwrap_or_else(|| "host-only".to_string()),
        ),
        ("cookie_path", args.cookie_path.clone()),
        ("same_site", args.same_site.to_string()),
        ("secure", args.secure.to_string()),
        (
            "redirect_url",
            args.redirect_url
                .as_ref()
                .map_or_else(|| "none".to_string(), ToString::to_string),
        ),
        ("dev", args.dev.to_string()),
    ];
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "crossauth {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_VERSION"),
        crate::GIT_COMMIT_HASH
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        message.push_str(&format!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup(&args);
    let port = args.port;
    let controller = Arc::new(controller(args)?);

    let listener = TcpListener::bind(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;

    let result = server::serve(listener, controller, shutdown_signal()).await;

    telemetry::shutdown_tracer();

    result
}
