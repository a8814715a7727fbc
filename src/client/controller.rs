//! Client-side session manager.
//!
//! `bootstrap` picks and initializes a platform, `auth` signs in (sharing one
//! pending operation between concurrent callers), and two timers per session
//! refresh the token ahead of expiry and clear it at expiry. `sign_out`
//! cancels the timers and advances the watermark so that anything begun
//! before it is discarded when it resolves.

use super::{
    api::{AuthApi, AuthTransport},
    authorizer::ClientAuthorizer,
    config::ClientConfig,
    error::ClientError,
    state::{AuthEvent, AuthRecord, AuthResponse, Bootstrap, Inner, Session},
    timer::ScheduledTask,
};
use crate::{
    token::{AuthPayload, ErrorPayload, decode_unverified},
    types::{AuthContext, ErrorMessage, TokenResponse},
    unix_now,
};
use futures_util::FutureExt;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

const EVENT_CAPACITY: usize = 16;

struct ClientCore {
    config: ClientConfig,
    authorizers: HashMap<String, Arc<dyn ClientAuthorizer>>,
    transport: Arc<dyn AuthTransport>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<AuthEvent>,
}

/// Browser-side auth session. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct AuthClient {
    core: Arc<ClientCore>,
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("config", &self.core.config)
            .field("platform", &self.platform())
            .field("authed", &self.is_authed())
            .finish()
    }
}

fn seconds(value: i64) -> Duration {
    Duration::from_secs(u64::try_from(value).unwrap_or(0))
}

fn decode_token(response: TokenResponse, platform: &str) -> Result<(String, AuthPayload), ClientError> {
    let payload: AuthPayload = decode_unverified(&response.token)
        .map_err(|err| ClientError::Parse(format!("invalid token: {err}")))?;
    if response.platform != platform || payload.platform != platform {
        return Err(ClientError::Parse(format!(
            "token issued for platform \"{}\"",
            payload.platform
        )));
    }
    Ok((response.token, payload))
}

impl AuthClient {
    /// Build a client talking to `config.server_url()` over HTTP.
    ///
    /// # Errors
    /// Returns `ClientError::Config` if two authorizers claim the same
    /// platform or the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let api = AuthApi::new(
            config.server_url().clone(),
            config.request_timeout(),
            config.cookie_names().clone(),
        )?;
        Self::with_transport(config, Arc::new(api))
    }

    /// Build a client over a custom transport.
    ///
    /// # Errors
    /// Returns `ClientError::Config` if two authorizers claim the same platform.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn AuthTransport>,
    ) -> Result<Self, ClientError> {
        let mut authorizers = HashMap::with_capacity(config.authorizers().len());
        for authorizer in config.authorizers() {
            let platform = authorizer.platform().to_string();
            if authorizers.insert(platform.clone(), authorizer.clone()).is_some() {
                return Err(ClientError::Config(format!(
                    "duplicate authorizer for platform \"{platform}\""
                )));
            }
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            core: Arc::new(ClientCore {
                config,
                authorizers,
                transport,
                inner: Mutex::new(Inner::new()),
                events,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.core.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn downgrade(&self) -> Weak<ClientCore> {
        Arc::downgrade(&self.core)
    }

    fn upgrade(core: &Weak<ClientCore>) -> Option<Self> {
        core.upgrade().map(|core| Self { core })
    }

    /// Stream of refresh, expire and background error notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.core.events.subscribe()
    }

    /// Platform chosen by the last bootstrap.
    #[must_use]
    pub fn platform(&self) -> Option<String> {
        self.lock().bootstrap.platform().map(str::to_string)
    }

    #[must_use]
    pub fn is_authed(&self) -> bool {
        self.lock().record().is_some()
    }

    #[must_use]
    pub fn auth_context(&self) -> Option<AuthContext> {
        self.lock().record().map(|record| record.context.clone())
    }

    #[must_use]
    pub fn auth_entry(&self) -> &str {
        self.core.transport.entry()
    }

    fn emit(&self, event: AuthEvent) {
        if self.core.events.send(event).is_err() {
            debug!("No subscriber for auth event");
        }
    }

    fn authorizer(&self, platform: &str) -> Result<Arc<dyn ClientAuthorizer>, ClientError> {
        self.core
            .authorizers
            .get(platform)
            .cloned()
            .ok_or_else(|| ClientError::UnknownPlatform(platform.to_string()))
    }

    /// Session token the backend set as a cookie, with its payload.
    fn backend_auth(&self) -> Option<(String, AuthPayload)> {
        let content = self
            .core
            .transport
            .cookie(&self.core.config.cookie_names().token)?;
        let payload = decode_unverified::<AuthPayload>(&content).ok()?;
        Some((content, payload))
    }

    /// Login failure the backend reported through its error cookie.
    fn backend_error(&self) -> Option<ErrorPayload> {
        let value = self
            .core
            .transport
            .cookie(&self.core.config.cookie_names().error)?;
        let (content, _) = value.rsplit_once('.')?;
        decode_unverified::<ErrorPayload>(content).ok()
    }

    fn artifact_platform(&self) -> Option<String> {
        self.backend_auth()
            .map(|(_, payload)| payload.platform)
            .or_else(|| self.backend_error().map(|payload| payload.platform))
    }

    /// Choose a platform and initialize its authorizer.
    ///
    /// The platform is `platform`, else the `platform` query parameter of the
    /// configured location, else the platform of a backend-issued cookie.
    /// Switching platforms signs the previous one out. Bootstrapping the
    /// platform already initialized (or initializing) is a no-op.
    ///
    /// # Errors
    /// Returns an error if no known platform can be chosen or its
    /// initialization fails.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self, platform: Option<&str>) -> Result<(), ClientError> {
        let platform = platform
            .map(str::to_string)
            .or_else(|| self.core.config.location_platform())
            .or_else(|| self.artifact_platform())
            .ok_or(ClientError::NoPlatform)?;
        let authorizer = self.authorizer(&platform)?;

        let (pending, signed_out) = {
            let mut inner = self.lock();
            match &inner.bootstrap {
                Bootstrap::Idle { platform: current } if *current == platform => return Ok(()),
                Bootstrap::Initiating {
                    platform: current,
                    pending,
                } if *current == platform => (pending.clone(), None),
                current => {
                    let signed_out = if matches!(current, Bootstrap::Unbootstrapped) {
                        None
                    } else {
                        info!("Switching platform to {platform}");
                        inner.sign_out()
                    };
                    let pending = self
                        .clone()
                        .initiate(platform.clone(), authorizer)
                        .boxed()
                        .shared();
                    inner.bootstrap = Bootstrap::Initiating {
                        platform,
                        pending: pending.clone(),
                    };
                    (pending, signed_out)
                }
            }
        };
        self.forget(signed_out);

        pending.await
    }

    async fn initiate(self, platform: String, authorizer: Arc<dyn ClientAuthorizer>) -> Result<(), ClientError> {
        let server_data = self
            .backend_auth()
            .filter(|(_, payload)| payload.platform == platform && payload.exp > unix_now())
            .map(|(_, payload)| payload.data);
        let server_error: Option<ErrorMessage> = self
            .backend_error()
            .filter(|payload| payload.platform == platform)
            .map(|payload| payload.error);
        if let Some(error) = &server_error {
            info!("Backend reported a login failure on {platform}: ({}) {}", error.code, error.reason);
        }

        let entry = self.auth_entry().to_string();
        let result = authorizer
            .init(&entry, server_data.as_ref(), server_error.as_ref())
            .await
            .map_err(|err| ClientError::Init(format!("{err:#}")));

        let mut inner = self.lock();
        let owned = matches!(
            &inner.bootstrap,
            Bootstrap::Initiating { platform: current, .. } if *current == platform
        );
        if owned {
            inner.bootstrap = match &result {
                Ok(()) => Bootstrap::Idle { platform },
                Err(err) => {
                    warn!("Failed to initialize {platform}: {err}");
                    Bootstrap::Unbootstrapped
                }
            };
        }
        result
    }

    async fn wait_bootstrap(&self) -> Result<String, ClientError> {
        let pending = match &self.lock().bootstrap {
            Bootstrap::Unbootstrapped => return Err(ClientError::NotBootstrapped),
            Bootstrap::Idle { platform } => return Ok(platform.clone()),
            Bootstrap::Initiating { pending, .. } => pending.clone(),
        };
        pending.await?;
        self.platform().ok_or(ClientError::NotBootstrapped)
    }

    /// Authenticate, or return the current session.
    ///
    /// Concurrent calls share one sign flow and resolve to the same result.
    ///
    /// # Errors
    /// Returns `ClientError::SignedOutDuringAuthenticating` if `sign_out` was
    /// called while the flow was in flight, or the failure of the flow.
    #[instrument(skip(self))]
    pub async fn auth(&self) -> Result<AuthResponse, ClientError> {
        let pending = {
            let mut inner = self.lock();
            if matches!(inner.bootstrap, Bootstrap::Unbootstrapped) {
                return Err(ClientError::NotBootstrapped);
            }
            match &inner.session {
                Session::Authed(record) => return Ok(record.response()),
                Session::Authenticating { pending, .. } => pending.clone(),
                Session::SignedOut => {
                    let begin = inner.tick();
                    let pending = self.clone().authenticate(begin).boxed().shared();
                    inner.session = Session::Authenticating {
                        begin,
                        pending: pending.clone(),
                    };
                    pending
                }
            }
        };
        pending.await
    }

    async fn authenticate(self, begin: u64) -> Result<AuthResponse, ClientError> {
        let result = self.obtain(begin).await;

        let mut inner = self.lock();
        let owns_session = matches!(
            &inner.session,
            Session::Authenticating { begin: current, .. } if *current == begin
        );
        if !inner.is_current(begin) {
            if owns_session {
                inner.session = Session::SignedOut;
            }
            debug!("Discarding authentication begun before sign-out");
            return Err(ClientError::SignedOutDuringAuthenticating);
        }
        match result {
            Ok(record) => {
                info!("Authenticated on {}", record.context.platform);
                let response = record.response();
                self.commit(&mut inner, record);
                Ok(response)
            }
            Err(err) => {
                if owns_session {
                    inner.session = Session::SignedOut;
                }
                Err(err)
            }
        }
    }

    async fn obtain(&self, begin: u64) -> Result<AuthRecord, ClientError> {
        let platform = self.wait_bootstrap().await?;
        let authorizer = self.authorizer(&platform)?;

        let backend = self
            .backend_auth()
            .filter(|(_, payload)| payload.platform == platform && payload.exp > unix_now());
        if let Some((token, payload)) = backend {
            debug!("Using backend-issued token on {platform}");
            return Self::record(begin, token, payload, true, authorizer.as_ref());
        }

        let (token, payload) = self.sign(&platform, authorizer.as_ref()).await?;
        Self::record(begin, token, payload, false, authorizer.as_ref())
    }

    async fn sign(
        &self,
        platform: &str,
        authorizer: &dyn ClientAuthorizer,
    ) -> Result<(String, AuthPayload), ClientError> {
        let credential = authorizer
            .fetch_credential(self.auth_entry())
            .await
            .map_err(ClientError::from)?;
        let response = self.core.transport.sign(platform, credential).await?;
        decode_token(response, platform)
    }

    fn record(
        begin: u64,
        token: String,
        payload: AuthPayload,
        backend_issued: bool,
        authorizer: &dyn ClientAuthorizer,
    ) -> Result<AuthRecord, ClientError> {
        let refined = authorizer
            .refine_auth(&payload.data)
            .ok_or(ClientError::InvalidAuthInfo)?;
        Ok(AuthRecord {
            id: begin,
            context: AuthContext {
                platform: payload.platform.clone(),
                user: refined.user,
                channel: refined.channel,
                login_at: payload.iat,
                expire_at: payload.exp,
            },
            token,
            payload,
            backend_issued,
        })
    }

    fn commit(&self, inner: &mut Inner, record: AuthRecord) {
        inner.min_auth_begin = record.id;
        inner.cancel_timers();

        let now = unix_now();
        let lead = i64::try_from(self.core.config.refresh_lead_time().as_secs()).unwrap_or(i64::MAX);
        let payload = &record.payload;
        // A lead time covering the whole token life falls back to its midpoint.
        let deadline = payload.exp.saturating_sub(lead);
        let refresh_at = if deadline > payload.iat {
            deadline
        } else {
            payload.iat + (payload.exp - payload.iat) / 2
        };

        let id = record.id;
        let core = self.downgrade();
        inner.refresh_timer = Some(ScheduledTask::after(seconds(refresh_at - now), async move {
            if let Some(client) = Self::upgrade(&core) {
                client.refresh_due(id).await;
            }
        }));
        let core = self.downgrade();
        inner.expire_timer = Some(ScheduledTask::after(seconds(payload.exp - now), async move {
            if let Some(client) = Self::upgrade(&core) {
                client.expire_due(id);
            }
        }));

        inner.session = Session::Authed(record);
    }

    async fn refresh_due(self, id: u64) {
        let (begin, record) = {
            let mut inner = self.lock();
            inner.refresh_timer = None;
            let Some(record) = inner.record().filter(|record| record.id == id).cloned() else {
                return;
            };
            (inner.tick(), record)
        };
        let platform = record.payload.platform.clone();
        let authorizer = match self.authorizer(&platform) {
            Ok(authorizer) => authorizer,
            Err(err) => {
                self.emit(AuthEvent::Error(err));
                return;
            }
        };

        let result = if record.payload.refreshable_at(unix_now()) {
            debug!("Refreshing token on {platform}");
            match self.core.transport.refresh(&record.token).await {
                Ok(response) => decode_token(response, &platform),
                Err(err) => Err(err),
            }
        } else if authorizer.should_resign() {
            debug!("Resigning on {platform}");
            self.sign(&platform, authorizer.as_ref()).await
        } else {
            debug!("Token on {platform} cannot be refreshed, waiting for expiry");
            return;
        };
        let result = result
            .and_then(|(token, payload)| Self::record(begin, token, payload, false, authorizer.as_ref()));

        let event = {
            let mut inner = self.lock();
            let unchanged = inner.record().is_some_and(|current| current.id == id);
            if !unchanged || !inner.is_current(begin) {
                debug!("Discarding refresh result on {platform}, session changed");
                return;
            }
            match result {
                Ok(refreshed) => {
                    let context = refreshed.context.clone();
                    self.commit(&mut inner, refreshed);
                    AuthEvent::Refresh(context)
                }
                Err(err) => {
                    warn!("Failed to refresh token on {platform}: {err}");
                    AuthEvent::Error(err)
                }
            }
        };
        self.emit(event);
    }

    fn expire_due(&self, id: u64) {
        let context = {
            let mut inner = self.lock();
            inner.expire_timer = None;
            if !inner.record().is_some_and(|record| record.id == id) {
                return;
            }
            if let Some(timer) = inner.refresh_timer.take() {
                timer.cancel();
            }
            match std::mem::replace(&mut inner.session, Session::SignedOut) {
                Session::Authed(record) => record.context,
                _ => return,
            }
        };
        info!("Session on {} expired", context.platform);
        self.emit(AuthEvent::Expire(context));
    }

    /// Drop the session, cancel its timers and invalidate in-flight operations.
    pub fn sign_out(&self) {
        let signed_out = self.lock().sign_out();
        if let Some(record) = &signed_out {
            info!("Signed out of {}", record.context.platform);
        }
        self.forget(signed_out);
    }

    /// Delete the cookie of a backend-issued session, under its own scope.
    fn forget(&self, record: Option<AuthRecord>) {
        if let Some(record) = record.filter(|record| record.backend_issued) {
            self.core
                .transport
                .remove_cookie(&self.core.config.cookie_names().token, &record.payload.scope);
        }
    }
}
