use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{Error, Result};

pub const AUTHORIZE_URL: &str = "https://partners-login.eliotbylegrand.com/authorize";
pub const TOKEN_URL: &str = "https://partners-login.eliotbylegrand.com/token";

const SUBSCRIPTION_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// How long a signed authorization state stays decodable. The user has this
/// long to complete the provider login flow.
const STATE_TTL_SECS: i64 = 600;

type TokenUpdater = Box<dyn Fn(&Token) + Send + Sync>;

/// OAuth2 access/refresh token pair with an absolute expiry instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "expires_in_unset")]
    pub expires_in: i64,
    /// Epoch seconds. Zero means "not provided yet" and is filled in from
    /// `expires_in` when a token response arrives.
    #[serde(default)]
    pub expires_on: i64,
    #[serde(default = "bearer")]
    pub token_type: String,
}

fn expires_in_unset() -> i64 {
    -1
}

fn bearer() -> String {
    "Bearer".to_string()
}

impl Token {
    /// Placeholder token a fresh session starts with. Already expired, so the
    /// first authenticated request always triggers a refresh.
    pub fn expired() -> Self {
        Self {
            access_token: "dummy".to_string(),
            refresh_token: "dummy".to_string(),
            expires_in: -1,
            expires_on: 0,
            token_type: bearer(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.expires_on > Utc::now().timestamp()
    }

    /// Fold a token response over the previous token: the provider may omit
    /// the refresh token (keep the old one) and may omit the absolute expiry
    /// (derive it from `expires_in`).
    fn merged_with(mut self, previous: &Token) -> Token {
        if self.refresh_token.is_empty() {
            self.refresh_token = previous.refresh_token.clone();
        }
        if self.expires_on == 0 && self.expires_in > 0 {
            self.expires_on = Utc::now().timestamp() + self.expires_in;
        }
        self
    }
}

#[derive(Serialize, Deserialize)]
struct StateClaims {
    state: String,
    exp: u64,
}

pub struct OAuthSessionBuilder {
    client_id: String,
    client_secret: String,
    subscription_key: String,
    redirect_uri: Option<String>,
    token: Option<Token>,
    token_updater: Option<TokenUpdater>,
    authorize_endpoint: String,
    token_endpoint: String,
}

impl OAuthSessionBuilder {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        subscription_key: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            subscription_key: subscription_key.into(),
            redirect_uri: None,
            token: None,
            token_updater: None,
            authorize_endpoint: AUTHORIZE_URL.to_string(),
            token_endpoint: TOKEN_URL.to_string(),
        }
    }

    pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    /// Restore a previously persisted token instead of the expired placeholder.
    pub fn token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    /// Callback invoked with every replaced token, so the caller can persist it.
    pub fn on_token_update(mut self, f: impl Fn(&Token) + Send + Sync + 'static) -> Self {
        self.token_updater = Some(Box::new(f));
        self
    }

    pub fn authorize_endpoint(mut self, url: impl Into<String>) -> Self {
        self.authorize_endpoint = url.into();
        self
    }

    pub fn token_endpoint(mut self, url: impl Into<String>) -> Self {
        self.token_endpoint = url.into();
        self
    }

    pub fn build(self) -> OAuthSession {
        OAuthSession {
            http: reqwest::Client::new(),
            client_id: self.client_id,
            client_secret: self.client_secret,
            subscription_key: self.subscription_key,
            redirect_uri: self.redirect_uri,
            token: Mutex::new(self.token.unwrap_or_else(Token::expired)),
            token_updater: self.token_updater,
            state: Uuid::new_v4().simple().to_string(),
            state_secret: Uuid::new_v4().simple().to_string(),
            authorize_endpoint: self.authorize_endpoint,
            token_endpoint: self.token_endpoint,
        }
    }
}

/// OAuth2 session: token lifecycle plus the authenticated request façade.
///
/// The token cell is shared by all requests of one client. The lock is only
/// held to read or replace the token, never across an await, so a refresh
/// racing an in-flight request using the old token is possible and accepted.
pub struct OAuthSession {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    subscription_key: String,
    redirect_uri: Option<String>,
    token: Mutex<Token>,
    token_updater: Option<TokenUpdater>,
    state: String,
    state_secret: String,
    authorize_endpoint: String,
    token_endpoint: String,
}

impl OAuthSession {
    pub fn builder(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        subscription_key: impl Into<String>,
    ) -> OAuthSessionBuilder {
        OAuthSessionBuilder::new(client_id, client_secret, subscription_key)
    }

    pub fn valid_token(&self) -> bool {
        self.token.lock().is_valid()
    }

    /// Snapshot of the current token.
    pub fn token(&self) -> Token {
        self.token.lock().clone()
    }

    /// Refresh the token via the refresh-token grant if it has expired.
    ///
    /// A failed exchange propagates and leaves the previous token in place,
    /// so the next call retries the refresh.
    pub async fn ensure_token_valid(&self) -> Result<()> {
        let refresh_token = {
            let token = self.token.lock();
            if token.is_valid() {
                trace!("token still valid");
                return Ok(());
            }
            token.refresh_token.clone()
        };
        debug!("token expired, refreshing");
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", &refresh_token),
        ])
        .await?;
        Ok(())
    }

    /// Provider authorization URL carrying a freshly signed state envelope.
    pub fn authorize_url(&self) -> Result<String> {
        let envelope = self.encode_state()?;
        let mut params: Vec<(&str, &str)> = vec![
            ("response_type", "code"),
            ("client_id", &self.client_id),
        ];
        if let Some(uri) = &self.redirect_uri {
            params.push(("redirect_uri", uri));
        }
        params.push(("state", &envelope));
        let url = reqwest::Url::parse_with_params(&self.authorize_endpoint, &params)
            .map_err(|e| Error::Payload(format!("authorize URL: {e}")))?;
        Ok(url.to_string())
    }

    /// Resolve an authorization-code callback URL to the initial token.
    ///
    /// The embedded state envelope must decode under this session's secret
    /// and match the session's state value; anything else is a hard
    /// [`Error::StateMismatch`] so CSRF rejection is distinguishable from an
    /// exchange failure.
    pub async fn fetch_initial_token(&self, redirect_url: &str) -> Result<Token> {
        let url = reqwest::Url::parse(redirect_url)
            .map_err(|e| Error::Payload(format!("redirect URL: {e}")))?;

        let mut code = None;
        let mut envelope = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => envelope = Some(value.into_owned()),
                _ => {}
            }
        }
        let code = code.ok_or(Error::MissingAuthCode)?;
        let returned_state = envelope
            .and_then(|e| self.decode_state(&e))
            .ok_or(Error::StateMismatch)?;
        if returned_state != self.state {
            return Err(Error::StateMismatch);
        }

        self.token_request(&[("grant_type", "authorization_code"), ("code", &code)])
            .await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<Token> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("client_id", &self.client_id));
        form.push(("client_secret", &self.client_secret));

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&form)
            .send()
            .await?
            .error_for_status()?;
        let fresh: Token = response.json().await?;

        let merged = {
            let mut current = self.token.lock();
            let merged = fresh.merged_with(&current);
            *current = merged.clone();
            merged
        };
        debug!(expires_on = merged.expires_on, "token replaced");
        if let Some(updater) = &self.token_updater {
            updater(&merged);
        }
        Ok(merged)
    }

    fn encode_state(&self) -> Result<String> {
        let claims = StateClaims {
            state: self.state.clone(),
            exp: (Utc::now().timestamp() + STATE_TTL_SECS) as u64,
        };
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.state_secret.as_bytes()),
        )
        .map_err(|e| Error::Payload(format!("state envelope: {e}")))
    }

    fn decode_state(&self, envelope: &str) -> Option<String> {
        jsonwebtoken::decode::<StateClaims>(
            envelope,
            &DecodingKey::from_secret(self.state_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .ok()
        .map(|data| data.claims.state)
    }

    // -- Authenticated request façade --

    /// Ensure a valid token, inject the subscription and bearer headers, and
    /// return the response as-is (no status check).
    pub async fn request(&self, method: reqwest::Method, url: &str) -> Result<reqwest::Response> {
        self.authenticated(self.http.request(method, url)).await
    }

    /// Authenticated GET that raises on non-2xx.
    pub async fn get_request(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<reqwest::Response> {
        let response = self.authenticated(self.http.get(url).query(params)).await?;
        Ok(response.error_for_status()?)
    }

    /// Authenticated JSON POST that raises on non-2xx.
    pub async fn post_request(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        let response = self.authenticated(self.http.post(url).json(body)).await?;
        Ok(response.error_for_status()?)
    }

    async fn authenticated(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        self.ensure_token_valid().await?;
        let access_token = self.token.lock().access_token.clone();
        let response = builder
            .header(SUBSCRIPTION_HEADER, &self.subscription_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        Ok(response)
    }
}
