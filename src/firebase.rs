//! Firebase Authentication and Cloud Firestore over their REST APIs.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

use crate::config::{self, Credentials, FirebaseConfig};
use crate::error::{DecodeError, RemoteError};
use crate::remote::{AuthService, DocumentStore};
use crate::session::Session;
use crate::todo::{Draft, Item};

const PAGE_SIZE: &str = "300";
const MAX_PAGES: usize = 100;
/// Refresh this long before the id token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

impl Credentials {
    pub fn session(&self) -> Session {
        Session {
            user_id: self.user_id.clone(),
            email: self.email.clone(),
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - TimeDelta::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

/// One client for both services. Clones share credentials and the
/// auth-state channel.
#[derive(Clone)]
pub struct FirebaseClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: Client,
    config: FirebaseConfig,
    config_dir: PathBuf,
    credentials: RwLock<Option<Credentials>>,
    state: watch::Sender<Option<Session>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    local_id: String,
    email: String,
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    user_id: String,
    expires_in: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<Document>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct Document {
    #[serde(default)]
    fields: Map<String, Value>,
}

fn expires_at(expires_in: &str) -> DateTime<Utc> {
    let now = Utc::now();
    expires_in
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(now + TimeDelta::hours(1))
}

/// Turns a non-success response into `RemoteError::Status`, preferring the
/// `error.message` both services put in their JSON bodies.
async fn check(resp: Response) -> Result<Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.error.message,
        Err(_) => body,
    };
    Err(RemoteError::Status {
        status: status.as_u16(),
        message,
    })
}

fn parse_url(raw: &str) -> Result<Url, RemoteError> {
    Url::parse(raw).map_err(|e| RemoteError::InvalidUrl(format!("{}: {}", raw, e)))
}

fn typed_value<'a>(
    fields: &'a Map<String, Value>,
    field: &'static str,
    kind: &'static str,
) -> Result<&'a Value, DecodeError> {
    fields
        .get(field)
        .ok_or(DecodeError::MissingField { field })?
        .get(kind)
        .ok_or(DecodeError::WrongType {
            field,
            expected: kind,
        })
}

fn string_field(fields: &Map<String, Value>, field: &'static str) -> Result<String, DecodeError> {
    typed_value(fields, field, "stringValue")?
        .as_str()
        .map(str::to_string)
        .ok_or(DecodeError::WrongType {
            field,
            expected: "stringValue",
        })
}

fn timestamp_field(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<DateTime<Utc>, DecodeError> {
    let raw = typed_value(fields, field, "timestampValue")?
        .as_str()
        .ok_or(DecodeError::WrongType {
            field,
            expected: "timestampValue",
        })?;
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| DecodeError::InvalidTimestamp {
            field,
            value: raw.to_string(),
        })
}

/// `{id, todo, createdAt}` in Firestore's typed-value encoding.
fn decode_document(fields: &Map<String, Value>) -> Result<Item, DecodeError> {
    Ok(Item {
        id: string_field(fields, "id")?,
        text: string_field(fields, "todo")?,
        created_at: timestamp_field(fields, "createdAt")?,
    })
}

impl FirebaseClient {
    /// Restores any credentials saved in `config_dir`, so subscribers see the
    /// previous session straight away.
    pub fn new(config: FirebaseConfig, config_dir: PathBuf) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let credentials = config::load_credentials(&config_dir);
        let (state, _) = watch::channel(credentials.as_ref().map(Credentials::session));
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                config,
                config_dir,
                credentials: RwLock::new(credentials),
                state,
            }),
        })
    }

    pub fn current_session(&self) -> Option<Session> {
        self.inner.state.borrow().clone()
    }

    fn api_key(&self) -> Result<&str, RemoteError> {
        let key = self.inner.config.api_key.as_str();
        if key.is_empty() {
            return Err(RemoteError::NotConfigured("firebase.api_key"));
        }
        Ok(key)
    }

    fn database_path(&self) -> Result<String, RemoteError> {
        let project = self.inner.config.project_id.as_str();
        if project.is_empty() {
            return Err(RemoteError::NotConfigured("firebase.project_id"));
        }
        Ok(format!("projects/{}/databases/(default)/documents", project))
    }

    fn firestore_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.inner.config.firestore_url.trim_end_matches('/'),
            path
        )
    }

    async fn authenticate(
        &self,
        endpoint: &str,
        email: &str,
        password: &str,
    ) -> Result<Session, RemoteError> {
        let url = format!(
            "{}/accounts:{}?key={}",
            self.inner.config.auth_url.trim_end_matches('/'),
            endpoint,
            self.api_key()?
        );
        let resp = self
            .inner
            .http
            .post(url)
            .json(&json!({
                "email": email,
                "password": password,
                "returnSecureToken": true,
            }))
            .send()
            .await?;
        let res: AuthResponse = check(resp).await?.json().await?;

        let credentials = Credentials {
            user_id: res.local_id,
            email: res.email,
            id_token: res.id_token,
            refresh_token: res.refresh_token,
            expires_at: expires_at(&res.expires_in),
        };
        let session = credentials.session();
        self.store_credentials(credentials).await;
        self.inner.state.send_replace(Some(session.clone()));
        info!("FirebaseClient: {} succeeded for {}", endpoint, session.email);
        Ok(session)
    }

    /// Saving is best effort: the session still works for this run if the
    /// file cannot be written.
    async fn store_credentials(&self, credentials: Credentials) {
        if let Err(e) = config::save_credentials(&self.inner.config_dir, &credentials) {
            warn!("FirebaseClient: failed to save credentials: {}", e);
        }
        *self.inner.credentials.write().await = Some(credentials);
    }

    async fn forget_credentials(&self) -> Result<(), RemoteError> {
        config::delete_credentials(&self.inner.config_dir)?;
        *self.inner.credentials.write().await = None;
        self.inner.state.send_replace(None);
        Ok(())
    }

    async fn current_credentials(&self) -> Result<Credentials, RemoteError> {
        self.inner
            .credentials
            .read()
            .await
            .clone()
            .ok_or(RemoteError::Unauthenticated)
    }

    async fn id_token(&self) -> Result<String, RemoteError> {
        let current = self.current_credentials().await?;
        if current.is_fresh(Utc::now()) {
            return Ok(current.id_token);
        }
        Ok(self.refresh(current).await?.id_token)
    }

    /// Exchanges the refresh token for a new id token. A refresh token the
    /// server rejects signs the user out.
    async fn refresh(&self, current: Credentials) -> Result<Credentials, RemoteError> {
        let url = format!(
            "{}/token?key={}",
            self.inner.config.token_url.trim_end_matches('/'),
            self.api_key()?
        );
        let resp = self
            .inner
            .http
            .post(url)
            .json(&json!({
                "grant_type": "refresh_token",
                "refresh_token": current.refresh_token,
            }))
            .send()
            .await?;

        let res: RefreshResponse = match check(resp).await {
            Ok(resp) => resp.json().await?,
            Err(RemoteError::Status { status, message })
                if status == StatusCode::BAD_REQUEST.as_u16() =>
            {
                warn!("FirebaseClient: refresh rejected ({}), signing out", message);
                self.forget_credentials().await?;
                return Err(RemoteError::Unauthenticated);
            }
            Err(e) => return Err(e),
        };

        let credentials = Credentials {
            user_id: res.user_id,
            email: current.email,
            id_token: res.id_token,
            refresh_token: res.refresh_token,
            expires_at: expires_at(&res.expires_in),
        };
        self.store_credentials(credentials.clone()).await;
        info!("FirebaseClient: id token refreshed");
        Ok(credentials)
    }

    /// Sends a Firestore request with the id token, refreshing once if the
    /// server answers 401.
    async fn authorized(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Response, RemoteError> {
        let mut token = self.id_token().await?;
        let mut refreshed = false;

        loop {
            let mut builder = self
                .inner
                .http
                .request(method.clone(), url.clone())
                .bearer_auth(&token);
            if let Some(b) = body {
                builder = builder.json(b);
            }

            let resp = builder.send().await?;
            if resp.status() == StatusCode::UNAUTHORIZED && !refreshed {
                refreshed = true;
                let current = self.current_credentials().await?;
                token = self.refresh(current).await?.id_token;
                continue;
            }
            return check(resp).await;
        }
    }
}

#[async_trait]
impl AuthService for FirebaseClient {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, RemoteError> {
        self.authenticate("signInWithPassword", email, password).await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, RemoteError> {
        self.authenticate("signUp", email, password).await
    }

    async fn sign_out(&self) -> Result<(), RemoteError> {
        self.forget_credentials().await?;
        info!("FirebaseClient: signed out");
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.inner.state.subscribe()
    }
}

#[async_trait]
impl DocumentStore for FirebaseClient {
    async fn list_documents(&self, user_id: &str) -> Result<Vec<Item>, RemoteError> {
        let collection = self.firestore_url(&format!("{}/{}", self.database_path()?, user_id));
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut url = parse_url(&collection)?;
            url.query_pairs_mut().append_pair("pageSize", PAGE_SIZE);
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }

            let res: ListResponse = self.authorized(Method::GET, url, None).await?.json().await?;
            for doc in &res.documents {
                items.push(decode_document(&doc.fields)?);
            }

            match res.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(items),
            }
        }

        warn!(
            "FirebaseClient: stopped listing {} after {} pages",
            user_id, MAX_PAGES
        );
        Ok(items)
    }

    async fn put_document(&self, user_id: &str, draft: &Draft) -> Result<(), RemoteError> {
        let database = self.database_path()?;
        let url = parse_url(&self.firestore_url(&format!("{}:commit", database)))?;
        let body = json!({
            "writes": [{
                "update": {
                    "name": format!("{}/{}/{}", database, user_id, draft.id),
                    "fields": {
                        "id": { "stringValue": draft.id },
                        "todo": { "stringValue": draft.text },
                    },
                },
                "updateTransforms": [{
                    "fieldPath": "createdAt",
                    "setToServerValue": "REQUEST_TIME",
                }],
            }],
        });
        self.authorized(Method::POST, url, Some(&body)).await?;
        Ok(())
    }

    async fn delete_document(&self, user_id: &str, id: &str) -> Result<(), RemoteError> {
        let raw = self.firestore_url(&format!("{}/{}/{}", self.database_path()?, user_id, id));
        self.authorized(Method::DELETE, parse_url(&raw)?, None).await?;
        Ok(())
    }
}
