// XRPC client module: a small blocking HTTP client that talks to the
// user's PDS. Session calls go through `SessionService`, authenticated
// calls through `ContentService`, so the session manager and actions can
// be driven by fakes in tests.

use crate::config::parse_host;
use crate::error::{Error, Result};
use crate::record::FeedViewPost;
use crate::store::Credential;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

const CREATE_SESSION: &str = "com.atproto.server.createSession";
const REFRESH_SESSION: &str = "com.atproto.server.refreshSession";
const CREATE_RECORD: &str = "com.atproto.repo.createRecord";
const RESOLVE_HANDLE: &str = "com.atproto.identity.resolveHandle";
const GET_FOLLOWS: &str = "app.bsky.graph.getFollows";
const GET_TIMELINE: &str = "app.bsky.feed.getTimeline";

const FOLLOW_COLLECTION: &str = "app.bsky.graph.follow";
const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Tokens returned by create/refresh session.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub did: String,
    #[serde(default)]
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

/// An account as it appears in a follows listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub did: String,
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct FollowsPage {
    pub follows: Vec<Account>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct TimelinePage {
    pub feed: Vec<FeedViewPost>,
    #[serde(default)]
    pub cursor: Option<String>,
}

pub trait SessionService {
    fn create_session(&self, handle: &str, password: &str) -> Result<SessionTokens>;
    /// The refresh token is sent as the bearer token.
    fn refresh_session(&self, refresh_jwt: &str) -> Result<SessionTokens>;
}

pub trait ContentService {
    /// DID of the authenticated account.
    fn actor_did(&self) -> &str;
    /// Create a follow record; returns the record URI.
    fn create_follow(&self, subject_did: &str) -> Result<String>;
    fn list_follows(&self, actor: &str, cursor: Option<&str>) -> Result<FollowsPage>;
    fn resolve_handle(&self, handle: &str) -> Result<String>;
    fn timeline(&self, limit: u32, cursor: Option<&str>) -> Result<TimelinePage>;
    /// Create a plain-text post; returns the record URI.
    fn create_post(&self, text: &str) -> Result<String>;
}

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct CreateRecordRequest<'a, R> {
    repo: &'a str,
    collection: &'a str,
    record: R,
}

#[derive(Serialize)]
struct FollowRecord<'a> {
    #[serde(rename = "$type")]
    kind: &'a str,
    subject: &'a str,
    #[serde(rename = "createdAt")]
    created_at: String,
}

#[derive(Serialize)]
struct PostRecord<'a> {
    #[serde(rename = "$type")]
    kind: &'a str,
    text: &'a str,
    #[serde(rename = "createdAt")]
    created_at: String,
}

#[derive(Deserialize)]
struct CreateRecordResponse {
    uri: String,
}

#[derive(Deserialize)]
struct ResolveHandleResponse {
    did: String,
}

/// XRPC error body, `{"error": "...", "message": "..."}`.
#[derive(Deserialize, Default)]
struct XrpcErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Blocking XRPC client bound to one host and, optionally, one session.
#[derive(Clone)]
pub struct XrpcClient {
    client: Client,
    host: Url,
    auth: Option<Credential>,
}

impl XrpcClient {
    /// Unauthenticated client, enough for the session endpoints.
    pub fn anonymous(host: &str) -> Result<Self> {
        let host = parse_host(host)?;
        let client = Client::builder()
            .user_agent(concat!("bsctl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(XrpcClient {
            client,
            host,
            auth: None,
        })
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.auth.as_ref()
    }

    pub fn host(&self) -> &Url {
        &self.host
    }

    fn endpoint(&self, nsid: &str) -> Result<Url> {
        self.host
            .join(&format!("xrpc/{}", nsid))
            .map_err(|e| Error::Configuration(format!("invalid endpoint {}: {}", nsid, e)))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some(c) => req.header(AUTHORIZATION, format!("Bearer {}", c.access_jwt)),
            None => req,
        }
    }

    fn procedure<B: Serialize, T: DeserializeOwned>(&self, nsid: &str, body: &B) -> Result<T> {
        let req = self.client.post(self.endpoint(nsid)?).json(body);
        let res = self
            .authorize(req)
            .send()
            .map_err(|e| Error::remote(nsid, e))?;
        decode(nsid, res)
    }

    fn query<T: DeserializeOwned>(&self, nsid: &str, params: &[(&str, &str)]) -> Result<T> {
        let req = self.client.get(self.endpoint(nsid)?).query(params);
        let res = self
            .authorize(req)
            .send()
            .map_err(|e| Error::remote(nsid, e))?;
        decode(nsid, res)
    }

    fn require_auth(&self) -> Result<&Credential> {
        self.auth
            .as_ref()
            .ok_or_else(|| Error::Configuration("client has no session".into()))
    }
}

/// Turn an XRPC response into `T`, or a remote-call error that carries the
/// status and the server's error body.
fn decode<T: DeserializeOwned>(nsid: &str, res: Response) -> Result<T> {
    let status = res.status();
    if !status.is_success() {
        let txt = res.text().unwrap_or_default();
        let body: XrpcErrorBody = serde_json::from_str(&txt).unwrap_or_default();
        let reason = match (body.error, body.message) {
            (Some(e), Some(m)) => format!("{}: {}", e, m),
            (Some(e), None) => e,
            (None, Some(m)) => m,
            (None, None) if !txt.is_empty() => format!("{} - {}", status, txt),
            (None, None) => status.to_string(),
        };
        return Err(Error::RemoteCall {
            operation: nsid.to_string(),
            status: Some(status.as_u16()),
            reason,
        });
    }
    res.json()
        .map_err(|e| Error::remote(nsid, format!("parsing response json: {}", e)))
}

/// Bind a credential to a transport pointed at `host`. No network I/O.
pub fn build_client(credential: &Credential, host: &str) -> Result<XrpcClient> {
    if !credential.is_complete() {
        return Err(Error::Configuration(format!(
            "credential for {:?} is incomplete",
            credential.handle
        )));
    }
    let mut client = XrpcClient::anonymous(host)?;
    client.auth = Some(credential.clone());
    Ok(client)
}

impl SessionService for XrpcClient {
    fn create_session(&self, handle: &str, password: &str) -> Result<SessionTokens> {
        let body = CreateSessionRequest {
            identifier: handle,
            password,
        };
        let req = self.client.post(self.endpoint(CREATE_SESSION)?).json(&body);
        let res = req.send().map_err(|e| Error::remote(CREATE_SESSION, e))?;
        decode(CREATE_SESSION, res)
    }

    fn refresh_session(&self, refresh_jwt: &str) -> Result<SessionTokens> {
        let req = self
            .client
            .post(self.endpoint(REFRESH_SESSION)?)
            .header(AUTHORIZATION, format!("Bearer {}", refresh_jwt));
        let res = req.send().map_err(|e| Error::remote(REFRESH_SESSION, e))?;
        decode(REFRESH_SESSION, res)
    }
}

impl ContentService for XrpcClient {
    fn actor_did(&self) -> &str {
        self.auth.as_ref().map(|c| c.did.as_str()).unwrap_or("")
    }

    fn create_follow(&self, subject_did: &str) -> Result<String> {
        let cred = self.require_auth()?;
        let body = CreateRecordRequest {
            repo: &cred.did,
            collection: FOLLOW_COLLECTION,
            record: FollowRecord {
                kind: FOLLOW_COLLECTION,
                subject: subject_did,
                created_at: crate::record::format_timestamp(chrono::Utc::now()),
            },
        };
        let res: CreateRecordResponse = self.procedure(CREATE_RECORD, &body)?;
        Ok(res.uri)
    }

    fn list_follows(&self, actor: &str, cursor: Option<&str>) -> Result<FollowsPage> {
        let mut params = vec![("actor", actor), ("limit", "100")];
        if let Some(c) = cursor {
            params.push(("cursor", c));
        }
        self.query(GET_FOLLOWS, &params)
    }

    fn resolve_handle(&self, handle: &str) -> Result<String> {
        let res: ResolveHandleResponse = self.query(RESOLVE_HANDLE, &[("handle", handle)])?;
        Ok(res.did)
    }

    fn timeline(&self, limit: u32, cursor: Option<&str>) -> Result<TimelinePage> {
        self.require_auth()?;
        let limit = limit.to_string();
        let mut params = vec![("limit", limit.as_str())];
        if let Some(c) = cursor {
            params.push(("cursor", c));
        }
        self.query(GET_TIMELINE, &params)
    }

    fn create_post(&self, text: &str) -> Result<String> {
        let cred = self.require_auth()?;
        let body = CreateRecordRequest {
            repo: &cred.did,
            collection: POST_COLLECTION,
            record: PostRecord {
                kind: POST_COLLECTION,
                text,
                created_at: crate::record::format_timestamp(chrono::Utc::now()),
            },
        };
        let res: CreateRecordResponse = self.procedure(CREATE_RECORD, &body)?;
        Ok(res.uri)
    }
}
