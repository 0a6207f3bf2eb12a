//! User-management calls routed through the batching engine.

use accufetch_core::{AccumulatedFetching, LogErrors, Tagged};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::http::HttpTransport;
use crate::wire::ApiResp;

/// Path of the unbatched registration endpoint
pub const REGISTER_PATH: &str = "/api/user/register";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterReq {
    pub user: String,
    pub passwd: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResp {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginReq {
    pub user: String,
    pub passwd: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResp {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogoutReq {
    pub user: String,
    pub token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogoutResp {}

/// One user-management request, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UserRequest {
    Register(RegisterReq),
    Login(LoginReq),
    Logout(LogoutReq),
}

impl Tagged for UserRequest {
    fn kind(&self) -> &str {
        match self {
            UserRequest::Register(_) => "register",
            UserRequest::Login(_) => "login",
            UserRequest::Logout(_) => "logout",
        }
    }
}

/// Transport carrying user requests; each response is an `ApiResp` whose
/// payload is decoded per call.
pub type UserTransport = HttpTransport<UserRequest, ApiResp<serde_json::Value>>;

/// Engine carrying user requests
pub type UserEngine = AccumulatedFetching<UserTransport>;

/// Typed wrappers over a user-management engine
pub struct UserClient {
    engine: UserEngine,
    http: Client,
    base_url: String,
}

impl UserClient {
    /// Build the transport and engine from config. Must be called inside a
    /// tokio runtime.
    pub fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let transport = UserTransport::new(config)?;
        let http = transport.client().clone();
        let engine = AccumulatedFetching::with_config(transport, LogErrors, config.engine.clone());
        Ok(Self::new(engine, http, config.base_url()))
    }

    pub fn new(engine: UserEngine, http: Client, base_url: impl Into<String>) -> Self {
        Self { engine, http, base_url: base_url.into() }
    }

    pub fn engine(&self) -> &UserEngine {
        &self.engine
    }

    pub async fn register(&self, req: RegisterReq) -> Result<RegisterResp, ClientError> {
        self.call(UserRequest::Register(req)).await
    }

    pub async fn login(&self, req: LoginReq) -> Result<LoginResp, ClientError> {
        self.call(UserRequest::Login(req)).await
    }

    pub async fn logout(&self, req: LogoutReq) -> Result<LogoutResp, ClientError> {
        self.call(UserRequest::Logout(req)).await
    }

    /// Register without batching, straight against the registration
    /// endpoint.
    #[instrument(skip(self, req), fields(user = %req.user))]
    pub async fn register_direct(&self, req: &RegisterReq) -> Result<RegisterResp, ClientError> {
        let url = format!("{}{}", self.base_url, REGISTER_PATH);
        let resp: ApiResp<RegisterResp> =
            self.http.post(&url).json(req).send().await?.json().await?;
        resp.into_result().map_err(ClientError::Api)
    }

    async fn call<T: DeserializeOwned>(&self, req: UserRequest) -> Result<T, ClientError> {
        match self.engine.submit(req).await? {
            ApiResp::Success(payload) => Ok(serde_json::from_value(payload)?),
            ApiResp::Error { error } => Err(ClientError::Api(error)),
        }
    }
}
