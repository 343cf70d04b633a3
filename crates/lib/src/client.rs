//! Client context: the credential holder, HTTP client, and gateway session built
//! together from config. Created once at startup and passed to whatever needs it.

use std::sync::Arc;

use crate::config::{self, Config};
use crate::credentials::Credentials;
use crate::gateway::{Connector, EventBus, Session, SessionOptions, WsConnector};
use crate::http::HttpClient;

/// Everything a front end needs to talk to Derailed.
#[derive(Clone)]
pub struct Client {
    credentials: Credentials,
    http: HttpClient,
    gateway: Session,
}

impl Client {
    /// Build from config, connecting to the configured (or env-overridden) URLs.
    pub fn new(config: &Config) -> Self {
        let connector = Arc::new(WsConnector::new(config::resolve_gateway_url(config)));
        Self::with_connector(config, connector)
    }

    /// Build with a custom gateway connector.
    pub fn with_connector(config: &Config, connector: Arc<dyn Connector>) -> Self {
        let credentials = Credentials::new(config::resolve_token(config));
        let http = HttpClient::new(config::resolve_api_url(config), credentials.clone());
        let options = SessionOptions {
            hello_timeout: config.gateway.hello_timeout(),
            reconnect: config.gateway.reconnect.policy(),
        };
        let gateway = Session::new(connector, credentials.clone(), options);
        Self {
            credentials,
            http,
            gateway,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn gateway(&self) -> &Session {
        &self.gateway
    }

    pub fn events(&self) -> &EventBus {
        self.gateway.bus()
    }

    /// Update the token for both HTTP and the gateway's next identify.
    pub fn set_token(&self, token: Option<String>) {
        self.credentials.set_token(token);
    }

    /// Start the gateway session (no-op if already running).
    pub fn connect(&self) {
        self.gateway.connect();
    }

    /// Clear the token and tear the gateway down.
    pub async fn sign_out(&self) {
        self.credentials.clear();
        self.gateway.disconnect().await;
    }
}
