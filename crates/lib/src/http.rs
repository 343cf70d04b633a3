//! HTTP API client (register, login, and generic authorized requests).
//!
//! Shares the `Credentials` holder with the gateway session, so a token set by
//! `login` is the one used by the next identify.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::credentials::Credentials;
use crate::models::TokenResult;

/// Client for the Derailed HTTP API.
#[derive(Clone)]
pub struct HttpClient {
    base_url: String,
    client: reqwest::Client,
    credentials: Credentials,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("api request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },
}

/// Error body returned by the API: `{ "code", "message" }`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Serialize)]
struct AccountParams<'a> {
    username: &'a str,
    password: &'a str,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            credentials,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// POST /register: create an account. Stores the returned token.
    pub async fn register(&self, username: &str, password: &str) -> Result<TokenResult, HttpError> {
        let result: TokenResult = self
            .send_json(Method::POST, "/register", Some(&AccountParams { username, password }))
            .await?;
        self.credentials.set_token(Some(result.token.clone()));
        Ok(result)
    }

    /// POST /login: sign in. Stores the returned token.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenResult, HttpError> {
        let result: TokenResult = self
            .send_json(Method::POST, "/login", Some(&AccountParams { username, password }))
            .await?;
        self.credentials.set_token(Some(result.token.clone()));
        Ok(result)
    }

    /// Send a JSON request with the current token (if any) and return the JSON body.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, HttpError> {
        self.send_json(method, path, body).await
    }

    async fn send_json<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, HttpError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        log::debug!("{} {}", method, url);
        let mut req = self.client.request(method, &url);
        if let Some(token) = self.credentials.get_token() {
            req = req.header(reqwest::header::AUTHORIZATION, token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        let res = req.send().await?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|e| e.message)
                .unwrap_or(text);
            return Err(HttpError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(res.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_drops_trailing_slashes() {
        let http = HttpClient::new("http://127.0.0.1:8000//", Credentials::default());
        assert_eq!(http.base_url(), "http://127.0.0.1:8000");
    }
}
