use crate::error::KeeperError;

use oauth2::{
    AsyncHttpClient, Client as OAuth2Client, ClientId, EndpointNotSet, EndpointSet,
    HttpClientError, HttpRequest, HttpResponse, RefreshToken, StandardRevocableToken,
    TokenResponse, TokenUrl,
    basic::{
        BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
        BasicTokenResponse,
    },
};
use std::sync::Mutex;
use tracing::debug;
use url::Url;

/// Tokens handed back by a successful refresh-token grant.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    /// Rotated refresh token; some providers omit it.
    pub refresh_token: Option<String>,
}

/// The identity provider's token endpoint, used for refresh-token grants by
/// public clients (no client secret).
#[derive(Clone)]
pub struct TokenEndpoint {
    http_client: reqwest::Client,
    token_url: TokenUrl,
}

impl TokenEndpoint {
    pub fn new(http_client: reqwest::Client, token_url: &Url) -> Result<Self, KeeperError> {
        Ok(Self {
            http_client,
            token_url: TokenUrl::new(token_url.as_str().to_string())?,
        })
    }

    /// POST `grant_type=refresh_token` with the client id and current token.
    ///
    /// Provider failures carry the HTTP status of the token response.
    pub async fn refresh(
        &self,
        client_id: &str,
        refresh_token: &str,
    ) -> Result<TokenGrant, KeeperError> {
        let client = build_oauth2_client(client_id, self.token_url.clone());

        let observed_status = Mutex::new(None::<u16>);
        let http_client = &self.http_client;
        let slot = &observed_status;
        let recording_client = move |request: HttpRequest| async move {
            let response = http_client.call(request).await?;
            if let Ok(mut status) = slot.lock() {
                *status = Some(response.status().as_u16());
            }
            Ok::<HttpResponse, HttpClientError<oauth2::reqwest::Error>>(response)
        };

        let token_result = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&recording_client)
            .await
            .map_err(|e| {
                let err = KeeperError::from(e);
                match observed_status.lock().ok().and_then(|status| *status) {
                    Some(code) => err.with_http_status(code),
                    None => err,
                }
            })?;
        debug!(client_id, "refresh-token grant accepted");
        Ok(TokenGrant {
            access_token: token_result.access_token().secret().clone(),
            refresh_token: token_result.refresh_token().map(|t| t.secret().clone()),
        })
    }
}

fn build_oauth2_client(client_id: &str, token_url: TokenUrl) -> RefreshOauth2Client {
    OAuth2Client::new(ClientId::new(client_id.to_string())).set_token_uri(token_url)
}

type RefreshOauth2Client = OAuth2Client<
    BasicErrorResponse,
    BasicTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;
