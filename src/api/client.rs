//! REST client for the chat API with transparent credential refresh.

use std::sync::Arc;

use chathub_shared::{
    AddFriendRequest, ApiError, ApiResponse, Friend, FriendFullnames, GroupMember, GroupSummary,
    LoginData, LoginRequest, NewGroupRequest, NewPrivateChatRequest, PrivateChatSummary,
    RegisterRequest,
};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::interceptor::{CredentialRefresher, REFRESH_PATH};
use crate::config::join_url;
use crate::token_store::TokenStore;

/// A request that can be sent again after a refresh.
#[derive(Debug, Clone)]
struct PreparedRequest {
    method: Method,
    url: String,
    body: Option<Vec<u8>>,
    authenticated: bool,
}

/// HTTP client for the chat REST API.
///
/// Authenticated calls read the bearer token from the [`TokenStore`] at send
/// time. A 401 triggers one refresh through the shared
/// [`CredentialRefresher`] and one replay; a second 401 is returned as is.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    tokens: Arc<TokenStore>,
    refresher: Arc<CredentialRefresher>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<TokenStore>) -> Self {
        let client = Client::new();
        let base_url = base_url.into();
        let refresher = Arc::new(CredentialRefresher::new(
            client.clone(),
            join_url(&base_url, REFRESH_PATH),
            tokens.clone(),
        ));
        Self {
            client,
            base_url,
            tokens,
            refresher,
        }
    }

    pub fn refresher(&self) -> &Arc<CredentialRefresher> {
        &self.refresher
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    fn prepare<TReq: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&TReq>,
        authenticated: bool,
    ) -> Result<PreparedRequest, ApiError> {
        let body = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| ApiError::Deserialize(e.to_string()))?;
        Ok(PreparedRequest {
            method,
            url: self.url(path),
            body,
            authenticated,
        })
    }

    /// Make an authenticated GET request
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let request = self.prepare::<()>(Method::GET, path, None, true)?;
        self.execute(request).await
    }

    /// Make an authenticated POST request with JSON body
    pub async fn post_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let request = self.prepare(Method::POST, path, Some(body), true)?;
        self.execute(request).await
    }

    /// Make an authenticated POST request without a body
    pub async fn post_empty<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let request = self.prepare::<()>(Method::POST, path, None, true)?;
        self.execute(request).await
    }

    /// POST without credentials (login, registration)
    pub async fn post_anonymous<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let request = self.prepare(Method::POST, path, Some(body), false)?;
        self.execute(request).await
    }

    async fn execute<TRes: DeserializeOwned>(
        &self,
        request: PreparedRequest,
    ) -> Result<TRes, ApiError> {
        let text = if request.authenticated {
            let token = self
                .tokens
                .access_token()
                .ok_or(ApiError::NotAuthenticated)?;
            match self.send(&request, Some(&token)).await {
                Err(e) if e.is_unauthorized() => {
                    tracing::debug!(url = %request.url, "unauthorized, refreshing credential");
                    let fresh = self.refresher.refresh(&token).await?;
                    self.send(&request, Some(&fresh)).await?
                }
                other => other?,
            }
        } else {
            self.send(&request, None).await?
        };

        if text.is_empty() {
            serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
        }
    }

    async fn send(&self, request: &PreparedRequest, token: Option<&str>) -> Result<String, ApiError> {
        let mut rb = self.client.request(request.method.clone(), &request.url);
        if let Some(token) = token {
            rb = rb.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            rb = rb
                .body(body.clone())
                .header("Content-Type", "application/json");
        }

        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }
        Ok(text)
    }

    // ============================================================
    // Endpoints
    // ============================================================

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginData, ApiError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let envelope: ApiResponse<LoginData> = self.post_anonymous("account/login", &body).await?;
        data(envelope)
    }

    /// Returns the server's confirmation message, if any.
    pub async fn register(&self, request: &RegisterRequest) -> Result<Option<String>, ApiError> {
        let envelope: ApiResponse<Value> = self.post_anonymous("account/register", request).await?;
        Ok(envelope.message)
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        let _: Value = self.post_empty("account/logout").await?;
        Ok(())
    }

    pub async fn user_id(&self) -> Result<String, ApiError> {
        data(self.get_json("user/user-id").await?)
    }

    pub async fn friend_details(&self) -> Result<Vec<Friend>, ApiError> {
        data(self.get_json("user/friend-details").await?)
    }

    pub async fn friend_fullnames(&self) -> Result<FriendFullnames, ApiError> {
        data(self.get_json("user/friend-fullnames").await?)
    }

    pub async fn add_friend(&self, email: &str) -> Result<Option<String>, ApiError> {
        let body = AddFriendRequest {
            email: email.to_string(),
        };
        let envelope: ApiResponse<Value> = self.post_json("user/add-friend", &body).await?;
        Ok(envelope.message)
    }

    /// Returns the new chat's id when the server sends one back.
    pub async fn new_private_chat(
        &self,
        chat_title: &str,
        friend_id: &str,
    ) -> Result<Option<Value>, ApiError> {
        let body = NewPrivateChatRequest {
            chat_title: chat_title.to_string(),
            friend_id: friend_id.to_string(),
        };
        let envelope: ApiResponse<Value> = self.post_json("user/new-private-chat", &body).await?;
        Ok(envelope.data)
    }

    pub async fn private_chats(&self) -> Result<Vec<PrivateChatSummary>, ApiError> {
        data(self.get_json("user/user-private-chats").await?)
    }

    pub async fn is_superadmin(&self) -> Result<bool, ApiError> {
        data(self.get_json("user/superadmin-check").await?)
    }

    pub async fn groups(&self) -> Result<Vec<GroupSummary>, ApiError> {
        data(self.get_json("group/all-groups").await?)
    }

    pub async fn group_members(&self, group_chat_id: &str) -> Result<Vec<GroupMember>, ApiError> {
        data(self.get_json(&format!("group/members/{group_chat_id}")).await?)
    }

    /// Returns the new group's chat id.
    pub async fn new_group(&self, request: &NewGroupRequest) -> Result<String, ApiError> {
        data(self.post_json("group/new-group", request).await?)
    }
}

fn data<T>(envelope: ApiResponse<T>) -> Result<T, ApiError> {
    envelope
        .data
        .ok_or_else(|| ApiError::Deserialize("response without data".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn authenticated_call_without_token_does_no_io() {
        let tokens = Arc::new(TokenStore::new(Arc::new(MemoryStorage::new())));
        // Nothing listens here; reaching the network would yield Network
        let api = ApiClient::new("http://127.0.0.1:9/api", tokens);

        assert_eq!(api.user_id().await.unwrap_err(), ApiError::NotAuthenticated);
        assert_eq!(api.logout().await.unwrap_err(), ApiError::NotAuthenticated);
    }

    #[test]
    fn urls_join_the_base() {
        let tokens = Arc::new(TokenStore::new(Arc::new(MemoryStorage::new())));
        let api = ApiClient::new("http://localhost:5000/api/", tokens);
        assert_eq!(
            api.url("/group/members/g1"),
            "http://localhost:5000/api/group/members/g1"
        );
    }

    #[test]
    fn envelope_without_data_is_a_decode_error() {
        let envelope: ApiResponse<String> = serde_json::from_str(r#"{"message":"ok"}"#).unwrap();
        assert!(matches!(data(envelope), Err(ApiError::Deserialize(_))));
    }
}
