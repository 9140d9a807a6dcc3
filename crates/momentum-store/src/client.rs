//! REST client for the remote store.

use std::sync::Arc;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::ApiErrorBody;
use crate::{AuthUser, Query, Session, StoreConfig, StoreError};

/// Client for the remote store's auth, REST and edge-function endpoints.
///
/// Requests are never retried; a failure is reported once and the caller
/// decides what to do with it.
pub struct StoreClient {
    http: Client,
    config: StoreConfig,
    session: Arc<RwLock<Option<Session>>>,
}

impl StoreClient {
    /// Create a new client.
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            config,
            session: Arc::new(RwLock::new(None)),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Sign in with email and password.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, StoreError> {
        #[derive(Serialize)]
        struct PasswordGrant<'a> {
            email: &'a str,
            password: &'a str,
        }

        let response = self
            .http
            .post(self.config.auth_url("token"))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.config.anon_key)
            .json(&PasswordGrant { email, password })
            .send()
            .await?;

        let session = Self::read_session(response, "sign in").await?;
        let user = session.user.clone();
        debug!(user_id = %user.id, "signed in");

        *self.session.write().await = Some(session);
        Ok(user)
    }

    /// Exchange the refresh token for a new session.
    pub async fn refresh_session(&self) -> Result<(), StoreError> {
        #[derive(Serialize)]
        struct RefreshGrant {
            refresh_token: String,
        }

        let refresh_token = {
            let session = self.session.read().await;
            session
                .as_ref()
                .map(|s| s.refresh_token.clone())
                .ok_or_else(|| StoreError::Auth("no session to refresh".to_string()))?
        };

        let response = self
            .http
            .post(self.config.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.config.anon_key)
            .json(&RefreshGrant { refresh_token })
            .send()
            .await?;

        let session = Self::read_session(response, "refresh").await?;
        debug!(user_id = %session.user.id, "refreshed session");

        *self.session.write().await = Some(session);
        Ok(())
    }

    async fn read_session(response: reqwest::Response, action: &str) -> Result<Session, StoreError> {
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.map_err(|e| {
                StoreError::Auth(format!(
                    "{} failed ({}): failed to read response: {}",
                    action, status, e
                ))
            })?;
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|body| body.message)
                .unwrap_or(text);
            return Err(StoreError::Auth(format!(
                "{} failed ({}): {}",
                action, status, message
            )));
        }
        Ok(response.json().await?)
    }

    /// Install an existing session (e.g. restored from disk).
    pub async fn set_session(&self, session: Session) {
        *self.session.write().await = Some(session);
    }

    /// Forget the current session.
    pub async fn sign_out(&self) {
        *self.session.write().await = None;
    }

    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    /// Id of the signed-in user.
    pub async fn user_id(&self) -> Option<Uuid> {
        self.session.read().await.as_ref().map(|s| s.user.id)
    }

    /// Id of the signed-in user, or an auth error.
    pub async fn require_user(&self) -> Result<Uuid, StoreError> {
        self.user_id()
            .await
            .ok_or_else(|| StoreError::Auth("not signed in".to_string()))
    }

    /// Token used for row-level authorization: the user's access token, or
    /// the anon key when signed out.
    pub async fn access_token(&self) -> String {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.config.anon_key.clone())
    }

    async fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let token = self.access_token().await;
        builder
            .header("apikey", &self.config.anon_key)
            .header("Authorization", format!("Bearer {}", token))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Run a filtered read.
    pub async fn select<T: DeserializeOwned>(&self, query: &Query) -> Result<Vec<T>, StoreError> {
        if query.matches_nothing() {
            return Ok(Vec::new());
        }
        let table = query.table_name();
        let request = self
            .authorized(self.http.get(self.config.rest_url(table)))
            .await
            .query(&query.params());

        let response = request.send().await?;
        let rows: Vec<T> = self.handle_response(table, response).await?;
        debug!(table = %table, rows = rows.len(), "select");
        Ok(rows)
    }

    /// Read at most one row.
    pub async fn select_one<T: DeserializeOwned>(
        &self,
        query: &Query,
    ) -> Result<Option<T>, StoreError> {
        let rows = self.select(&query.clone().limit(1)).await?;
        Ok(rows.into_iter().next())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert one row or an array of rows; returns the inserted rows.
    pub async fn insert<B, T>(&self, table: &str, rows: &B) -> Result<Vec<T>, StoreError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self
            .authorized(self.http.post(self.config.rest_url(table)))
            .await
            .header("Prefer", "return=representation")
            .json(rows);

        let response = request.send().await?;
        let rows: Vec<T> = self.handle_response(table, response).await?;
        debug!(table = %table, rows = rows.len(), "insert");
        Ok(rows)
    }

    /// Insert a single row and return it.
    pub async fn insert_one<B, T>(&self, table: &str, row: &B) -> Result<T, StoreError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.insert(table, row)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::InvalidResponse(format!("insert into {} returned no row", table)))
    }

    /// Insert-or-update keyed by the uniqueness constraint over `on_conflict`.
    pub async fn upsert<B, T>(
        &self,
        table: &str,
        rows: &B,
        on_conflict: &[&str],
    ) -> Result<Vec<T>, StoreError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self
            .authorized(self.http.post(self.config.rest_url(table)))
            .await
            .query(&[("on_conflict", on_conflict.join(","))])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(rows);

        let response = request.send().await?;
        let rows: Vec<T> = self.handle_response(table, response).await?;
        debug!(table = %table, on_conflict = ?on_conflict, rows = rows.len(), "upsert");
        Ok(rows)
    }

    /// Update every row matching the query's filters.
    pub async fn update<B, T>(&self, query: &Query, patch: &B) -> Result<Vec<T>, StoreError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let table = query.table_name();
        if !query.has_filters() {
            return Err(StoreError::UnfilteredWrite {
                operation: "update",
                table: table.to_string(),
            });
        }

        let request = self
            .authorized(self.http.patch(self.config.rest_url(table)))
            .await
            .query(&query.filter_params())
            .header("Prefer", "return=representation")
            .json(patch);

        let response = request.send().await?;
        let rows: Vec<T> = self.handle_response(table, response).await?;
        debug!(table = %table, rows = rows.len(), "update");
        Ok(rows)
    }

    /// Delete every row matching the query's filters; returns the deleted rows.
    pub async fn delete<T: DeserializeOwned>(&self, query: &Query) -> Result<Vec<T>, StoreError> {
        let table = query.table_name();
        if !query.has_filters() {
            return Err(StoreError::UnfilteredWrite {
                operation: "delete",
                table: table.to_string(),
            });
        }

        let request = self
            .authorized(self.http.delete(self.config.rest_url(table)))
            .await
            .query(&query.filter_params())
            .header("Prefer", "return=representation");

        let response = request.send().await?;
        let rows: Vec<T> = self.handle_response(table, response).await?;
        debug!(table = %table, rows = rows.len(), "delete");
        Ok(rows)
    }

    // =========================================================================
    // Edge functions
    // =========================================================================

    /// Call an edge function and decode its JSON response.
    pub async fn invoke<Req, Resp>(&self, name: &str, body: &Req) -> Result<Resp, StoreError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let request = self
            .authorized(self.http.post(self.config.function_url(name)))
            .await
            .json(body);

        let response = request.send().await?;
        self.handle_response(name, response).await
    }

    /// Call an edge function and return the raw response body.
    pub async fn invoke_text<Req>(&self, name: &str, body: &Req) -> Result<String, StoreError>
    where
        Req: Serialize + ?Sized,
    {
        let request = self
            .authorized(self.http.post(self.config.function_url(name)))
            .await
            .json(body);

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_for_status(name, status, response).await);
        }
        Ok(response.text().await?)
    }

    /// Handle response, checking for errors.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        table: &str,
        response: reqwest::Response,
    ) -> Result<T, StoreError> {
        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_for_status(table, status, response).await);
        }

        let text = response.text().await?;
        // 204 No Content (e.g. writes without a representation) decodes as an empty array.
        if text.trim().is_empty() {
            return Ok(serde_json::from_str("[]")?);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn error_for_status(
        table: &str,
        status: StatusCode,
        response: reqwest::Response,
    ) -> StoreError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return StoreError::RateLimited { retry_after_secs };
        }

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return StoreError::InvalidResponse(format!(
                    "request failed ({}): failed to read response: {}",
                    status, e
                ));
            }
        };
        let body = serde_json::from_str::<ApiErrorBody>(&text).ok();
        warn!(table = %table, status = %status, "remote store rejected request");

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                StoreError::Auth(body.map(|b| b.message).unwrap_or(text))
            }
            StatusCode::NOT_FOUND => StoreError::NotFound {
                table: table.to_string(),
            },
            StatusCode::CONFLICT => StoreError::Conflict {
                table: table.to_string(),
                message: body.map(|b| b.message).unwrap_or(text),
            },
            _ => match body {
                Some(body) => StoreError::Api {
                    code: body.code,
                    message: body.message,
                    hint: body.hint,
                },
                None => StoreError::InvalidResponse(format!("request failed ({}): {}", status, text)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Order;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const USER_ID: &str = "6f1c1b9e-8a0c-4c7e-9d59-3f8f0c2b1a11";

    fn client_for(server: &MockServer) -> StoreClient {
        let config = StoreConfig::builder(server.uri(), "anon").build().unwrap();
        StoreClient::new(config).unwrap()
    }

    async fn mount_sign_in(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "user-token",
                "refresh_token": "refresh-token",
                "expires_in": 3600,
                "user": {"id": USER_ID, "email": "me@example.com"}
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_client_without_session() {
        let client = StoreClient::new(StoreConfig::builder("https://example.co", "anon").build().unwrap())
            .unwrap();
        assert_eq!(client.user_id().await, None);
        assert_eq!(client.access_token().await, "anon");
        assert!(matches!(client.require_user().await, Err(StoreError::Auth(_))));
    }

    #[tokio::test]
    async fn test_sign_in_success() {
        let server = MockServer::start().await;
        mount_sign_in(&server).await;

        let client = client_for(&server);
        let user = client.sign_in("me@example.com", "pw").await.unwrap();

        assert_eq!(user.id.to_string(), USER_ID);
        assert_eq!(client.access_token().await, "user-token");
    }

    #[tokio::test]
    async fn test_sign_in_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.sign_in("me@example.com", "wrong").await.unwrap_err();

        match err {
            StoreError::Auth(message) => assert!(message.contains("Invalid login credentials")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(client.user_id().await, None);
    }

    #[tokio::test]
    async fn test_refresh_without_session() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        assert!(matches!(client.refresh_session().await, Err(StoreError::Auth(_))));
    }

    #[tokio::test]
    async fn test_select_sends_filters_and_token() {
        let server = MockServer::start().await;
        mount_sign_in(&server).await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/tasks"))
            .and(query_param("user_id", format!("eq.{}", USER_ID)))
            .and(query_param("order", "created_at.desc"))
            .and(header("apikey", "anon"))
            .and(header("Authorization", "Bearer user-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 1}, {"id": 2}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.sign_in("me@example.com", "pw").await.unwrap();

        let rows: Vec<serde_json::Value> = client
            .select(
                &Query::table("tasks")
                    .eq("user_id", USER_ID)
                    .order("created_at", Order::Desc),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_select_with_empty_in_list_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let ids: Vec<String> = Vec::new();
        let rows: Vec<serde_json::Value> = client
            .select(&Query::table("profiles").in_list("id", ids))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_merges_duplicates_on_conflict_columns() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/task_logs"))
            .and(query_param("on_conflict", "task_id,date"))
            .and(|req: &wiremock::Request| {
                req.headers.get("Prefer").and_then(|v| v.to_str().ok())
                    == Some("resolution=merge-duplicates,return=representation")
            })
            .and(body_json(serde_json::json!({"task_id": "t1", "date": "2024-05-01", "minutes": 25})))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!([
                {"task_id": "t1", "date": "2024-05-01", "minutes": 25}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let rows: Vec<serde_json::Value> = client
            .upsert(
                "task_logs",
                &serde_json::json!({"task_id": "t1", "date": "2024-05-01", "minutes": 25}),
                &["task_id", "date"],
            )
            .await
            .unwrap();
        assert_eq!(rows[0]["minutes"], 25);
    }

    #[tokio::test]
    async fn test_unfiltered_writes_are_refused() {
        let server = MockServer::start().await;
        let client = client_for(&server);

        let err = client
            .delete::<serde_json::Value>(&Query::table("circle_messages"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnfilteredWrite { operation: "delete", .. }));

        let err = client
            .update::<_, serde_json::Value>(&Query::table("tasks"), &serde_json::json!({"completed": true}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnfilteredWrite { operation: "update", .. }));
    }

    #[tokio::test]
    async fn test_delete_with_no_content_response() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/activity_reactions"))
            .and(query_param("emoji", "eq.fire"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let rows: Vec<serde_json::Value> = client
            .delete(&Query::table("activity_reactions").eq("emoji", "fire"))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_conflict_maps_to_conflict_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/circle_members"))
            .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .insert::<_, serde_json::Value>("circle_members", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { ref table, .. } if table == "circle_members"));
    }

    #[tokio::test]
    async fn test_api_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/tasks"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": "42703",
                "message": "column tasks.nope does not exist",
                "hint": null
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .select::<serde_json::Value>(&Query::table("tasks"))
            .await
            .unwrap_err();
        match err {
            StoreError::Api { code, message, .. } => {
                assert_eq!(code.as_deref(), Some("42703"));
                assert!(message.contains("does not exist"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rate_limited_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/tasks"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .select::<serde_json::Value>(&Query::table("tasks"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RateLimited { retry_after_secs: Some(7) }));
    }

    #[tokio::test]
    async fn test_forbidden_maps_to_auth() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/profiles"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "code": "42501",
                "message": "permission denied for table profiles"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .update::<_, serde_json::Value>(
                &Query::table("profiles").eq("id", USER_ID),
                &serde_json::json!({"role": "admin"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Auth(ref m) if m.contains("permission denied")));
    }

    #[tokio::test]
    async fn test_invoke_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/functions/v1/ai-coach"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Keep going!"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let text = client
            .invoke_text("ai-coach", &serde_json::json!({"messages": []}))
            .await
            .unwrap();
        assert_eq!(text, "Keep going!");
    }
}
