//! HTTP client for the validation authority.
//!
//! Every response is expected to be an [`Envelope`]. Errors are classified
//! by `error.code` first and by HTTP status second, so a proxy's bare 502
//! and an authority's `CONFLICT` both land on the right [`ErrorKind`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::{ErrorKind, WorkflowError};
use crate::models::envelope::Envelope;
use crate::models::notification::Notification;
use crate::models::user::User;
use crate::models::validation_request::{
    validate_rejection_reason, NewValidationRequest, RejectBody, RequestStatus, ValidationRequest,
};
use crate::workflow::{NotificationApi, ValidationApi, WorkflowResult};

pub mod actions;

pub use actions::HttpActionExecutor;

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// `base_url` includes the API prefix, e.g. `http://host:8080/api/v1`.
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("invalid API URL {}: {}", base_url, e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("API URL must be http(s): {}", base_url);
        }

        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .user_agent(concat!("tontine/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header("Accept", "application/json");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    /// Send and decode a response whose `data` must be a `T`.
    async fn call<T: DeserializeOwned>(&self, req: RequestBuilder) -> WorkflowResult<T> {
        let data = send(req).await?.ok_or_else(|| {
            WorkflowError::Transport("schema mismatch: response carries no data".into())
        })?;
        serde_json::from_value(data)
            .map_err(|e| WorkflowError::Transport(format!("schema mismatch: {}", e)))
    }

    /// Send and ignore whatever `data` the response carries.
    async fn call_unit(&self, req: RequestBuilder) -> WorkflowResult<()> {
        send(req).await.map(|_| ())
    }
}

fn segment(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

pub(crate) async fn send(req: RequestBuilder) -> WorkflowResult<Option<Value>> {
    let resp = req.send().await?;
    let status = resp.status();
    let body = resp.text().await?;
    read_envelope(status, &body)
}

/// Turn a raw response into the envelope's `data`, or the error it reports.
pub(crate) fn read_envelope(status: StatusCode, body: &str) -> WorkflowResult<Option<Value>> {
    let envelope: Envelope<Value> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) if status.is_success() => {
            return Err(WorkflowError::Transport(format!(
                "schema mismatch: response is not an envelope: {}",
                e
            )))
        }
        Err(_) => {
            let kind = ErrorKind::from_status(status.as_u16());
            tracing::debug!(%status, "error response without an envelope");
            return Err(WorkflowError::from_kind(
                kind,
                format!("server returned {}", status),
            ));
        }
    };

    if envelope.success && status.is_success() {
        return Ok(envelope.data);
    }

    let (code, message) = match envelope.error {
        Some(err) => (err.code, err.message),
        None => (None, format!("server returned {}", status)),
    };
    let kind = code
        .as_deref()
        .and_then(ErrorKind::from_code)
        .unwrap_or_else(|| ErrorKind::from_status(status.as_u16()));
    Err(WorkflowError::from_kind(kind, message))
}

#[async_trait]
impl ValidationApi for ApiClient {
    async fn current_user(&self) -> WorkflowResult<User> {
        self.call(self.request(Method::GET, "/users/me")).await
    }

    async fn create_request(&self, draft: &NewValidationRequest) -> WorkflowResult<ValidationRequest> {
        draft.validate()?;
        self.call(self.request(Method::POST, "/validation-requests").json(draft))
            .await
    }

    async fn list_pending(&self) -> WorkflowResult<Vec<ValidationRequest>> {
        self.call(self.request(Method::GET, "/validation-requests/pending"))
            .await
    }

    async fn list_mine(&self, status: Option<RequestStatus>) -> WorkflowResult<Vec<ValidationRequest>> {
        let mut req = self.request(Method::GET, "/validation-requests/mine");
        if let Some(status) = status {
            req = req.query(&[("status", status.as_str())]);
        }
        self.call(req).await
    }

    async fn get_request(&self, id: &str) -> WorkflowResult<ValidationRequest> {
        self.call(self.request(Method::GET, &format!("/validation-requests/{}", segment(id))))
            .await
    }

    async fn accept(&self, id: &str) -> WorkflowResult<ValidationRequest> {
        self.call(self.request(
            Method::POST,
            &format!("/validation-requests/{}/accept", segment(id)),
        ))
        .await
    }

    async fn reject(&self, id: &str, reason: &str) -> WorkflowResult<ValidationRequest> {
        validate_rejection_reason(reason)?;
        let body = RejectBody {
            reason: reason.to_string(),
        };
        self.call(
            self.request(
                Method::POST,
                &format!("/validation-requests/{}/reject", segment(id)),
            )
            .json(&body),
        )
        .await
    }

    async fn list_eligible_approvers(&self) -> WorkflowResult<Vec<User>> {
        self.call(self.request(Method::GET, "/users/approvers")).await
    }

    async fn consume(&self, id: &str) -> WorkflowResult<ValidationRequest> {
        self.call(self.request(
            Method::POST,
            &format!("/validation-requests/{}/consume", segment(id)),
        ))
        .await
    }

    async fn release(&self, id: &str) -> WorkflowResult<ValidationRequest> {
        self.call(self.request(
            Method::POST,
            &format!("/validation-requests/{}/release", segment(id)),
        ))
        .await
    }
}

#[async_trait]
impl NotificationApi for ApiClient {
    async fn list_notifications(&self, unread_only: bool) -> WorkflowResult<Vec<Notification>> {
        self.call(
            self.request(Method::GET, "/notifications")
                .query(&[("unreadOnly", unread_only)]),
        )
        .await
    }

    async fn mark_notification_read(&self, id: &str) -> WorkflowResult<()> {
        self.call_unit(self.request(
            Method::POST,
            &format!("/notifications/{}/read", segment(id)),
        ))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request_json(status: &str) -> Value {
        json!({
            "id": "vr-1",
            "actionType": "DELETE_USER",
            "resourceType": "User",
            "resourceId": "u42",
            "resourceName": "Koffi",
            "reason": "Left the association",
            "initiatedBy": { "id": "a1", "name": "Awa" },
            "assignedApprover": "t1",
            "status": status,
            "createdAt": "2025-03-01T09:00:00Z",
            "expiresAt": "2025-03-04T09:00:00Z",
            "decidedAt": if status == "pending" { Value::Null } else { json!("2025-03-01T10:00:00Z") }
        })
    }

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::new(
            &format!("{}/api/v1", server.uri()),
            Some("tok-t1".into()),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    async fn error_kind_for(status: u16, body: Value) -> ErrorKind {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/validation-requests/vr-1/accept"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&server)
            .await;
        client(&server).accept("vr-1").await.unwrap_err().kind()
    }

    #[tokio::test]
    async fn test_accept_sends_bearer_and_decodes_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/validation-requests/vr-1/accept"))
            .and(header("authorization", "Bearer tok-t1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": true, "data": request_json("accepted") })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let decided = client(&server).accept("vr-1").await.unwrap();
        assert_eq!(decided.status, RequestStatus::Accepted);
        assert!(decided.decided_at.is_some());
    }

    #[tokio::test]
    async fn test_error_code_wins_over_status() {
        let kind = error_kind_for(
            400,
            json!({ "success": false, "error": { "message": "already accepted", "code": "CONFLICT" } }),
        )
        .await;
        assert_eq!(kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_status_used_when_code_missing() {
        for (status, expected) in [
            (409, ErrorKind::Conflict),
            (410, ErrorKind::Expired),
            (403, ErrorKind::Unauthorized),
            (404, ErrorKind::NotFound),
            (422, ErrorKind::Validation),
            (503, ErrorKind::Transport),
        ] {
            let kind = error_kind_for(status, json!({ "success": false, "error": { "message": "nope" } })).await;
            assert_eq!(kind, expected, "status {}", status);
        }
    }

    #[tokio::test]
    async fn test_internal_error_code_is_transport() {
        let kind = error_kind_for(
            500,
            json!({ "success": false, "error": { "message": "boom", "code": "INTERNAL_ERROR" } }),
        )
        .await;
        assert_eq!(kind, ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_non_envelope_error_body_falls_back_to_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"))
            .mount(&server)
            .await;
        let err = client(&server).accept("vr-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(!err.user_message().contains("html"));
    }

    #[tokio::test]
    async fn test_success_without_data_is_schema_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/validation-requests/vr-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .mount(&server)
            .await;
        let err = client(&server).get_request("vr-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.detail().contains("schema mismatch"));
    }

    #[tokio::test]
    async fn test_unknown_status_value_is_schema_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/validation-requests/vr-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": true, "data": request_json("approved") })),
            )
            .mount(&server)
            .await;
        let err = client(&server).get_request("vr-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_short_rejection_never_reaches_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let err = client(&server).reject("vr-1", "nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_reject_sends_reason_verbatim() {
        let server = MockServer::start().await;
        let mut rejected = request_json("rejected");
        rejected["rejectionReason"] = json!("  Member repaid the loan  ");
        Mock::given(method("POST"))
            .and(path("/api/v1/validation-requests/vr-1/reject"))
            .and(body_json(json!({ "reason": "  Member repaid the loan  " })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": rejected })))
            .expect(1)
            .mount(&server)
            .await;
        let decided = client(&server)
            .reject("vr-1", "  Member repaid the loan  ")
            .await
            .unwrap();
        assert_eq!(decided.rejection_reason.as_deref(), Some("  Member repaid the loan  "));
    }

    #[tokio::test]
    async fn test_timeout_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_json(json!({ "success": true, "data": [] })),
            )
            .mount(&server)
            .await;
        let client = ApiClient::new(
            &format!("{}/api/v1", server.uri()),
            None,
            Duration::from_millis(100),
        )
        .unwrap();
        let err = client.list_pending().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_list_mine_passes_status_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/validation-requests/mine"))
            .and(query_param("status", "rejected"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": [] })))
            .expect(1)
            .mount(&server)
            .await;
        assert!(client(&server)
            .list_mine(Some(RequestStatus::Rejected))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_mark_read_accepts_null_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/notifications/n%201/read"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": null })))
            .expect(1)
            .mount(&server)
            .await;
        client(&server).mark_notification_read("n 1").await.unwrap();
    }

    #[tokio::test]
    async fn test_second_consume_is_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/validation-requests/vr-1/consume"))
            .and(header("authorization", "Bearer tok-t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": request_json("accepted"),
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/validation-requests/vr-1/consume"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "success": false,
                "error": { "code": "CONFLICT", "message": "request vr-1 was already executed" },
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        assert_eq!(client.consume("vr-1").await.unwrap().status, RequestStatus::Accepted);
        assert_eq!(client.consume("vr-1").await.unwrap_err().kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        assert!(ApiClient::new("ftp://example.org", None, Duration::from_secs(1)).is_err());
        assert!(ApiClient::new("not a url", None, Duration::from_secs(1)).is_err());
    }
}
