use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};

use crate::models::validation_request::{ActionType, ValidationRequest};
use crate::workflow::{ActionExecutor, WorkflowResult};

/// Header carrying the authorizing request id to the collaborator service.
pub const VALIDATION_REQUEST_HEADER: &str = "X-Validation-Request-Id";

/// Calls the user and tontine management endpoints once a request has been
/// accepted.
pub struct HttpActionExecutor {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpActionExecutor {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        url::Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("invalid API URL {}: {}", base_url, e))?;
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }
}

/// Method and path of the collaborator call for `action` on `resource_id`.
pub fn endpoint(action: ActionType, resource_id: &str) -> (Method, String) {
    let id = urlencoding::encode(resource_id);
    match action {
        ActionType::ActivateUser => (Method::POST, format!("/users/{}/activate", id)),
        ActionType::DeactivateUser => (Method::POST, format!("/users/{}/deactivate", id)),
        ActionType::DeleteUser => (Method::DELETE, format!("/users/{}", id)),
        ActionType::BlockTontine => (Method::POST, format!("/tontines/{}/block", id)),
        ActionType::UnblockTontine => (Method::POST, format!("/tontines/{}/unblock", id)),
        ActionType::DeleteTontine => (Method::DELETE, format!("/tontines/{}", id)),
    }
}

#[async_trait]
impl ActionExecutor for HttpActionExecutor {
    async fn execute(&self, request: &ValidationRequest) -> WorkflowResult<()> {
        let (method, path) = endpoint(request.action_type, &request.resource_id);
        tracing::debug!(request_id = %request.id, %method, %path, "calling action endpoint");

        let mut req = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header(VALIDATION_REQUEST_HEADER, &request.id);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        super::send(req).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::models::validation_request::{RequestStatus, ResourceType, UserRef};
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn accepted(action: ActionType) -> ValidationRequest {
        let now = Utc::now();
        ValidationRequest {
            id: "vr-9".into(),
            action_type: action,
            resource_type: action.resource_type(),
            resource_id: "tn7".into(),
            resource_name: "Tontine du quartier".into(),
            reason: "Repeated late payments".into(),
            initiated_by: UserRef { id: "a1".into(), name: "Awa".into() },
            assigned_approver: "t1".into(),
            status: RequestStatus::Accepted,
            rejection_reason: None,
            created_at: now,
            expires_at: now + chrono::Duration::hours(72),
            decided_at: Some(now),
            consumed_at: None,
        }
    }

    #[test]
    fn test_every_action_has_an_endpoint_on_its_resource() {
        for action in ActionType::ALL {
            let (_, path) = endpoint(action, "x");
            let prefix = match action.resource_type() {
                ResourceType::User => "/users/",
                ResourceType::Tontine => "/tontines/",
            };
            assert!(path.starts_with(prefix), "{} -> {}", action, path);
        }
        assert_eq!(endpoint(ActionType::DeleteTontine, "tn7").0, Method::DELETE);
    }

    #[tokio::test]
    async fn test_execute_forwards_request_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tontines/tn7/block"))
            .and(header("x-validation-request-id", "vr-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": null })))
            .expect(1)
            .mount(&server)
            .await;

        let executor = HttpActionExecutor::new(&server.uri(), None, Duration::from_secs(2)).unwrap();
        executor.execute(&accepted(ActionType::BlockTontine)).await.unwrap();
    }

    #[tokio::test]
    async fn test_collaborator_refusal_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(403).set_body_json(
                json!({ "success": false, "error": { "message": "not validated", "code": "FORBIDDEN" } }),
            ))
            .mount(&server)
            .await;

        let executor = HttpActionExecutor::new(&server.uri(), None, Duration::from_secs(2)).unwrap();
        let err = executor
            .execute(&accepted(ActionType::DeleteTontine))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }
}
