use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{ActionExecutor, ValidationApi, WorkflowResult};
use crate::errors::{ErrorKind, WorkflowError};
use crate::models::validation_request::{RequestStatus, ValidationRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Authorization {
    InFlight,
    Consumed,
}

/// Runs a sensitive action at most once per accepted request.
///
/// The authority holds the authorization: [`ValidationApi::consume`] claims
/// it before the action runs and [`ValidationApi::release`] hands it back if
/// the action fails, so separate gates (or separate processes) cannot replay
/// it. The local ledger only short-circuits repeats within this gate.
pub struct ExecutionGate {
    api: Arc<dyn ValidationApi>,
    executor: Arc<dyn ActionExecutor>,
    ledger: DashMap<String, Authorization>,
}

impl ExecutionGate {
    pub fn new(api: Arc<dyn ValidationApi>, executor: Arc<dyn ActionExecutor>) -> Self {
        Self {
            api,
            executor,
            ledger: DashMap::new(),
        }
    }

    /// Whether `request`, as held locally, still authorizes its action.
    pub fn is_executable(&self, request: &ValidationRequest) -> bool {
        request.status == RequestStatus::Accepted
            && request.decided_at.is_some()
            && request.consumed_at.is_none()
            && !self.ledger.contains_key(&request.id)
    }

    /// Same check against the authority's current copy. Any failure to
    /// fetch counts as "no".
    pub async fn can_execute(&self, request_id: &str) -> bool {
        match self.api.get_request(request_id).await {
            Ok(request) => self.is_executable(&request),
            Err(e) => {
                tracing::debug!(request_id, error = %e, "execution check failed");
                false
            }
        }
    }

    pub async fn execute(&self, request_id: &str) -> WorkflowResult<ValidationRequest> {
        let request = self.api.get_request(request_id).await?;
        match request.status {
            RequestStatus::Accepted => {}
            RequestStatus::Expired => {
                return Err(WorkflowError::Expired(format!(
                    "request {} expired before it was approved",
                    request_id
                )))
            }
            status => {
                return Err(WorkflowError::Conflict(format!(
                    "request {} is {}, not accepted",
                    request_id, status
                )))
            }
        }
        if request.decided_at.is_none() {
            return Err(WorkflowError::Transport(format!(
                "schema mismatch: accepted request {} has no decision time",
                request_id
            )));
        }

        if request.consumed_at.is_some() {
            self.ledger.insert(request_id.to_string(), Authorization::Consumed);
            return Err(WorkflowError::Conflict(format!(
                "request {} was already executed",
                request_id
            )));
        }

        self.reserve(request_id)?;
        let request = match self.api.consume(request_id).await {
            Ok(request) => request,
            Err(e) => {
                if e.kind() == ErrorKind::Conflict {
                    self.ledger.insert(request_id.to_string(), Authorization::Consumed);
                } else {
                    self.ledger.remove(request_id);
                }
                return Err(e);
            }
        };

        match self.executor.execute(&request).await {
            Ok(()) => {
                self.ledger.insert(request_id.to_string(), Authorization::Consumed);
                tracing::info!(
                    request_id,
                    action_type = %request.action_type,
                    resource_id = %request.resource_id,
                    "approved action executed"
                );
                Ok(request)
            }
            Err(e) => {
                if let Err(release_err) = self.api.release(request_id).await {
                    tracing::error!(
                        request_id,
                        error = %release_err,
                        "approved action failed and its authorization could not be released"
                    );
                }
                self.ledger.remove(request_id);
                tracing::warn!(request_id, error = %e, "approved action failed, authorization released");
                Err(e)
            }
        }
    }

    fn reserve(&self, request_id: &str) -> WorkflowResult<()> {
        match self.ledger.entry(request_id.to_string()) {
            Entry::Occupied(entry) => Err(WorkflowError::Conflict(match entry.get() {
                Authorization::InFlight => format!("request {} is already being executed", request_id),
                Authorization::Consumed => format!("request {} was already executed", request_id),
            })),
            Entry::Vacant(entry) => {
                entry.insert(Authorization::InFlight);
                Ok(())
            }
        }
    }
}
