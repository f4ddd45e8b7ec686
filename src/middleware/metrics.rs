//! Prometheus counters for the validation workflow.
//!
//! Each authority owns its own registry so several instances (tests, CLI)
//! can coexist. The `/metrics` handler renders it in text format.

use prometheus::{opts, Encoder, IntCounterVec, Registry, TextEncoder};

use crate::models::validation_request::ActionType;

/// Outcome label of a decision attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    Accepted,
    Rejected,
    Expired,
    Conflict,
}

impl DecisionOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::Accepted => "accepted",
            DecisionOutcome::Rejected => "rejected",
            DecisionOutcome::Expired => "expired",
            DecisionOutcome::Conflict => "conflict",
        }
    }
}

pub struct WorkflowMetrics {
    registry: Registry,
    requests_created: IntCounterVec,
    decisions: IntCounterVec,
}

impl WorkflowMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests_created = IntCounterVec::new(
            opts!(
                "tontine_validation_requests_created_total",
                "Validation requests created"
            ),
            &["action_type"],
        )?;
        registry.register(Box::new(requests_created.clone()))?;

        let decisions = IntCounterVec::new(
            opts!(
                "tontine_validation_decisions_total",
                "Decision attempts on validation requests, by outcome"
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(decisions.clone()))?;

        Ok(Self {
            registry,
            requests_created,
            decisions,
        })
    }

    pub fn record_created(&self, action: ActionType) {
        self.requests_created
            .with_label_values(&[action.as_str()])
            .inc();
    }

    pub fn record_decision(&self, outcome: DecisionOutcome) {
        self.decisions.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn decisions(&self, outcome: DecisionOutcome) -> u64 {
        self.decisions.with_label_values(&[outcome.as_str()]).get()
    }

    /// Encode all registered metrics as Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

// ── Tests ─────────────────────────────────────────────────────
