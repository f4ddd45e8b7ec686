//! Shared fixtures for the workflow unit tests: an in-memory authority with
//! a small cast of users and a hand-driven clock.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use crate::authority::{Authority, AuthoritySettings, ManualClock, Session};
use crate::models::user::{Role, User};
use crate::models::validation_request::{ActionType, NewValidationRequest, ResourceType};
use crate::notification::webhook::WebhookNotifier;
use crate::store::memory::MemoryStore;
use crate::store::Store;

pub(crate) struct Fixture {
    pub authority: Arc<Authority>,
    pub clock: Arc<ManualClock>,
    pub admin: Session,
    pub treasurer: Session,
    pub other_treasurer: Session,
}

pub(crate) fn user(id: &str, name: &str, role: Role) -> User {
    User {
        id: id.into(),
        name: name.into(),
        role,
        is_active: true,
    }
}

pub(crate) async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let admin = user("a1", "Awa", Role::Admin);
    let treasurer = user("t1", "Fatou", Role::Treasurer);
    let other_treasurer = user("t2", "Moussa", Role::Treasurer);
    for u in [&admin, &treasurer, &other_treasurer] {
        store.upsert_user(u, None).await.unwrap();
    }

    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()));
    let authority = Arc::new(
        Authority::new(
            store,
            clock.clone(),
            AuthoritySettings::default(),
            WebhookNotifier::disabled(),
        )
        .unwrap(),
    );

    Fixture {
        admin: authority.session(admin),
        treasurer: authority.session(treasurer),
        other_treasurer: authority.session(other_treasurer),
        authority,
        clock,
    }
}

pub(crate) fn draft(approver: &str) -> NewValidationRequest {
    NewValidationRequest {
        action_type: ActionType::BlockTontine,
        resource_type: ResourceType::Tontine,
        resource_id: "tn1".into(),
        resource_name: "Tontine des commerçantes".into(),
        reason: "Three cotisations missed in a row".into(),
        assigned_approver: approver.into(),
    }
}
