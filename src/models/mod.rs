pub mod envelope;
pub mod notification;
pub mod user;
pub mod validation_request;
