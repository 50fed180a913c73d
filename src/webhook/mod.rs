//! Webhook ingestion: HTTP endpoint, payload validation, and review creation.

pub mod event;
pub mod ingest;
pub mod server;
pub mod validator;

pub use event::{ChangeDescriptor, EventKind, MergeRequestEvent};
pub use ingest::{IngestError, IngestOutcome, RejectReason, WebhookIngestor};
pub use server::{router, serve, AppState};
pub use validator::{classify_payload, verify_token, Classification};
