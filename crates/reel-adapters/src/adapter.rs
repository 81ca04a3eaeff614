//! The adapter seam shared by every external service.

use async_trait::async_trait;
use reel_models::{AssetRef, PublishReceipt, SubjectMetadata, SubjectQuery};

use crate::elevenlabs::{Narration, NarrationRequest};
use crate::error::AdapterResult;
use crate::openai::{ScriptDraft, ScriptRequest};
use crate::pexels::VisualRequest;
use crate::youtube::UploadRequest;

/// A typed request/response call against one external service.
///
/// Implementations classify every failure into the failure taxonomy via
/// [`AdapterError::kind`](crate::AdapterError::kind); retries and
/// backoff are the caller's concern.
#[async_trait]
pub trait Adapter: Send + Sync {
    type Request: Send + Sync;
    type Response: Send;

    /// Short service name used in logs and metrics labels.
    fn name(&self) -> &'static str;

    /// Perform one call.
    async fn invoke(&self, request: &Self::Request) -> AdapterResult<Self::Response>;

    /// Cheap connectivity and credential check. Returns a human-readable
    /// summary such as remaining quota.
    async fn probe(&self) -> AdapterResult<String>;
}

pub type SubjectAdapter = dyn Adapter<Request = SubjectQuery, Response = SubjectMetadata>;
pub type ScriptAdapter = dyn Adapter<Request = ScriptRequest, Response = ScriptDraft>;
pub type NarrationAdapter = dyn Adapter<Request = NarrationRequest, Response = Narration>;
pub type VisualAdapter = dyn Adapter<Request = VisualRequest, Response = Vec<AssetRef>>;
pub type UploadAdapter = dyn Adapter<Request = UploadRequest, Response = PublishReceipt>;
