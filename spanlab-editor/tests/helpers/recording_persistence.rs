//! In-memory Persistence that records calls
//!
//! Every request is recorded before the configured delay elapses, so tests
//! can count requests that are still in flight.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use spanlab_editor::persistence::{DraftTarget, Persistence, SubmissionBody};
use spanlab_editor::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Submit { task_id: i64, body: SubmissionBody },
    Update { task_id: i64, pk: i64, body: SubmissionBody },
    CreateDraft { target: DraftTarget, body: Map<String, Value> },
    UpdateDraft { draft_id: i64, body: Map<String, Value> },
    DeleteDraft { draft_id: i64 },
    DeleteAnnotation { task_id: i64, pk: i64 },
    SaveOffset { task_id: i64, meta: Value },
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Call::Submit { .. } => "submit",
            Call::Update { .. } => "update",
            Call::CreateDraft { .. } => "create_draft",
            Call::UpdateDraft { .. } => "update_draft",
            Call::DeleteDraft { .. } => "delete_draft",
            Call::DeleteAnnotation { .. } => "delete_annotation",
            Call::SaveOffset { .. } => "save_offset",
        }
    }
}

pub struct RecordingPersistence {
    calls: Mutex<Vec<Call>>,
    delay: Duration,
    failing: AtomicBool,
    next_id: AtomicI64,
}

impl RecordingPersistence {
    /// Answers immediately; ids handed out start at 100
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            failing: AtomicBool::new(false),
            next_id: AtomicI64::new(100),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.name() == name).count()
    }

    async fn answer(&self, call: Call, response: impl FnOnce(i64) -> Value) -> Result<Value> {
        self.calls.lock().unwrap().push(call);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Api {
                status: 500,
                message: "backend unavailable".to_string(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(response(id))
    }
}

impl Default for RecordingPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Persistence for RecordingPersistence {
    async fn submit(&self, task_id: i64, body: &SubmissionBody) -> Result<Value> {
        let call = Call::Submit {
            task_id,
            body: body.clone(),
        };
        self.answer(call, |id| json!({ "id": id })).await
    }

    async fn update(&self, task_id: i64, pk: i64, body: &SubmissionBody) -> Result<Value> {
        let call = Call::Update {
            task_id,
            pk,
            body: body.clone(),
        };
        self.answer(call, move |_| json!({ "id": pk })).await
    }

    async fn create_draft(&self, target: DraftTarget, body: &Map<String, Value>) -> Result<Value> {
        let call = Call::CreateDraft {
            target,
            body: body.clone(),
        };
        self.answer(call, |id| json!({ "id": id })).await
    }

    async fn update_draft(&self, draft_id: i64, body: &Map<String, Value>) -> Result<Value> {
        let call = Call::UpdateDraft {
            draft_id,
            body: body.clone(),
        };
        self.answer(call, move |_| json!({ "id": draft_id })).await
    }

    async fn delete_draft(&self, draft_id: i64) -> Result<()> {
        self.answer(Call::DeleteDraft { draft_id }, |_| Value::Null).await?;
        Ok(())
    }

    async fn delete_annotation(&self, task_id: i64, pk: i64) -> Result<()> {
        self.answer(Call::DeleteAnnotation { task_id, pk }, |_| Value::Null).await?;
        Ok(())
    }

    async fn save_offset(&self, task_id: i64, meta: &Value) -> Result<Value> {
        let call = Call::SaveOffset {
            task_id,
            meta: meta.clone(),
        };
        let echoed = meta.clone();
        self.answer(call, move |_| json!({ "id": task_id, "meta": echoed })).await
    }
}
