#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use mockall::mock;
use tokio::sync::{broadcast, mpsc, Notify};

use vmask_client::{
    ClientResult, IntentReply, IntentRequest, IntentService, MaskRequest, MaskResponse,
    MaskService, TaskReceipt, TaskService, TaskSubmission,
};
use vmask_media::{MaskRaster, MediaResult, RasterLoader};
use vmask_models::{
    AssetId, ConversationResult, ObjectAction, Resolution, SampledFrame, TaskId, TaskStatus,
    TaskUpdate, WorkflowEvent,
};
use vmask_workflow::{AssetContext, Workflow, WorkflowConfig};

mock! {
    pub Mask {}

    #[async_trait]
    impl MaskService for Mask {
        async fn generate(&self, request: &MaskRequest) -> ClientResult<MaskResponse>;
    }
}

mock! {
    pub Tasks {}

    #[async_trait]
    impl TaskService for Tasks {
        async fn submit(&self, submission: &TaskSubmission) -> ClientResult<TaskReceipt>;
        async fn status(&self, task_id: &TaskId) -> ClientResult<TaskUpdate>;
    }
}

mock! {
    pub Intent {}

    #[async_trait]
    impl IntentService for Intent {
        async fn resolve(
            &self,
            request: &IntentRequest,
            deltas: Option<mpsc::UnboundedSender<String>>,
        ) -> ClientResult<IntentReply>;
    }
}

pub const SOURCE: Resolution = Resolution {
    width: 640,
    height: 360,
};

pub fn frame_ref(index: usize) -> String {
    format!("frames/frame_{index:05}.jpg")
}

pub fn asset(frames: usize) -> AssetContext {
    let frames = (0..frames)
        .map(|i| SampledFrame {
            index: i,
            timestamp_seconds: i as f64 * 0.2,
            image_ref: frame_ref(i),
        })
        .collect();
    AssetContext::new(AssetId::from("asset-1"), "https://x/video.mp4", SOURCE, frames)
}

pub fn fast_config() -> WorkflowConfig {
    WorkflowConfig {
        poll_interval: Duration::from_millis(5),
        ..WorkflowConfig::default()
    }
}

pub fn build(mask: impl MaskService + 'static, tasks: impl TaskService + 'static) -> Workflow {
    Workflow::builder(Arc::new(mask), Arc::new(tasks), Arc::new(MockIntent::new()))
        .config(fast_config())
        .rng_seed(42)
        .build()
}

pub fn actionable(prompt: &str) -> ConversationResult {
    ConversationResult {
        is_valid_request: true,
        object_exists: true,
        text_prompt: prompt.to_string(),
        action: ObjectAction::Remove,
        confidence: 0.9,
        clarification_needed: false,
        vision_matched: true,
        reasoning: "visible in frame".to_string(),
        assistant_message: format!("Removing the {prompt}"),
    }
}

pub fn clarification() -> ConversationResult {
    ConversationResult {
        is_valid_request: true,
        object_exists: true,
        text_prompt: "car".to_string(),
        confidence: 0.4,
        clarification_needed: true,
        assistant_message: "Which car do you mean?".to_string(),
        ..Default::default()
    }
}

pub fn preview(reference: &str) -> MaskResponse {
    MaskResponse {
        preview_or_mask_reference: reference.to_string(),
        is_video: false,
        prediction_id: Some("pred-1".to_string()),
    }
}

/// Task service double whose status calls walk through `script`, repeating
/// the last entry once it is reached.
pub fn scripted_tasks(
    task_id: &'static str,
    script: Vec<ClientResult<TaskUpdate>>,
) -> (MockTasks, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut tasks = MockTasks::new();
    tasks.expect_submit().times(1).returning(move |_| {
        Ok(TaskReceipt {
            task_id: TaskId::from(task_id),
            status: TaskStatus::Starting,
        })
    });
    tasks.expect_status().returning(move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        let idx = n.min(script.len().saturating_sub(1));
        script
            .get(idx)
            .map(clone_result)
            .unwrap_or_else(|| Ok(TaskUpdate::new(TaskStatus::Processing, 0.0)))
    });
    (tasks, calls)
}

fn clone_result(result: &ClientResult<TaskUpdate>) -> ClientResult<TaskUpdate> {
    match result {
        Ok(update) => Ok(update.clone()),
        Err(e) => Err(vmask_client::ClientError::ServiceUnavailable(e.to_string())),
    }
}

/// Wait for the first event matching `pred`, failing after two seconds.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<WorkflowEvent>, pred: F) -> WorkflowEvent
where
    F: Fn(&WorkflowEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event channel failed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for workflow event")
}

/// Everything already queued on the receiver.
pub fn drain(rx: &mut broadcast::Receiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Mask service that blocks every call until released.
pub struct GatedMask {
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
    pub response: MaskResponse,
}

impl GatedMask {
    pub fn new(response: MaskResponse) -> Self {
        Self {
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
            response,
        }
    }
}

#[async_trait]
impl MaskService for GatedMask {
    async fn generate(&self, _request: &MaskRequest) -> ClientResult<MaskResponse> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(self.response.clone())
    }
}

/// Raster loader returning one fixed raster for every reference.
pub struct StaticRaster(pub MaskRaster);

#[async_trait]
impl RasterLoader for StaticRaster {
    async fn load(&self, _reference: &str, _is_video: bool) -> MediaResult<MaskRaster> {
        Ok(self.0.clone())
    }
}

/// 320x180 raster (half the source resolution) with two green blobs on
/// black: `[50,150)x[50,120)` and `[200,300)x[50,120)`.
pub fn two_blob_raster() -> MaskRaster {
    let mut image = RgbaImage::from_pixel(320, 180, Rgba([0, 0, 0, 255]));
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let in_rows = (50..120).contains(&y);
        if in_rows && ((50..150).contains(&x) || (200..300).contains(&x)) {
            *pixel = Rgba([0, 200, 0, 255]);
        }
    }
    MaskRaster::new(image)
}
