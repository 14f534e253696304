//! Protocol-mode network pump
//!
//! Feeds DevTools network events into a [`NetworkHook`] so that capture runs
//! host-side instead of inside the page. Only XHR traffic is tracked.

use crate::error::{BrowserError, BrowserResult};
use async_trait::async_trait;
use base64::Engine as _;
use capture_core::{BodySource, CaptureError, CaptureResult, NetworkHook, ResponsePayload};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
    EventResponseReceived, GetResponseBodyParams, RequestId, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::EventFrameNavigated;
use chromiumoxide::Page;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};
use url::Url;

/// Reads response bodies through `Network.getResponseBody`
pub struct CdpBodySource {
    page: Page,
}

impl CdpBodySource {
    pub fn new(page: Page) -> Self {
        Self { page }
    }
}

/// Turn a protocol body into a payload; base64 bodies are raw bytes
pub fn payload_from_body(call_id: &str, body: String, base64_encoded: bool) -> CaptureResult<ResponsePayload> {
    if !base64_encoded {
        return Ok(ResponsePayload::Text(body));
    }
    base64::engine::general_purpose::STANDARD
        .decode(body.as_bytes())
        .map(ResponsePayload::Binary)
        .map_err(|e| CaptureError::BodyUnavailable {
            id: call_id.to_string(),
            reason: format!("invalid base64 body: {}", e),
        })
}

#[async_trait]
impl BodySource for CdpBodySource {
    async fn read_body(&self, call_id: &str) -> CaptureResult<ResponsePayload> {
        let response = self
            .page
            .execute(GetResponseBodyParams::new(RequestId::new(call_id)))
            .await
            .map_err(|e| CaptureError::BodyUnavailable {
                id: call_id.to_string(),
                reason: e.to_string(),
            })?;
        let body = response.result;
        payload_from_body(call_id, body.body, body.base64_encoded)
    }
}

/// Origin of a document URL, used to resolve relative targets
pub fn document_origin(url: &str) -> Option<Url> {
    let parsed = Url::parse(url).ok()?;
    let origin = parsed.origin();
    if !origin.is_tuple() {
        return None;
    }
    Url::parse(&origin.ascii_serialization()).ok()
}

/// Background task translating network events into hook transitions
pub struct NetworkPump {
    task: JoinHandle<()>,
}

impl NetworkPump {
    /// Enable the Network domain and start pumping events into `hook`
    pub async fn attach(page: Page, hook: Arc<Mutex<NetworkHook>>) -> BrowserResult<Self> {
        page.execute(EnableParams::default())
            .await
            .map_err(|e| BrowserError::Protocol(format!("Network.enable failed: {}", e)))?;

        let listen_err = |e: chromiumoxide::error::CdpError| BrowserError::Protocol(e.to_string());
        let mut requests = page.event_listener::<EventRequestWillBeSent>().await.map_err(listen_err)?;
        let mut responses = page.event_listener::<EventResponseReceived>().await.map_err(listen_err)?;
        let mut finished = page.event_listener::<EventLoadingFinished>().await.map_err(listen_err)?;
        let mut failed = page.event_listener::<EventLoadingFailed>().await.map_err(listen_err)?;
        let mut navigations = page.event_listener::<EventFrameNavigated>().await.map_err(listen_err)?;

        let source = CdpBodySource::new(page);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = requests.next() => {
                        if event.r#type != Some(ResourceType::Xhr) {
                            continue;
                        }
                        let id = event.request_id.inner().clone();
                        let mut hook = hook.lock().await;
                        hook.open(&id, &event.request.method, &event.request.url);
                        if let Err(e) = hook.send(&id) {
                            debug!("Dropping request {}: {}", id, e);
                        }
                    }
                    Some(event) = responses.next() => {
                        let id = event.request_id.inner();
                        let mut hook = hook.lock().await;
                        if hook.phase(id).is_some() {
                            if let Err(e) = hook.progress(id) {
                                trace!("Ignoring progress for {}: {}", id, e);
                            }
                        }
                    }
                    Some(event) = finished.next() => {
                        let id = event.request_id.inner();
                        let mut hook = hook.lock().await;
                        if hook.phase(id).is_none() {
                            continue;
                        }
                        match hook.complete(id, &source).await {
                            Ok(true) => debug!("Captured response for request {}", id),
                            Ok(false) => {}
                            Err(e) => error!("Capture failed for request {}: {}", id, e),
                        }
                    }
                    Some(event) = failed.next() => {
                        let mut hook = hook.lock().await;
                        if hook.abandon(event.request_id.inner()) {
                            debug!("Request {} failed: {}", event.request_id.inner(), event.error_text);
                        }
                    }
                    Some(event) = navigations.next() => {
                        if event.frame.parent_id.is_some() {
                            continue;
                        }
                        let mut hook = hook.lock().await;
                        let dropped = hook.replace_document(document_origin(&event.frame.url));
                        hook.buffer().reset().await;
                        info!(
                            "Document replaced ({}), dropped {} in-flight calls",
                            event.frame.url, dropped
                        );
                    }
                    else => break,
                }
            }
            debug!("Network event streams closed");
        });

        Ok(Self { task })
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for NetworkPump {
    fn drop(&mut self) {
        self.task.abort();
    }
}
