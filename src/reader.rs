//! Client-side reader sync engine.
//!
//! Reading clients embed a third-party rendering engine (EPUB or PDF)
//! that emits events over a message bridge. This module owns everything
//! on this side of that bridge: the [`ReaderEvent`] wire protocol, the
//! debounced [`ProgressSyncer`] that persists reading positions, and the
//! [`AnnotationBridge`] that turns selections into stored annotations
//! and replays them on load.
//!
//! Progress is best-effort telemetry, not transactional state: persistence
//! failures are logged and swallowed, there is no retry queue, and
//! concurrent writers resolve by last writer wins.

use crate::db::Annotation;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Default quiet window for progress persistence.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(10);

/// Event emitted by the embedded rendering engine.
///
/// Wire format is a tagged JSON object, e.g.
/// `{"type":"locationChange","progress":0.42}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReaderEvent {
    /// Rendering engine finished loading; stored annotations may be replayed.
    Ready,
    /// Normalized position changed (0.0 to 1.0).
    #[serde(rename_all = "camelCase")]
    LocationChange {
        /// Normalized scroll/pagination position.
        progress: f64,
    },
    /// Text was selected.
    #[serde(rename_all = "camelCase")]
    Selection {
        /// Selected text.
        text: String,
        /// CFI range token addressing the selection.
        location: String,
    },
    /// Plain tap outside any overlay.
    Tapped,
    /// An existing highlight overlay was clicked.
    #[serde(rename_all = "camelCase")]
    HighlightClicked {
        /// CFI range token of the clicked overlay.
        location: String,
    },
}

// ============================================================================
// PROGRESS SYNC
// ============================================================================

/// Destination for persisted progress, usually the REST API.
pub trait ProgressSink: Send + Sync + 'static {
    /// Persist a progress value for an item.
    fn persist(&self, item_id: &str, progress: f64) -> impl Future<Output = Result<()>> + Send;
}

enum SyncMessage {
    Update(f64),
    Flush(oneshot::Sender<()>),
}

/// Debounced reading-progress syncer.
///
/// Location changes update local state immediately; persistence is
/// coalesced so the sink sees at most one call per debounce window.
/// The timer arms on the first update of a burst, so a continuous
/// stream of events still persists once per window rather than never.
/// [`ProgressSyncer::shutdown`] flushes any pending position > 0.
pub struct ProgressSyncer {
    tx: mpsc::UnboundedSender<SyncMessage>,
    position: Arc<Mutex<f64>>,
    task: tokio::task::JoinHandle<()>,
}

impl ProgressSyncer {
    /// Spawn a syncer for one item.
    ///
    /// In guest mode (`authenticated == false`) local state still updates
    /// but nothing is ever persisted; this is a deliberate soft-fail.
    pub fn spawn<S: ProgressSink>(
        item_id: impl Into<String>,
        sink: S,
        authenticated: bool,
        window: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let item_id = item_id.into();
        let task = tokio::spawn(sync_loop(item_id, sink, authenticated, window, rx));

        Self {
            tx,
            position: Arc::new(Mutex::new(0.0)),
            task,
        }
    }

    /// Record a location change from the reader.
    pub fn location_changed(&self, progress: f64) {
        *self.position.lock() = progress;
        let _ = self.tx.send(SyncMessage::Update(progress));
    }

    /// Current local position (updated immediately, before any persist).
    pub fn position(&self) -> f64 {
        *self.position.lock()
    }

    /// Flush any pending progress and stop the syncer.
    ///
    /// Called on unmount/navigation-away so the last position is not lost.
    pub async fn shutdown(self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(SyncMessage::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        let _ = self.task.await;
    }
}

async fn sync_loop<S: ProgressSink>(
    item_id: String,
    sink: S,
    authenticated: bool,
    window: Duration,
    mut rx: mpsc::UnboundedReceiver<SyncMessage>,
) {
    let mut pending: Option<f64> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        let timer = async {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            msg = rx.recv() => match msg {
                Some(SyncMessage::Update(progress)) => {
                    pending = Some(progress);
                    // Arm on the first event of a burst only; later events
                    // coalesce into the same trailing persist.
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + window);
                    }
                }
                Some(SyncMessage::Flush(ack)) => {
                    if let Some(progress) = pending.take()
                        && progress > 0.0
                    {
                        persist_quietly(&sink, &item_id, progress, authenticated).await;
                    }
                    let _ = ack.send(());
                    return;
                }
                None => {
                    if let Some(progress) = pending.take()
                        && progress > 0.0
                    {
                        persist_quietly(&sink, &item_id, progress, authenticated).await;
                    }
                    return;
                }
            },
            _ = timer => {
                if let Some(progress) = pending.take() {
                    persist_quietly(&sink, &item_id, progress, authenticated).await;
                }
                deadline = None;
            }
        }
    }
}

/// Persist progress, swallowing failures. Guests are skipped silently.
async fn persist_quietly<S: ProgressSink>(
    sink: &S,
    item_id: &str,
    progress: f64,
    authenticated: bool,
) {
    if !authenticated {
        tracing::debug!(item = item_id, "Guest mode, skipping progress sync");
        return;
    }

    if let Err(e) = sink.persist(item_id, progress).await {
        tracing::warn!(item = item_id, error = %e, "Progress sync failed");
    }
}

// ============================================================================
// ANNOTATION BRIDGE
// ============================================================================

/// Destination for annotation mutations, usually the REST API.
pub trait AnnotationStore {
    /// Create an annotation and return the stored record.
    fn create(
        &self,
        item_id: &str,
        text_location: Option<&str>,
        color: &str,
        note: Option<&str>,
        is_note: bool,
    ) -> impl Future<Output = Result<Annotation>> + Send;

    /// Delete an annotation by ID.
    fn delete(&self, id: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Overlay instruction for the rendering engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    /// CFI range token to decorate.
    pub location: String,
    /// Highlight color.
    pub color: String,
}

/// Pending text selection awaiting a highlight/note decision.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Selected text.
    pub text: String,
    /// CFI range token.
    pub location: String,
}

/// Translates reader selection events into persisted annotations and
/// replays stored annotations back into the rendering engine.
pub struct AnnotationBridge<S> {
    item_id: String,
    store: S,
    authenticated: bool,
    annotations: Vec<Annotation>,
    selection: Option<Selection>,
}

impl<S: AnnotationStore> AnnotationBridge<S> {
    /// Create a bridge for one item.
    pub fn new(item_id: impl Into<String>, store: S, authenticated: bool) -> Self {
        Self {
            item_id: item_id.into(),
            store,
            authenticated,
            annotations: Vec::new(),
            selection: None,
        }
    }

    /// Load previously stored annotations and return the overlays to
    /// re-apply. Each overlay is independent; order does not matter.
    pub fn load(&mut self, annotations: Vec<Annotation>) -> Vec<Overlay> {
        self.annotations = annotations;
        self.annotations
            .iter()
            .filter_map(|a| {
                a.text_location.as_ref().map(|loc| Overlay {
                    location: loc.clone(),
                    color: a.highlight_color.clone(),
                })
            })
            .collect()
    }

    /// Record a selection event; the UI offers "highlight" or "add note".
    pub fn on_selection(&mut self, text: impl Into<String>, location: impl Into<String>) {
        self.selection = Some(Selection {
            text: text.into(),
            location: location.into(),
        });
    }

    /// The currently pending selection, if any.
    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// Clear the pending selection (tap outside, dismissed menu).
    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Persist the pending selection as a highlight.
    pub async fn create_highlight(&mut self, color: &str) -> Result<Annotation> {
        let selection = self
            .selection
            .clone()
            .ok_or_else(|| AppError::Validation("No text selected".to_string()))?;

        self.create_at(Some(&selection.location), color, None, false)
            .await
    }

    /// Persist the pending selection as a highlight with a note attached.
    pub async fn create_note_on_selection(&mut self, color: &str, note: &str) -> Result<Annotation> {
        let selection = self
            .selection
            .clone()
            .ok_or_else(|| AppError::Validation("No text selected".to_string()))?;

        self.create_at(Some(&selection.location), color, Some(note), true)
            .await
    }

    /// Persist a free-form note not anchored to any location.
    pub async fn create_free_note(&mut self, note: &str) -> Result<Annotation> {
        self.create_at(None, "yellow", Some(note), true).await
    }

    async fn create_at(
        &mut self,
        location: Option<&str>,
        color: &str,
        note: Option<&str>,
        is_note: bool,
    ) -> Result<Annotation> {
        if !self.authenticated {
            return Err(AppError::Unauthorized(
                "Log in to save annotations".to_string(),
            ));
        }

        // Client-side duplicate pre-check against the fetched list. Racy
        // across devices; the server does not enforce it.
        if let Some(loc) = location
            && self
                .annotations
                .iter()
                .any(|a| a.text_location.as_deref() == Some(loc))
        {
            return Err(AppError::Conflict(
                "Highlight already exists at this location".to_string(),
            ));
        }

        let created = self
            .store
            .create(&self.item_id, location, color, note, is_note)
            .await?;

        self.annotations.push(created.clone());
        self.selection = None;
        Ok(created)
    }

    /// Resolve a clicked overlay back to its annotation.
    ///
    /// First step of the click-then-confirm delete interaction.
    pub fn resolve_click(&self, location: &str) -> Option<&Annotation> {
        self.annotations
            .iter()
            .find(|a| a.text_location.as_deref() == Some(location))
    }

    /// Delete an annotation: removes the persisted record and the local
    /// bookkeeping so the overlay can be torn down.
    pub async fn remove(&mut self, id: &str) -> Result<()> {
        self.store.delete(id).await?;
        self.annotations.retain(|a| a.id != id);
        Ok(())
    }

    /// Annotations currently known to the bridge.
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }
}

// ============================================================================
// ACTIVITY LOGGING
// ============================================================================

/// Destination for client activity events.
pub trait ActivityStore {
    /// Record one activity event.
    fn log(
        &self,
        action_type: &str,
        affected_resource: Option<&str>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Fire-and-forget activity logging. Guests are skipped; failures are
/// logged and never surfaced to the caller.
pub async fn log_activity<S: ActivityStore>(
    store: &S,
    authenticated: bool,
    action_type: &str,
    affected_resource: Option<&str>,
) {
    if !authenticated {
        return;
    }

    if let Err(e) = store.log(action_type, affected_resource).await {
        tracing::warn!(action = action_type, error = %e, "Activity log failed");
    }
}
