use std::sync::Arc;

use thiserror::Error;

use crate::agent_engine::journal::HistoryJournal;
use crate::agent_engine::state::{ActionKind, ActionOutcome, CycleState, FullState, MapSource};
use crate::config::AnchorConfig;
use crate::errors::{AnchorResult, BackendFailure};
use crate::executor::backend::Backend;
use crate::memory::fingerprint::{fingerprint, Fingerprint};
use crate::memory::store::{CacheEntry, FingerprintStore};
use crate::perception::action_gate::{ActionGate, GateVerdict};
use crate::perception::scene::describe_scene;
use crate::perception::traits::{VisionEngine, VisionLoader};
use crate::perception::types::{SemanticMap, WindowMeta};
use crate::watchdog::{Watchdog, WatchdogError};

/// Tracing target for the per-attempt audit trail.
pub const AUDIT_TARGET: &str = "seeclaw_anchor::audit";

/// Why the structural query did not produce metadata this cycle.
#[derive(Debug, Error)]
pub enum MetaFailure {
    #[error("backend failure: {0}")]
    Backend(#[from] BackendFailure),

    #[error("watchdog: {0}")]
    Watchdog(#[source] WatchdogError<BackendFailure>),
}

/// Reconciles remembered and freshly observed UI state, and gates every
/// physical action behind identification plus a perceptual check.
///
/// All operations take `&mut self` and run strictly one after another; the
/// only other process involved is the watchdog's metadata worker.
pub struct Orchestrator {
    config: AnchorConfig,
    backend: Arc<dyn Backend>,
    vision: Option<Box<dyn VisionEngine>>,
    vision_loader: VisionLoader,
    store: FingerprintStore,
    journal: HistoryJournal,
    gate: ActionGate,
    watchdog: Watchdog,
    state: CycleState,
}

impl Orchestrator {
    /// Opens the store and journal at the configured paths.
    pub fn new(
        config: AnchorConfig,
        backend: Arc<dyn Backend>,
        vision_loader: VisionLoader,
    ) -> AnchorResult<Self> {
        let store = FingerprintStore::open(&config.storage.db_path)?
            .with_max_age(config.storage.cache_max_age());
        let journal = HistoryJournal::open(config.storage.journal_path.clone())?;
        Ok(Self::with_parts(config, backend, vision_loader, store, journal))
    }

    pub fn with_parts(
        config: AnchorConfig,
        backend: Arc<dyn Backend>,
        vision_loader: VisionLoader,
        store: FingerprintStore,
        journal: HistoryJournal,
    ) -> Self {
        tracing::info!(
            meta_timeout_ms = config.watchdog.meta_timeout_ms,
            min_confidence = config.vision.min_confidence,
            "orchestrator ready"
        );
        Self {
            gate: ActionGate::new(config.gate.clone()),
            config,
            backend,
            vision: None,
            vision_loader,
            store,
            journal,
            watchdog: Watchdog::new(),
            state: CycleState::Start,
        }
    }

    /// Last stage reached by `get_full_state`.
    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn journal(&self) -> &HistoryJournal {
        &self.journal
    }

    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    fn transition(&mut self, next: CycleState) {
        tracing::debug!(from = ?self.state, to = ?next, "cycle transition");
        self.state = next;
    }

    /// Constructs the vision engine on first use; later calls reuse it.
    fn vision(&mut self) -> AnchorResult<&dyn VisionEngine> {
        let engine = match self.vision.take() {
            Some(engine) => engine,
            None => {
                tracing::info!("loading vision engine");
                (self.vision_loader)()?
            }
        };
        Ok(&**self.vision.insert(engine))
    }

    /// Structural query through the watchdog, as an explicit result.
    async fn query_meta(&self) -> Result<WindowMeta, MetaFailure> {
        let call = self.backend.window_meta_call();
        match self
            .watchdog
            .run_isolated::<WindowMeta, BackendFailure>(&call, self.config.watchdog.meta_timeout())
            .await
        {
            Ok(meta) => Ok(meta),
            Err(WatchdogError::Call(failure)) => Err(MetaFailure::Backend(failure)),
            Err(other) => Err(MetaFailure::Watchdog(other)),
        }
    }

    /// Window metadata for this cycle; never fails, falls back to the display.
    async fn resolve_meta(&self) -> WindowMeta {
        match self.query_meta().await {
            Ok(meta) => meta,
            Err(failure) => {
                let fallback = self.backend.fallback_meta();
                tracing::warn!(
                    error = %failure,
                    fallback = %fallback.title,
                    "window metadata unavailable; using fallback"
                );
                fallback
            }
        }
    }

    /// One full cycle: metadata, fingerprint, cache lookup or vision pass.
    pub async fn get_full_state(&mut self, force_refresh: bool) -> AnchorResult<FullState> {
        self.transition(CycleState::Start);
        self.transition(CycleState::Meta);
        let meta = self.resolve_meta().await;
        let fp = fingerprint(&meta);
        let screenshot = self.backend.capture_pixels(&meta.rect).await?;

        let cached = if force_refresh {
            None
        } else {
            self.store.recall(&fp)?.filter(|entry| !entry.is_empty())
        };

        let (semantic_map, source) = match cached {
            Some(entry) => {
                self.transition(CycleState::CacheHit);
                tracing::info!(fingerprint = %fp, title = %meta.title, elements = entry.len(), "cache hit");
                (entry.to_semantic_map(&meta.rect), MapSource::Memory)
            }
            None => {
                self.transition(CycleState::CacheMiss);
                tracing::info!(fingerprint = %fp, title = %meta.title, force_refresh, "cache miss; analyzing window");
                let map = self.observe(&meta, &screenshot).await?;
                // A fallback fingerprint covers whatever app is in front; never remember it.
                if meta.is_fallback() {
                    tracing::debug!(fingerprint = %fp, "fallback metadata; map not persisted");
                } else {
                    self.store.persist(&fp, &CacheEntry::from_map(&map))?;
                }
                (map, MapSource::Vision)
            }
        };

        self.transition(CycleState::Ready);
        Ok(FullState {
            meta,
            fingerprint: fp,
            semantic_map,
            screenshot,
            source,
        })
    }

    /// Vision pass over the captured window, dropping low-confidence labels.
    async fn observe(
        &mut self,
        meta: &WindowMeta,
        screenshot: &image::RgbImage,
    ) -> AnchorResult<SemanticMap> {
        let min_confidence = self.config.vision.min_confidence;
        let detections = self.vision()?.detect_elements(screenshot, &meta.rect).await?;

        let total = detections.len();
        let mut map = SemanticMap::new();
        for detection in detections {
            if detection.confidence < min_confidence {
                tracing::debug!(
                    text = %detection.text,
                    confidence = detection.confidence,
                    "detection below threshold; dropped"
                );
                continue;
            }
            map.insert_detection(detection, &meta.rect);
        }

        tracing::debug!(total, kept = map.len(), "vision pass complete");
        Ok(map)
    }

    /// Re-derives the map, then clicks or types on `id` if it passes identification and the gate.
    pub async fn execute_action(
        &mut self,
        id: &str,
        kind: ActionKind,
        text: Option<&str>,
    ) -> AnchorResult<ActionOutcome> {
        let result = self.attempt_action(id, kind, text).await;
        audit(id, kind, &result);
        result
    }

    async fn attempt_action(
        &mut self,
        id: &str,
        kind: ActionKind,
        text: Option<&str>,
    ) -> AnchorResult<ActionOutcome> {
        let state = self.get_full_state(false).await?;

        let Some(element) = state.semantic_map.get(id) else {
            return Ok(ActionOutcome::IdentificationFailure { id: id.to_string() });
        };
        let position = element.position;

        let target = state.meta.rect.to_local(position);
        if let GateVerdict::Reject { density, reason } = self.gate.verify(target, &state.screenshot) {
            tracing::debug!(id, ?reason, density, "gate rejected target");
            return Ok(ActionOutcome::VisualMismatch {
                id: id.to_string(),
                position,
                density,
            });
        }

        match (kind, text) {
            (ActionKind::Type, Some(text)) => self.backend.type_text(text, Some(position)).await?,
            _ => self.backend.click(position).await?,
        }

        self.journal.record_step(id, &state.meta.title)?;
        Ok(ActionOutcome::Performed {
            id: id.to_string(),
            kind,
            position,
        })
    }

    /// Markdown scene report. Without a map a full cycle is run; with one,
    /// only the window metadata is refreshed.
    pub async fn scene_description(&mut self, map: Option<&SemanticMap>) -> AnchorResult<String> {
        match map {
            Some(map) => {
                let meta = self.resolve_meta().await;
                Ok(describe_scene(&meta, map))
            }
            None => {
                let state = self.get_full_state(false).await?;
                Ok(describe_scene(&state.meta, &state.semantic_map))
            }
        }
    }

    /// Drops the cached map of the window currently in front.
    pub async fn invalidate_current(&mut self) -> AnchorResult<Fingerprint> {
        let meta = self.resolve_meta().await;
        let fp = fingerprint(&meta);
        self.store.invalidate(&fp)?;
        Ok(fp)
    }

    pub fn resume_instructions(&self) -> String {
        self.journal.resume_instructions()
    }
}

fn audit(id: &str, kind: ActionKind, result: &AnchorResult<ActionOutcome>) {
    match result {
        Ok(ActionOutcome::Performed { position, .. }) => {
            tracing::info!(target: AUDIT_TARGET, event = "ACTION", id, ?kind, %position, "action performed");
        }
        Ok(ActionOutcome::IdentificationFailure { .. }) => {
            tracing::warn!(target: AUDIT_TARGET, event = "IDENTIFICATION_FAILURE", id, ?kind, "id not found in semantic map");
        }
        Ok(ActionOutcome::VisualMismatch { position, density, .. }) => {
            tracing::warn!(
                target: AUDIT_TARGET,
                event = "SAFETY_HALT",
                id,
                ?kind,
                %position,
                density,
                "target looks invalid visually; action withheld"
            );
        }
        Err(e) => {
            tracing::error!(target: AUDIT_TARGET, event = "ERROR", id, ?kind, error = %e, "action attempt failed");
        }
    }
}
