//! Engine lifecycle management
//!
//! Owns the binding between the current source and whatever plays it:
//! picks the attachment strategy through the factory's capability probe,
//! pumps engine events into the store, and runs the error recovery
//! ladder. Every binding carries a generation number; continuations from
//! a torn-down binding compare generations and drop themselves instead of
//! touching state they no longer own.
//!
//! Recovery ladder by error class:
//! - network: restart the engine load after exponential backoff, bounded
//!   by the configured attempt budget, then go quiet
//! - media: one in-place recovery attempt, then treat as fatal
//! - fatal: dispose the binding and surface an [`ErrorState`]

use super::{
    Attachment, EngineError, EngineErrorClass, EngineEvent, EngineFactory, EngineProtocol,
    EngineSupport,
};
use crate::config::EngineConfig;
use crate::media::MediaElement;
use crate::quality;
use crate::store::PlayerStore;
use crate::types::{ErrorCategory, ErrorState, QualitySelection, StreamType};
use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// One source bound to one attachment
struct Binding {
    generation: u64,
    source: String,
    attachment: Attachment,
    pump: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
    retry_attempts: u32,
    media_recovery_used: bool,
}

struct ManagerInner {
    store: Arc<PlayerStore>,
    factory: Arc<dyn EngineFactory>,
    config: EngineConfig,
    generation: AtomicU64,
    binding: tokio::sync::RwLock<Option<Binding>>,
}

/// Manages engine attach, teardown, and error recovery for one element
pub struct EngineManager {
    inner: Arc<ManagerInner>,
}

impl EngineManager {
    pub fn new(store: Arc<PlayerStore>, factory: Arc<dyn EngineFactory>, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store,
                factory,
                config,
                generation: AtomicU64::new(0),
                binding: tokio::sync::RwLock::new(None),
            }),
        }
    }

    /// Bind a source to the element, tearing down any previous binding first
    #[instrument(skip(self, element), fields(stream_type = %stream_type, url = %src))]
    pub async fn activate(
        &self,
        stream_type: StreamType,
        src: &str,
        element: Arc<dyn MediaElement>,
    ) -> Result<()> {
        self.teardown().await;
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        match stream_type {
            StreamType::Hls => match self.inner.factory.support(EngineProtocol::Hls) {
                EngineSupport::Full => {
                    let engine = self.inner.factory.create_hls()?;
                    self.attach_engine(generation, src, element, Attachment::Hls(engine)).await
                }
                EngineSupport::NativePlayback => {
                    self.attach_plain(generation, src, element, Attachment::Native).await
                }
                EngineSupport::Unsupported => {
                    self.attach_plain(generation, src, element, Attachment::Direct).await
                }
            },
            StreamType::Dash => match self.inner.factory.support(EngineProtocol::Dash) {
                EngineSupport::Full => {
                    let engine = self.inner.factory.create_dash()?;
                    self.attach_engine(generation, src, element, Attachment::Dash(engine)).await
                }
                EngineSupport::NativePlayback => {
                    self.attach_plain(generation, src, element, Attachment::Native).await
                }
                EngineSupport::Unsupported => {
                    self.attach_plain(generation, src, element, Attachment::Direct).await
                }
            },
            StreamType::Mp4 | StreamType::Other => {
                self.attach_plain(generation, src, element, Attachment::Direct).await
            }
        }
    }

    async fn attach_engine(
        &self,
        generation: u64,
        src: &str,
        element: Arc<dyn MediaElement>,
        attachment: Attachment,
    ) -> Result<()> {
        // Subscribe before loading so no event can slip past the pump.
        let Some(events) = attachment.subscribe() else {
            return Err(Error::Internal("engine attachment without event stream".into()));
        };
        let pump = tokio::spawn(pump_events(self.inner.clone(), generation, events));
        {
            let mut guard = self.inner.binding.write().await;
            *guard = Some(Binding {
                generation,
                source: src.to_string(),
                attachment: attachment.clone(),
                pump: Some(pump),
                retry: None,
                retry_attempts: 0,
                media_recovery_used: false,
            });
        }
        self.inner.store.set_attachment(attachment.kind()).await;

        let loaded = match &attachment {
            Attachment::Hls(engine) => engine.load(src, element).await,
            Attachment::Dash(engine) => engine.initialize(src, element).await,
            Attachment::Native | Attachment::Direct => Ok(()),
        };
        if let Err(err) = loaded {
            warn!(error = %err, "engine attach failed");
            self.teardown().await;
            self.inner
                .store
                .set_error(ErrorState::new(0, ErrorCategory::Src, err.to_string()))
                .await;
            return Err(err);
        }
        info!(kind = %attachment.kind(), "engine attached");
        Ok(())
    }

    async fn attach_plain(
        &self,
        generation: u64,
        src: &str,
        element: Arc<dyn MediaElement>,
        attachment: Attachment,
    ) -> Result<()> {
        element.set_src(Some(src));
        element.load();
        {
            let mut guard = self.inner.binding.write().await;
            *guard = Some(Binding {
                generation,
                source: src.to_string(),
                attachment: attachment.clone(),
                pump: None,
                retry: None,
                retry_attempts: 0,
                media_recovery_used: false,
            });
        }
        self.inner.store.set_attachment(attachment.kind()).await;
        info!(kind = %attachment.kind(), "source assigned directly");
        Ok(())
    }

    /// Release the current binding and reset engine-owned store state
    ///
    /// Safe to call when nothing is bound. Order matters: pending retries
    /// are cancelled first so none can fire mid-teardown, then the pump
    /// stops, then the engine is disposed, then the store forgets the
    /// ladder.
    pub async fn teardown(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let binding = self.inner.binding.write().await.take();
        let Some(mut binding) = binding else {
            return;
        };
        if let Some(handle) = binding.retry.take() {
            handle.abort();
        }
        if let Some(handle) = binding.pump.take() {
            handle.abort();
        }
        binding.attachment.dispose();
        self.inner.store.clear_engine_binding().await;
        debug!(source = %binding.source, "engine binding released");
    }

    /// Persist a quality choice and push it at the attached engine
    ///
    /// With nothing attached the choice is stored and applied on the next
    /// manifest load. Engine rejections degrade to a logged no-op.
    #[instrument(skip(self), fields(selection = %selection))]
    pub async fn apply_quality(&self, selection: QualitySelection) {
        self.inner.store.set_selected_quality(selection.clone()).await;
        let attachment = {
            let guard = self.inner.binding.read().await;
            guard.as_ref().map(|b| b.attachment.clone())
        };
        let Some(attachment) = attachment else {
            debug!("no attachment, selection stored for the next load");
            return;
        };
        if quality::apply_selection(&attachment, &selection) && selection.is_auto() {
            // Concrete switches come back through engine events; auto is
            // confirmed synchronously since nothing is pinned anymore.
            self.inner.store.set_applied_quality(QualitySelection::Auto).await;
        }
    }
}

impl Drop for EngineManager {
    fn drop(&mut self) {
        // Last resort when the async teardown never ran.
        if let Ok(mut guard) = self.inner.binding.try_write() {
            if let Some(mut binding) = guard.take() {
                if let Some(handle) = binding.retry.take() {
                    handle.abort();
                }
                if let Some(handle) = binding.pump.take() {
                    handle.abort();
                }
                binding.attachment.dispose();
            }
        }
    }
}

/// Forward engine events into the store while the binding is current
async fn pump_events(
    inner: Arc<ManagerInner>,
    generation: u64,
    mut events: broadcast::Receiver<EngineEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "engine event stream lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if inner.generation.load(Ordering::SeqCst) != generation {
            break;
        }
        handle_event(&inner, generation, event).await;
    }
}

async fn handle_event(inner: &Arc<ManagerInner>, generation: u64, event: EngineEvent) {
    match event {
        EngineEvent::ManifestLoaded { levels } => {
            let Some(attachment) = current_attachment(inner, generation).await else {
                return;
            };
            info!(level_count = levels.len(), "manifest loaded");
            inner.store.set_levels(levels).await;

            let persisted = inner.store.snapshot().await.stream.selected_quality;
            let effective = quality::reapply_after_manifest(&attachment, &persisted);
            if effective != persisted {
                inner.store.set_selected_quality(effective).await;
            }
            reset_retry_budget(inner, generation).await;
        }
        EngineEvent::LevelsUpdated { levels } => {
            inner.store.set_levels(levels).await;
        }
        EngineEvent::LevelSwitched { selection } => {
            inner.store.set_applied_quality(selection).await;
        }
        EngineEvent::Error(err) => match err.class {
            EngineErrorClass::Network => handle_network_error(inner, generation, err).await,
            EngineErrorClass::Media => handle_media_error(inner, generation, err).await,
            EngineErrorClass::Fatal => handle_fatal_error(inner, generation, err).await,
        },
    }
}

async fn current_attachment(inner: &Arc<ManagerInner>, generation: u64) -> Option<Attachment> {
    let guard = inner.binding.read().await;
    guard
        .as_ref()
        .filter(|b| b.generation == generation)
        .map(|b| b.attachment.clone())
}

async fn reset_retry_budget(inner: &Arc<ManagerInner>, generation: u64) {
    let mut guard = inner.binding.write().await;
    if let Some(binding) = guard.as_mut() {
        if binding.generation == generation {
            binding.retry_attempts = 0;
        }
    }
}

/// Schedule a backoff restart, at most one pending at a time
async fn handle_network_error(inner: &Arc<ManagerInner>, generation: u64, err: EngineError) {
    let mut guard = inner.binding.write().await;
    let Some(binding) = guard.as_mut() else {
        return;
    };
    if binding.generation != generation {
        return;
    }
    if binding.retry_attempts >= inner.config.max_restart_attempts {
        debug!(
            attempts = binding.retry_attempts,
            "restart budget exhausted, not scheduling another"
        );
        return;
    }
    binding.retry_attempts += 1;
    let attempt = binding.retry_attempts;
    let delay = inner.config.restart_delay(attempt);
    if let Some(stale) = binding.retry.take() {
        stale.abort();
    }
    warn!(
        message = %err.message,
        attempt,
        delay_ms = delay.as_millis() as u64,
        "engine transport failure, restart scheduled"
    );
    let task_inner = inner.clone();
    binding.retry = Some(tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let guard = task_inner.binding.read().await;
        if let Some(binding) = guard.as_ref() {
            if binding.generation == generation {
                info!(attempt, "restarting engine load");
                binding.attachment.restart();
            }
        }
    }));
}

/// One in-place recovery, then the fatal path
async fn handle_media_error(inner: &Arc<ManagerInner>, generation: u64, err: EngineError) {
    let attachment = {
        let mut guard = inner.binding.write().await;
        match guard.as_mut() {
            Some(binding) if binding.generation == generation && !binding.media_recovery_used => {
                binding.media_recovery_used = true;
                Some(binding.attachment.clone())
            }
            Some(binding) if binding.generation == generation => None,
            _ => return,
        }
    };
    match attachment {
        Some(attachment) => {
            warn!(message = %err.message, "media error, attempting in-place recovery");
            attachment.recover_media();
        }
        None => {
            warn!(message = %err.message, "media error after recovery was already spent");
            handle_fatal_error(inner, generation, err).await;
        }
    }
}

/// Dispose the binding and surface the failure
///
/// Runs inside the pump task, so the pump handle is dropped rather than
/// aborted; the pump loop exits on its own once the generation moves on.
async fn handle_fatal_error(inner: &Arc<ManagerInner>, generation: u64, err: EngineError) {
    inner.generation.fetch_add(1, Ordering::SeqCst);
    let binding = {
        let mut guard = inner.binding.write().await;
        match guard.as_ref() {
            Some(binding) if binding.generation == generation => guard.take(),
            _ => None,
        }
    };
    let Some(mut binding) = binding else {
        return;
    };
    if let Some(handle) = binding.retry.take() {
        handle.abort();
    }
    binding.pump.take();
    binding.attachment.dispose();
    inner.store.clear_engine_binding().await;

    let category = match err.class {
        EngineErrorClass::Network => ErrorCategory::Network,
        EngineErrorClass::Media => ErrorCategory::Decode,
        EngineErrorClass::Fatal => ErrorCategory::Unknown,
    };
    warn!(message = %err.message, "fatal engine error, binding disposed");
    inner
        .store
        .set_error(ErrorState::new(err.code, category, err.message))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimEngineFactory, SimMediaElement};
    use crate::types::{AttachmentKind, QualityLevel};

    fn ladder() -> Vec<QualityLevel> {
        vec![
            QualityLevel::new(0, 640, 360, 800_000),
            QualityLevel::new(1, 1280, 720, 2_500_000),
        ]
    }

    #[tokio::test]
    async fn activate_hls_attaches_engine_and_publishes_ladder() {
        let store = Arc::new(PlayerStore::new());
        let factory = Arc::new(SimEngineFactory::new().with_hls_ladder(ladder()));
        let manager = EngineManager::new(store.clone(), factory.clone(), EngineConfig::default());
        let element = Arc::new(SimMediaElement::new());

        manager
            .activate(StreamType::Hls, "https://cdn.example.com/master.m3u8", element)
            .await
            .unwrap();

        tokio::task::yield_now().await;
        let snap = store.snapshot().await;
        assert_eq!(snap.stream.attachment, AttachmentKind::Hls);
        assert_eq!(snap.stream.levels.len(), 2);
        assert_eq!(factory.created_hls().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_protocol_falls_back_to_direct_assignment() {
        let store = Arc::new(PlayerStore::new());
        let factory = Arc::new(SimEngineFactory::new().with_hls_support(EngineSupport::Unsupported));
        let manager = EngineManager::new(store.clone(), factory, EngineConfig::default());
        let element = Arc::new(SimMediaElement::new());

        manager
            .activate(StreamType::Hls, "https://cdn.example.com/master.m3u8", element.clone())
            .await
            .unwrap();

        assert_eq!(store.snapshot().await.stream.attachment, AttachmentKind::Direct);
        assert_eq!(element.src().as_deref(), Some("https://cdn.example.com/master.m3u8"));
    }

    #[tokio::test]
    async fn native_support_assigns_src_without_engine() {
        let store = Arc::new(PlayerStore::new());
        let factory =
            Arc::new(SimEngineFactory::new().with_hls_support(EngineSupport::NativePlayback));
        let manager = EngineManager::new(store.clone(), factory.clone(), EngineConfig::default());
        let element = Arc::new(SimMediaElement::new());

        manager
            .activate(StreamType::Hls, "https://cdn.example.com/master.m3u8", element)
            .await
            .unwrap();

        assert_eq!(store.snapshot().await.stream.attachment, AttachmentKind::Native);
        assert!(factory.created_hls().is_empty());
    }

    #[tokio::test]
    async fn teardown_disposes_engine_and_clears_store() {
        let store = Arc::new(PlayerStore::new());
        let factory = Arc::new(SimEngineFactory::new().with_hls_ladder(ladder()));
        let manager = EngineManager::new(store.clone(), factory.clone(), EngineConfig::default());
        let element = Arc::new(SimMediaElement::new());

        manager
            .activate(StreamType::Hls, "https://cdn.example.com/master.m3u8", element)
            .await
            .unwrap();
        tokio::task::yield_now().await;
        manager.teardown().await;

        let engine = factory.created_hls().remove(0);
        assert!(engine.destroyed());
        let snap = store.snapshot().await;
        assert_eq!(snap.stream.attachment, AttachmentKind::None);
        assert!(snap.stream.levels.is_empty());
    }

    #[tokio::test]
    async fn quality_choice_without_attachment_is_stored_for_later() {
        let store = Arc::new(PlayerStore::new());
        let factory = Arc::new(SimEngineFactory::new());
        let manager = EngineManager::new(store.clone(), factory, EngineConfig::default());

        manager.apply_quality(QualitySelection::Level(1)).await;
        assert_eq!(
            store.snapshot().await.stream.selected_quality,
            QualitySelection::Level(1)
        );
    }
}
