// Gradient Scheduler
//
// Derived decorative state: picks the highest-priority gradient-enabled
// presence for a scope, extracts a palette from its image (cached by URL),
// and rotates through the shades on a fixed timer. The rotation state is
// fully recomputable from current presence; it exists only so the
// expensive palette extraction is not redone every tick.

use crate::adapter::{AdapterState, AdapterStateCell, StateAdapter};
use crate::config::GradientSettings;
use crate::error::CoreError;
use crate::events::Updates;
use crate::presence::PresenceRecord;
use crate::scope::Scope;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Extracts a fixed-size ordered color palette from an image. May be
/// remote and slow; the scheduler caches results by URL and treats any
/// failure as "no gradient".
#[async_trait]
pub trait PaletteExtractor: Send + Sync {
    async fn extract(&self, image_url: &str) -> Result<Vec<String>, CoreError>;
}

/// Palette extraction against a remote HTTP extractor service.
pub struct HttpPaletteExtractor {
    client: reqwest::Client,
    endpoint: String,
    palette_size: usize,
}

impl HttpPaletteExtractor {
    pub fn new(endpoint: impl Into<String>, palette_size: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            palette_size,
        }
    }
}

#[async_trait]
impl PaletteExtractor for HttpPaletteExtractor {
    async fn extract(&self, image_url: &str) -> Result<Vec<String>, CoreError> {
        let mut shades: Vec<String> = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("url", image_url),
                ("count", &self.palette_size.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        shades.truncate(self.palette_size);
        Ok(shades)
    }
}

struct Rotation {
    shades: Vec<String>,
    index: Arc<AtomicUsize>,
    fresh: bool,
    timer: JoinHandle<()>,
}

pub struct GradientStateAdapter {
    extractor: Arc<dyn PaletteExtractor>,
    updates: Updates,
    rotation_interval: Duration,
    greetings_transition_ms: u64,
    rotations: Mutex<HashMap<Scope, Rotation>>,
    palette_cache: tokio::sync::Mutex<HashMap<String, Vec<String>>>,
    state: AdapterStateCell,
}

impl GradientStateAdapter {
    pub fn new(
        extractor: Arc<dyn PaletteExtractor>,
        updates: Updates,
        settings: &GradientSettings,
    ) -> Self {
        Self {
            extractor,
            updates,
            rotation_interval: Duration::from_millis(settings.rotation_interval_ms),
            greetings_transition_ms: settings.greetings_transition_ms,
            rotations: Mutex::new(HashMap::new()),
            palette_cache: tokio::sync::Mutex::new(HashMap::new()),
            state: AdapterStateCell::new(),
        }
    }

    /// The record the gradient follows: gradient-enabled, not paused,
    /// highest priority, first occurrence on ties.
    fn select_candidate<'a>(presences: &'a [PresenceRecord]) -> Option<&'a PresenceRecord> {
        let mut candidate: Option<&PresenceRecord> = None;
        for record in presences {
            if !record.gradient.enabled || record.paused {
                continue;
            }
            match candidate {
                Some(current) if record.gradient.priority <= current.gradient.priority => {}
                _ => candidate = Some(record),
            }
        }
        candidate
    }

    async fn palette_for(&self, image: &str) -> Option<Vec<String>> {
        {
            let cache = self.palette_cache.lock().await;
            if let Some(shades) = cache.get(image) {
                return Some(shades.clone());
            }
        }

        match self.extractor.extract(image).await {
            Ok(shades) if !shades.is_empty() => {
                self.palette_cache
                    .lock()
                    .await
                    .insert(image.to_string(), shades.clone());
                Some(shades)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Palette extraction failed for {}: {}", image, e);
                None
            }
        }
    }

    /// Cancel and drop rotation state for a scope. Idempotent.
    fn clear_rotation(&self, scope: &Scope) {
        if let Some(rotation) = self.rotations.lock().unwrap().remove(scope) {
            rotation.timer.abort();
        }
    }

    fn spawn_rotation(&self, scope: Scope, index: Arc<AtomicUsize>, len: usize) -> JoinHandle<()> {
        let updates = self.updates.clone();
        let interval = self.rotation_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let next = (index.load(Ordering::SeqCst) + 1) % len;
                index.store(next, Ordering::SeqCst);
                updates.emit(&scope);
            }
        })
    }
}

#[async_trait]
impl StateAdapter for GradientStateAdapter {
    fn state(&self) -> AdapterState {
        self.state.get()
    }

    async fn run(&self) -> Result<(), CoreError> {
        self.state.set_running();
        Ok(())
    }

    async fn state_for_scope(
        &self,
        scope: &Scope,
        presences: &[PresenceRecord],
        newly_greeted: bool,
    ) -> Result<Map<String, Value>, CoreError> {
        let candidate = Self::select_candidate(presences);
        let image = candidate.and_then(|record| record.image.clone());

        let Some(image) = image else {
            self.clear_rotation(scope);
            return Ok(Map::new());
        };

        let Some(shades) = self.palette_for(&image).await else {
            self.clear_rotation(scope);
            return Ok(Map::new());
        };

        let mut rotations = self.rotations.lock().unwrap();
        let palette_changed = !matches!(rotations.get(scope), Some(r) if r.shades == shades);
        if palette_changed {
            // A new timer always first cancels any prior one for the
            // same scope.
            if let Some(old) = rotations.remove(scope) {
                old.timer.abort();
            }
            let index = Arc::new(AtomicUsize::new(0));
            let timer = self.spawn_rotation(scope.clone(), index.clone(), shades.len());
            rotations.insert(
                scope.clone(),
                Rotation {
                    shades: shades.clone(),
                    index,
                    fresh: true,
                    timer,
                },
            );
        }

        let rotation = rotations
            .get_mut(scope)
            .expect("rotation present after insert");
        let fresh = std::mem::replace(&mut rotation.fresh, false);
        let idx = rotation.index.load(Ordering::SeqCst) % rotation.shades.len();
        let color = rotation.shades[idx].clone();
        let transition = if fresh || newly_greeted {
            self.greetings_transition_ms
        } else {
            self.rotation_interval.as_millis() as u64
        };
        drop(rotations);

        let mut map = Map::new();
        map.insert(
            "gradient".to_string(),
            json!({ "color": color, "transition": transition }),
        );
        Ok(map)
    }
}

impl Drop for GradientStateAdapter {
    fn drop(&mut self) {
        for rotation in self.rotations.lock().unwrap().values() {
            rotation.timer.abort();
        }
    }
}
