//! Preview generator with a bounded, TTL-expiring cache.
//!
//! Previews are tiny (longer edge ≤ [`PreviewConfig::max_dimension`]),
//! low-quality renditions shown while full processing runs in the pool. They
//! honour EXIF orientation so the thumbnail matches the final result.
//!
//! # Cache
//!
//! Entries are keyed by a SHA-256 over the asset's name, size and
//! last-modified time plus every preview setting, so the same file picked
//! twice with the same settings hits, and any setting change misses.
//!
//! Bounds:
//!
//! - **Capacity**: inserting into a full cache first drops expired entries,
//!   then the least recently used ~20% (at least one).
//! - **TTL**: expiry is checked lazily on lookup; [`PreviewCache::purge_expired`]
//!   sweeps eagerly.
//!
//! The cache is plain owned state: whoever holds the [`PreviewGenerator`]
//! decides its lifetime, and [`PreviewCache::clear`] empties it on demand.

use crate::error::ProcessError;
use crate::imaging::{
    Capabilities, Dimensions, OrientationTag, OutputFormat, PlanRequest, Quality, RasterBackend,
    RasterOptions, ResizeSpec, fit_within, negotiate_format, plan_transform, read_orientation,
    render, working_dimensions,
};
use crate::types::ImageAsset;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Share of entries evicted when the cache is full.
const EVICTION_FRACTION: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreviewConfig {
    /// Longer-edge bound in pixels.
    pub max_dimension: u32,
    pub quality: u32,
    pub format: OutputFormat,
    pub correct_orientation: bool,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            max_dimension: 100,
            quality: 30,
            format: OutputFormat::Jpeg,
            correct_orientation: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreviewCacheConfig {
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for PreviewCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 50,
            ttl_secs: 300,
        }
    }
}

/// An encoded preview.
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    /// Render time, or lookup time on a cache hit.
    pub generation_time: Duration,
    pub cache_hit: bool,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub preview: Preview,
    pub created_at: Instant,
    pub last_used: Instant,
    pub size_bytes: usize,
}

/// Counters for one cache instance.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn total(&self) -> u64 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} hits, {} misses ({} lookups)",
            self.hits,
            self.misses,
            self.total()
        )?;
        if self.evictions > 0 || self.expirations > 0 {
            write!(f, ", {} evicted, {} expired", self.evictions, self.expirations)?;
        }
        Ok(())
    }
}

/// SHA-256 cache key over the asset identity and preview settings.
pub fn cache_key(asset: &ImageAsset, config: &PreviewConfig) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"preview\0");
    hasher.update(asset.name().as_bytes());
    hasher.update(b"\0");
    hasher.update(asset.size().to_le_bytes());
    hasher.update(asset.last_modified_millis().to_le_bytes());
    hasher.update(config.max_dimension.to_le_bytes());
    hasher.update(config.quality.to_le_bytes());
    hasher.update(config.format.extension().as_bytes());
    hasher.update([config.correct_orientation as u8]);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug)]
pub struct PreviewCache {
    entries: HashMap<String, CacheEntry>,
    max_entries: usize,
    ttl: Duration,
    stats: CacheStats,
}

impl PreviewCache {
    pub fn new(config: &PreviewCacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries: config.max_entries.max(1),
            ttl: Duration::from_secs(config.ttl_secs),
            stats: CacheStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Total encoded bytes held.
    pub fn size_bytes(&self) -> usize {
        self.entries.values().map(|e| e.size_bytes).sum()
    }

    pub fn get(&mut self, key: &str) -> Option<&Preview> {
        self.get_at(key, Instant::now())
    }

    /// Look up `key` as of `now`, dropping the entry if it has expired.
    pub fn get_at(&mut self, key: &str, now: Instant) -> Option<&Preview> {
        let expired = match self.entries.get(key) {
            Some(entry) => now.saturating_duration_since(entry.created_at) >= self.ttl,
            None => {
                self.stats.misses += 1;
                return None;
            }
        };
        if expired {
            self.entries.remove(key);
            self.stats.expirations += 1;
            self.stats.misses += 1;
            tracing::trace!(key, "preview cache entry expired");
            return None;
        }

        self.stats.hits += 1;
        let entry = self.entries.get_mut(key)?;
        entry.last_used = now;
        Some(&entry.preview)
    }

    pub fn insert(&mut self, key: String, preview: Preview) {
        self.insert_at(key, preview, Instant::now());
    }

    pub fn insert_at(&mut self, key: String, preview: Preview, now: Instant) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.purge_expired_at(now);
            if self.entries.len() >= self.max_entries {
                self.evict_least_recent();
            }
        }
        let size_bytes = preview.bytes.len();
        self.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                preview,
                created_at: now,
                last_used: now,
                size_bytes,
            },
        );
    }

    pub fn purge_expired(&mut self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    /// Drop every entry whose TTL has elapsed as of `now`.
    pub fn purge_expired_at(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.created_at) < ttl);
        let removed = before - self.entries.len();
        self.stats.expirations += removed as u64;
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_least_recent(&mut self) {
        let count = ((self.max_entries as f64 * EVICTION_FRACTION).ceil() as usize).max(1);
        let mut by_age: Vec<(Instant, String)> = self
            .entries
            .values()
            .map(|e| (e.last_used, e.key.clone()))
            .collect();
        by_age.sort();
        let evicted = by_age
            .into_iter()
            .take(count)
            .filter(|(_, key)| self.entries.remove(key).is_some())
            .count();
        self.stats.evictions += evicted as u64;
        tracing::debug!(evicted, remaining = self.entries.len(), "preview cache full");
    }
}

impl Default for PreviewCache {
    fn default() -> Self {
        Self::new(&PreviewCacheConfig::default())
    }
}

/// Render a preview without touching any cache.
pub fn render_preview(
    backend: &(impl RasterBackend + ?Sized),
    capabilities: &Capabilities,
    asset: &ImageAsset,
    config: &PreviewConfig,
) -> Result<Preview, ProcessError> {
    let started = Instant::now();
    let image = backend.decode(asset.bytes())?;
    let orientation = if config.correct_orientation {
        read_orientation(asset.bytes()).unwrap_or_default()
    } else {
        OrientationTag::Normal
    };

    let original = Dimensions::new(image.width(), image.height());
    let bound = fit_within(
        working_dimensions(original, orientation, 0.0),
        config.max_dimension,
    );
    let plan = plan_transform(
        original,
        orientation,
        &PlanRequest {
            resize: ResizeSpec::fit(bound.width, bound.height),
            ..PlanRequest::default()
        },
    );
    let format = negotiate_format(config.format, capabilities, image.color().has_alpha()).format;

    let rendered = render(
        backend,
        &image,
        &plan,
        orientation,
        format,
        Quality::new(config.quality),
        &RasterOptions::default(),
    )?;

    Ok(Preview {
        bytes: rendered.bytes,
        format: rendered.format,
        width: rendered.width,
        height: rendered.height,
        generation_time: started.elapsed(),
        cache_hit: false,
    })
}

/// Preview rendering backed by a [`PreviewCache`].
#[derive(Debug, Default)]
pub struct PreviewGenerator {
    cache: PreviewCache,
}

impl PreviewGenerator {
    pub fn new(cache_config: &PreviewCacheConfig) -> Self {
        Self {
            cache: PreviewCache::new(cache_config),
        }
    }

    pub fn cache(&self) -> &PreviewCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut PreviewCache {
        &mut self.cache
    }

    pub fn generate(
        &mut self,
        backend: &(impl RasterBackend + ?Sized),
        capabilities: &Capabilities,
        asset: &ImageAsset,
        config: &PreviewConfig,
    ) -> Result<Preview, ProcessError> {
        let started = Instant::now();
        let key = cache_key(asset, config);

        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(asset = asset.name(), "preview cache hit");
            return Ok(Preview {
                generation_time: started.elapsed(),
                cache_hit: true,
                ..cached.clone()
            });
        }

        let preview = render_preview(backend, capabilities, asset, config)?;
        tracing::debug!(
            asset = asset.name(),
            width = preview.width,
            height = preview.height,
            elapsed_ms = preview.generation_time.as_millis() as u64,
            "preview rendered"
        );
        self.cache.insert(key, preview.clone());
        Ok(preview)
    }
}
