use crate::error::{ProviderError, ResolveError};
use crate::model::{ProxySource, QueueEntry, ResolvedTrack, TrackRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub const CATALOG_PROVIDER: &str = "catalog";

pub trait MusicProvider: Send + Sync {
    fn name(&self) -> &str;

    fn resolve(&self, track: &TrackRef) -> Result<ResolvedTrack, ProviderError>;
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn MusicProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn MusicProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn MusicProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn MusicProvider>> {
        self.providers.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Clone, Default)]
pub struct TrackResolver {
    registry: ProviderRegistry,
}

impl TrackResolver {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn resolve(&self, entry: &QueueEntry) -> Result<ResolvedTrack, ResolveError> {
        let provider = self
            .registry
            .get(&entry.provider)
            .ok_or_else(|| ResolveError::UnknownProvider(entry.provider.clone()))?;
        provider
            .resolve(&entry.track)
            .map_err(|source| ResolveError::ProviderFailure {
                provider: entry.provider.clone(),
                source,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogTrack {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub album: Option<String>,
    pub url: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub original_url: Option<String>,
    #[serde(default)]
    pub proxy: Option<ProxySource>,
}

impl CatalogTrack {
    pub fn track_ref(&self) -> TrackRef {
        TrackRef {
            id: self.id.clone(),
            name: self.name.clone(),
            artists: self.artists.clone(),
            album: self.album.clone(),
            original_url: self.original_url.clone(),
        }
    }

    fn to_resolved(&self) -> ResolvedTrack {
        ResolvedTrack {
            track: self.track_ref(),
            url: self.url.clone(),
            duration_ms: self.duration_ms,
            image_url: self.image_url.clone(),
            proxy: self.proxy.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StaticCatalog {
    name: String,
    tracks: HashMap<String, CatalogTrack>,
}

impl StaticCatalog {
    pub fn new(tracks: Vec<CatalogTrack>) -> Self {
        Self::named(CATALOG_PROVIDER, tracks)
    }

    pub fn named(name: &str, tracks: Vec<CatalogTrack>) -> Self {
        Self {
            name: name.to_string(),
            tracks: tracks
                .into_iter()
                .map(|track| (track.id.clone(), track))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl MusicProvider for StaticCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, track: &TrackRef) -> Result<ResolvedTrack, ProviderError> {
        self.tracks
            .get(&track.id)
            .map(CatalogTrack::to_resolved)
            .ok_or_else(|| ProviderError::NotFound(track.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RequestId;

    fn catalog_track(id: &str) -> CatalogTrack {
        CatalogTrack {
            id: id.to_string(),
            name: format!("Song {id}"),
            artists: vec![String::from("Artist")],
            album: None,
            url: format!("http://music.local/{id}.m4a"),
            duration_ms: 180_000,
            image_url: None,
            original_url: None,
            proxy: None,
        }
    }

    fn entry(track_id: &str, provider: &str) -> QueueEntry {
        QueueEntry {
            request_id: RequestId::from("r1"),
            track: TrackRef::new(track_id, "whatever"),
            provider: provider.to_string(),
            requester_id: String::from("u1"),
        }
    }

    fn resolver() -> TrackResolver {
        let registry = ProviderRegistry::new()
            .with(Arc::new(StaticCatalog::new(vec![catalog_track("a")])));
        TrackResolver::new(registry)
    }

    #[test]
    fn resolves_known_track_through_named_provider() {
        let resolved = resolver()
            .resolve(&entry("a", CATALOG_PROVIDER))
            .expect("resolve");
        assert_eq!(resolved.url, "http://music.local/a.m4a");
        assert_eq!(resolved.track.name, "Song a");
        assert!(!resolved.needs_proxy());
    }

    #[test]
    fn unknown_provider_is_not_retryable() {
        let err = resolver()
            .resolve(&entry("a", "nowhere"))
            .expect_err("unknown");
        assert_eq!(err, ResolveError::UnknownProvider(String::from("nowhere")));
        assert!(!err.is_retryable());
    }

    #[test]
    fn missing_track_surfaces_as_provider_failure() {
        let err = resolver()
            .resolve(&entry("zzz", CATALOG_PROVIDER))
            .expect_err("missing");
        assert_eq!(
            err,
            ResolveError::ProviderFailure {
                provider: String::from(CATALOG_PROVIDER),
                source: ProviderError::NotFound(String::from("zzz")),
            }
        );
        assert!(err.is_retryable());
    }
}
