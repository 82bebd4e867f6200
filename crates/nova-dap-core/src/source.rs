//! Type name to client source resolution.
//!
//! Lookups go through three layers: a memoizing [`SourceLocationCache`], an
//! external [`SourceLookupProvider`] (typically the language server, which
//! knows about jars and generated sources), and finally a scan of the user's
//! configured source roots.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use crate::dap::Source;

/// Resolves a type to the URI of the file declaring it.
pub trait SourceLookupProvider: Send + Sync {
    /// `None` (or a blank string) when the type's source is unknown.
    fn source_file_uri(&self, fully_qualified_name: &str, relative_path: &str) -> Option<String>;
}

/// Rewrites debugger-side file locations into the client's path convention.
pub trait ClientPathConverter: Send + Sync {
    fn to_client_path(&self, debugger_path: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathConvention {
    pub debugger_paths_are_uri: bool,
    pub client_paths_are_uri: bool,
}

impl ClientPathConverter for PathConvention {
    fn to_client_path(&self, debugger_path: &str) -> Option<String> {
        convert_path(
            debugger_path,
            self.debugger_paths_are_uri,
            self.client_paths_are_uri,
        )
    }
}

/// Convert between `file:` URIs and native paths.
pub fn convert_path(path: &str, from_uri: bool, to_uri: bool) -> Option<String> {
    match (from_uri, to_uri) {
        (true, false) => {
            let url = Url::parse(path).ok()?;
            let path = url.to_file_path().ok()?;
            Some(path.to_string_lossy().into_owned())
        }
        (false, true) => Url::from_file_path(path).ok().map(String::from),
        _ => Some(path.to_owned()),
    }
}

/// First `root/relative_path` that exists on disk.
pub fn lookup_in_source_dirs(roots: &[PathBuf], relative_path: &str) -> Option<PathBuf> {
    if relative_path.is_empty() {
        return None;
    }
    roots
        .iter()
        .map(|root| root.join(Path::new(relative_path)))
        .find(|candidate| candidate.is_file())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CachedUri {
    Found(String),
    /// Looked up before and nothing was found.
    NotFound,
}

impl CachedUri {
    fn uri(&self) -> Option<String> {
        match self {
            CachedUri::Found(uri) => Some(uri.clone()),
            CachedUri::NotFound => None,
        }
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CachedUri>,
    order: VecDeque<String>,
}

/// Bounded memo of fully-qualified type name to source URI.
#[derive(Debug)]
pub struct SourceLocationCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl SourceLocationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Cached URI for `fully_qualified_name`, computing it on first use.
    ///
    /// `resolve` runs without the cache locked. When two callers race on the
    /// same type, the first answer stored wins. Misses are cached too.
    pub fn get_or_resolve(
        &self,
        fully_qualified_name: &str,
        resolve: impl FnOnce() -> Option<String>,
    ) -> Option<String> {
        if let Some(cached) = self.inner.lock().entries.get(fully_qualified_name) {
            return cached.uri();
        }

        let resolved = resolve().filter(|uri| !uri.trim().is_empty());
        let entry = match resolved {
            Some(uri) => CachedUri::Found(uri),
            None => CachedUri::NotFound,
        };

        let mut inner = self.inner.lock();
        if let Some(existing) = inner.entries.get(fully_qualified_name) {
            return existing.uri();
        }
        let uri = entry.uri();
        inner.entries.insert(fully_qualified_name.to_owned(), entry);
        inner.order.push_back(fully_qualified_name.to_owned());
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.entries.remove(&evicted);
            }
        }
        uri
    }

    pub fn contains(&self, fully_qualified_name: &str) -> bool {
        self.inner.lock().entries.contains_key(fully_qualified_name)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}

pub struct SourceResolver {
    cache: SourceLocationCache,
    provider: Option<Arc<dyn SourceLookupProvider>>,
    converter: Arc<dyn ClientPathConverter>,
    source_roots: Vec<PathBuf>,
}

impl SourceResolver {
    pub fn new(
        capacity: usize,
        converter: Arc<dyn ClientPathConverter>,
        source_roots: Vec<PathBuf>,
    ) -> Self {
        Self {
            cache: SourceLocationCache::new(capacity),
            provider: None,
            converter,
            source_roots,
        }
    }

    pub fn set_provider(&mut self, provider: Arc<dyn SourceLookupProvider>) {
        self.provider = Some(provider);
        self.cache.clear();
    }

    pub fn set_converter(&mut self, converter: Arc<dyn ClientPathConverter>) {
        self.converter = converter;
    }

    pub fn cache(&self) -> &SourceLocationCache {
        &self.cache
    }

    /// Client source for a frame in `fully_qualified_name`, or `None` when
    /// nothing knows where it lives.
    pub fn resolve(
        &self,
        fully_qualified_name: &str,
        source_name: &str,
        relative_path: &str,
    ) -> Option<Source> {
        let uri = self.cache.get_or_resolve(fully_qualified_name, || {
            let provider = self.provider.as_ref()?;
            provider.source_file_uri(fully_qualified_name, relative_path)
        });

        match uri {
            Some(uri) if uri.starts_with("file:") => {
                let path = self.converter.to_client_path(&uri).unwrap_or_else(|| {
                    tracing::debug!(target: "nova.dap", uri = %uri, "could not convert source uri");
                    uri.clone()
                });
                Some(Source::new(source_name, path))
            }
            // Virtual content (e.g. `jdt://`); the client fetches it itself.
            Some(uri) => Some(Source::new(source_name, uri)),
            None => lookup_in_source_dirs(&self.source_roots, relative_path)
                .map(|path| Source::new(source_name, path.display().to_string())),
        }
    }
}
