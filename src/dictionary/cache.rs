// Dictionary cache — the live, swappable term dictionary.
//
// The cache owns exactly one active Snapshot behind an Arc. Filtering clones
// the Arc under a read lock and works on that snapshot; reloading builds a
// complete new snapshot off to the side and installs it with a single
// pointer assignment under the write lock. The mapping and the segmenter
// live in the same Snapshot, so a filter call can never see one from an old
// build and the other from a new one.
//
// Two more locks serialize the slow path:
//   - reload_lock (async) — one store query + rebuild + install at a time,
//     so installs happen in the same order as the queries that fed them
//   - file_lock — one writer of the backing dictionary file at a time

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::Result;
use tracing::{info, warn};

use super::files::{static_dictionary_paths, write_dictionary_file, DictionaryFormat};
use super::fingerprint::fingerprint;
use super::segmenter::DictSegmenter;
use crate::db::models::{Term, TermQuery};
use crate::db::TermStore;

/// The filtering capability handed to request-processing code.
pub trait Filterer: Send + Sync {
    /// Mask every dictionary term in `text`.
    fn filter(&self, text: &str) -> String;
}

/// Where and how the cache writes its dictionary, and how it masks.
#[derive(Debug, Clone)]
pub struct DictionaryOptions {
    /// Backing dictionary file, rewritten on every load.
    pub user_dict_path: PathBuf,
    /// Directory of static dictionaries loaded before the backing file.
    pub static_dict_dir: Option<PathBuf>,
    pub mask: char,
    pub format: DictionaryFormat,
}

impl DictionaryOptions {
    pub fn new(user_dict_path: impl Into<PathBuf>) -> Self {
        Self {
            user_dict_path: user_dict_path.into(),
            static_dict_dir: None,
            mask: '*',
            format: DictionaryFormat::default(),
        }
    }

    pub fn with_static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dict_dir = Some(dir.into());
        self
    }

    pub fn with_mask(mut self, mask: char) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_format(mut self, format: DictionaryFormat) -> Self {
        self.format = format;
        self
    }
}

/// One immutable build of the dictionary: fingerprint → value, plus the
/// segmenter built from the same values.
#[derive(Debug)]
pub struct Snapshot {
    mapping: HashMap<String, String>,
    segmenter: DictSegmenter,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// The plaintext value stored under `fingerprint`, if any.
    pub fn get(&self, fingerprint: &str) -> Option<&str> {
        self.mapping.get(fingerprint).map(String::as_str)
    }

    pub fn segmenter(&self) -> &DictSegmenter {
        &self.segmenter
    }

    /// Segment `text` and replace every dictionary token with `mask`
    /// repeated once per char of the token.
    pub fn mask(&self, text: &str, mask: char) -> String {
        let mut out = String::with_capacity(text.len());
        for token in self.segmenter.segment(text) {
            if self.mapping.contains_key(&fingerprint(token)) {
                out.extend(std::iter::repeat(mask).take(token.chars().count()));
            } else {
                out.push_str(token);
            }
        }
        out
    }
}

pub struct DictionaryCache {
    options: DictionaryOptions,
    active: RwLock<Arc<Snapshot>>,
    file_lock: Mutex<()>,
    reload_lock: tokio::sync::Mutex<()>,
}

impl DictionaryCache {
    /// Build the cache with an initial snapshot of `terms`.
    ///
    /// There is no way to construct an empty, unloaded cache: filtering is
    /// always backed by a snapshot.
    pub fn new(options: DictionaryOptions, terms: &[Term]) -> Result<Self> {
        let snapshot = build_snapshot(&options, terms)?;
        Ok(Self {
            options,
            active: RwLock::new(Arc::new(snapshot)),
            file_lock: Mutex::new(()),
            reload_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Build the cache from the full live term set in `store`.
    pub async fn from_store(options: DictionaryOptions, store: &dyn TermStore) -> Result<Self> {
        let (count, terms) = store.find_terms(&TermQuery::default()).await?;
        info!(terms = count, "Loaded initial term set");
        Self::new(options, &terms)
    }

    pub fn options(&self) -> &DictionaryOptions {
        &self.options
    }

    /// Build a snapshot of `terms` without installing it.
    ///
    /// Rewrites the backing dictionary file. On error nothing is installed
    /// and the active snapshot keeps serving.
    pub fn load(&self, terms: &[Term]) -> Result<Snapshot> {
        let _file = self.file_lock.lock().unwrap_or_else(PoisonError::into_inner);
        build_snapshot(&self.options, terms)
    }

    /// Make `snapshot` the active one. In-flight filter calls finish on the
    /// snapshot they already hold.
    pub fn install(&self, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        *active = snapshot;
    }

    /// Re-read the live term set from `store`, rebuild, and install.
    /// Returns the number of terms in the new snapshot.
    pub async fn reload(&self, store: &dyn TermStore) -> Result<usize> {
        let _reload = self.reload_lock.lock().await;
        let (_, terms) = store.find_terms(&TermQuery::default()).await?;
        let snapshot = self.load(&terms)?;
        let count = snapshot.len();
        self.install(snapshot);
        info!(terms = count, "Installed new dictionary snapshot");
        Ok(count)
    }

    /// The currently active snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mask every dictionary term in `text` using the active snapshot.
    pub fn filter(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        self.snapshot().mask(text, self.options.mask)
    }
}

impl Filterer for DictionaryCache {
    fn filter(&self, text: &str) -> String {
        DictionaryCache::filter(self, text)
    }
}

fn build_snapshot(options: &DictionaryOptions, terms: &[Term]) -> Result<Snapshot> {
    let mut mapping = HashMap::with_capacity(terms.len());
    for term in terms {
        let value = term.value.trim();
        if value.is_empty() {
            continue;
        }
        if value.contains(['\n', '\r']) {
            warn!(id = %term.id, "Skipping term with a line break; it cannot be written to the dictionary");
            continue;
        }
        let key = fingerprint(value);
        if key != term.fingerprint {
            warn!(
                id = %term.id,
                stored = %term.fingerprint,
                computed = %key,
                "Stored fingerprint does not match term value, using computed one"
            );
        }
        mapping.insert(key, value.to_string());
    }

    let mut values: Vec<&str> = mapping.values().map(String::as_str).collect();
    values.sort_unstable();
    write_dictionary_file(&options.user_dict_path, values, options.format)?;

    let static_paths = match options.static_dict_dir {
        Some(ref dir) => static_dictionary_paths(dir)?,
        None => Vec::new(),
    };

    let mut segmenter = DictSegmenter::load_files(&static_paths)?;
    segmenter.load_user_file(&options.user_dict_path, options.format)?;
    info!(
        terms = mapping.len(),
        words = segmenter.len(),
        dictionaries = static_paths.len() + 1,
        "Built dictionary snapshot"
    );

    Ok(Snapshot { mapping, segmenter })
}
