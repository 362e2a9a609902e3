// Dictionary — content-addressed term cache, the segmenter it feeds, and the
// backing files the segmenter is loaded from.

pub mod cache;
pub mod files;
pub mod fingerprint;
pub mod segmenter;

pub use cache::{DictionaryCache, DictionaryOptions, Filterer, Snapshot};
pub use files::DictionaryFormat;
