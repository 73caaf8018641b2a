//! Path Mapper (spec §4.6): pure translation between the path an external
//! manager (arr) sees and the path this service sees on its own
//! filesystem. Holds an ordered list of `(local_prefix, external_prefix)`
//! pairs behind an `ArcSwap`, so readers never observe a torn state mid
//! `Reload()` — they either get the old mapping table or the new one,
//! never a partial splice of both.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::error::{HealarrError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathMapping {
    pub local_prefix: String,
    pub external_prefix: String,
}

#[derive(Debug, Default)]
struct MappingTable {
    pairs: Vec<PathMapping>,
}

impl MappingTable {
    /// Longest-prefix match, so `/tv` and `/tv/anime` can coexist with the
    /// more specific entry taking precedence.
    fn to_local(&self, arr_path: &str) -> Option<String> {
        self.pairs
            .iter()
            .filter(|p| matches_prefix(arr_path, &p.external_prefix))
            .max_by_key(|p| p.external_prefix.len())
            .map(|p| splice_prefix(arr_path, &p.external_prefix, &p.local_prefix))
    }

    fn to_arr(&self, local_path: &str) -> Option<String> {
        self.pairs
            .iter()
            .filter(|p| matches_prefix(local_path, &p.local_prefix))
            .max_by_key(|p| p.local_prefix.len())
            .map(|p| splice_prefix(local_path, &p.local_prefix, &p.external_prefix))
    }
}

fn matches_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    path == prefix || path.starts_with(&format!("{prefix}/"))
}

fn splice_prefix(path: &str, from_prefix: &str, to_prefix: &str) -> String {
    let from_prefix = from_prefix.trim_end_matches('/');
    let to_prefix = to_prefix.trim_end_matches('/');
    let remainder = path.strip_prefix(from_prefix).unwrap_or("");
    format!("{to_prefix}{remainder}")
}

/// Reload fallibility callback signature: the caller supplies how to load
/// the latest `scan_paths` configuration; `PathMapper` only owns the
/// published snapshot and the atomic swap.
#[async_trait::async_trait]
pub trait MappingSource: Send + Sync {
    async fn load_mappings(&self) -> Result<Vec<PathMapping>>;
}

pub struct PathMapper {
    table: ArcSwap<MappingTable>,
    source: Arc<dyn MappingSource>,
}

impl PathMapper {
    pub fn new(source: Arc<dyn MappingSource>) -> Self {
        Self {
            table: ArcSwap::from_pointee(MappingTable::default()),
            source,
        }
    }

    pub fn to_local(&self, arr_path: &str) -> Option<String> {
        self.table.load().to_local(arr_path)
    }

    pub fn to_arr(&self, local_path: &str) -> Option<String> {
        self.table.load().to_arr(local_path)
    }

    /// Atomically refreshes the mapping table from the configuration
    /// source. A failure is returned to the caller of the configuration
    /// change, never swallowed (spec §4.6) — the previously published
    /// table is left untouched.
    pub async fn reload(&self) -> Result<()> {
        let pairs = self.source.load_mappings().await?;
        self.table.store(Arc::new(MappingTable { pairs }));
        Ok(())
    }
}

/// Path sanitisation for the filesystem browser (spec §4.6, §9): reject any
/// input containing `..` after normalisation, reject null bytes, force
/// absolute. Returns the canonical string form or `InvalidPath`.
pub fn sanitize_path(input: &str) -> Result<String> {
    if input.contains('\0') {
        return Err(HealarrError::InvalidPath(
            "path contains a null byte".to_string(),
        ));
    }

    let path = Path::new(input);
    if !path.is_absolute() {
        return Err(HealarrError::InvalidPath(
            "path must be absolute".to_string(),
        ));
    }

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(HealarrError::InvalidPath(
                    "path traversal ('..') is not allowed".to_string(),
                ))
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }

    Ok(normalized.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticSource(Vec<PathMapping>);

    #[async_trait::async_trait]
    impl MappingSource for StaticSource {
        async fn load_mappings(&self) -> Result<Vec<PathMapping>> {
            Ok(self.0.clone())
        }
    }

    fn mapper_with(pairs: Vec<(&str, &str)>) -> (PathMapper, tokio::runtime::Runtime) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let mappings = pairs
            .into_iter()
            .map(|(l, e)| PathMapping {
                local_prefix: l.to_string(),
                external_prefix: e.to_string(),
            })
            .collect();
        let mapper = PathMapper::new(Arc::new(StaticSource(mappings)));
        rt.block_on(mapper.reload()).unwrap();
        (mapper, rt)
    }

    #[test]
    fn to_local_translates_via_longest_matching_prefix() {
        let (mapper, _rt) = mapper_with(vec![
            ("/local/tv", "/tv"),
            ("/local/tv/anime", "/tv/anime"),
        ]);

        assert_eq!(
            mapper.to_local("/tv/show/s01e01.mkv"),
            Some("/local/tv/show/s01e01.mkv".to_string())
        );
        assert_eq!(
            mapper.to_local("/tv/anime/ep1.mkv"),
            Some("/local/tv/anime/ep1.mkv".to_string())
        );
    }

    #[test]
    fn to_arr_is_the_inverse_of_to_local() {
        let (mapper, _rt) = mapper_with(vec![("/local/tv", "/tv")]);
        let local = mapper.to_local("/tv/show/a.mkv").unwrap();
        assert_eq!(mapper.to_arr(&local), Some("/tv/show/a.mkv".to_string()));
    }

    #[test]
    fn unmapped_path_returns_none() {
        let (mapper, _rt) = mapper_with(vec![("/local/tv", "/tv")]);
        assert_eq!(mapper.to_local("/movies/a.mkv"), None);
    }

    #[test]
    fn sanitize_rejects_traversal_after_normalisation() {
        assert!(sanitize_path("/data/../etc/passwd").is_err());
        assert!(sanitize_path("/data/..").is_err());
    }

    #[test]
    fn sanitize_rejects_null_bytes_and_relative_paths() {
        assert!(sanitize_path("/data/\0").is_err());
        assert!(sanitize_path("relative/path").is_err());
    }

    #[test]
    fn sanitize_accepts_clean_absolute_paths() {
        assert_eq!(sanitize_path("/data/tv/show").unwrap(), "/data/tv/show");
    }

    #[tokio::test]
    async fn reload_failure_leaves_previous_table_untouched() {
        struct FlakySource {
            fail: std::sync::atomic::AtomicBool,
        }

        #[async_trait::async_trait]
        impl MappingSource for FlakySource {
            async fn load_mappings(&self) -> Result<Vec<PathMapping>> {
                if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                    Err(HealarrError::Internal("config unavailable".to_string()))
                } else {
                    Ok(vec![PathMapping {
                        local_prefix: "/local/tv".to_string(),
                        external_prefix: "/tv".to_string(),
                    }])
                }
            }
        }

        let source = Arc::new(FlakySource {
            fail: std::sync::atomic::AtomicBool::new(false),
        });
        let mapper = PathMapper::new(source.clone());
        mapper.reload().await.unwrap();
        assert_eq!(
            mapper.to_local("/tv/a.mkv"),
            Some("/local/tv/a.mkv".to_string())
        );

        source.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(mapper.reload().await.is_err());
        assert_eq!(
            mapper.to_local("/tv/a.mkv"),
            Some("/local/tv/a.mkv".to_string())
        );
    }
}
