//! Git-mirror schema catalog.
//!
//! Keeps a bare mirror of the schemas repository under a local path, serves
//! file contents at arbitrary tags, and memoizes one compiled draft-07
//! validator per `(tag, path)`. Tags equal message versions; that coupling
//! is intentional.
//!
//! Schemas are authored in YAML with `$ref` to sibling files. References are
//! inlined at load time (cycle-guarded); internal `#/...` references are
//! left for the schema compiler.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use tracing::{info, warn};

/// Hard ceiling on `$ref` chains; anything deeper is treated as a cycle.
const MAX_REF_DEPTH: usize = 16;

/// Catalog errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to run git: {0}")]
    GitSpawn(#[from] std::io::Error),

    #[error("git {args} failed: {stderr}")]
    Git { args: String, stderr: String },

    #[error("no schema at {tag}:{path}")]
    NotFound { tag: String, path: String },

    #[error("schema {path} is not valid YAML: {source}")]
    Yaml {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("schema {path} did not compile: {detail}")]
    Compile { path: String, detail: String },

    #[error("$ref chain too deep (cycle?) at {path}")]
    RefCycle { path: String },
}

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

enum Source {
    /// Bare mirror of the remote repository; tags are resolved by git.
    Mirror { dir: PathBuf, remote: String },
    /// Plain directory checkout; every tag resolves to the same content.
    /// Offline fallback for CI and tests.
    Dir { root: PathBuf },
}

/// The schema catalog.
pub struct SchemaCatalog {
    source: Source,
    cache: Mutex<HashMap<String, Arc<JSONSchema>>>,
    fetched: AtomicBool,
}

impl SchemaCatalog {
    /// Open a mirror-backed catalog, cloning if `dir` does not hold a bare
    /// repository yet. The clone is idempotent: an existing mirror is reused.
    pub fn open(remote: impl Into<String>, dir: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let remote = remote.into();
        let dir = dir.into();
        if !dir.join("HEAD").exists() {
            info!(%remote, dir = %dir.display(), "cloning schema mirror");
            run_git(
                Path::new("."),
                &["clone", "--mirror", &remote, &dir.to_string_lossy()],
            )?;
        }
        Ok(Arc::new(SchemaCatalog {
            source: Source::Mirror { dir, remote },
            cache: Mutex::new(HashMap::new()),
            fetched: AtomicBool::new(false),
        }))
    }

    /// Open a catalog over a plain directory. Tag arguments are ignored.
    pub fn from_dir(root: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(SchemaCatalog {
            source: Source::Dir { root: root.into() },
            cache: Mutex::new(HashMap::new()),
            fetched: AtomicBool::new(true),
        })
    }

    /// Fetch-with-prune against the remote. The loader must observe one
    /// completed refresh before consuming any message.
    pub fn refresh(&self) -> Result<()> {
        if let Source::Mirror { dir, .. } = &self.source {
            run_git(dir, &["fetch", "--prune", "origin"])?;
        }
        self.fetched.store(true, Ordering::Release);
        Ok(())
    }

    /// Whether an initial refresh has completed.
    pub fn is_fetched(&self) -> bool {
        self.fetched.load(Ordering::Acquire)
    }

    /// Run `refresh` now and then on every tick of `interval` (12 hours in
    /// production) until the task is aborted.
    pub fn spawn_refresh(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let catalog = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let catalog = Arc::clone(&catalog);
                let outcome =
                    tokio::task::spawn_blocking(move || catalog.refresh()).await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(%err, "schema mirror refresh failed"),
                    Err(err) => warn!(%err, "schema refresh task panicked"),
                }
            }
        })
    }

    /// Raw file contents at `refs/tags/<tag>:<path>`.
    pub fn get_file(&self, tag: &str, path: &str) -> Result<Vec<u8>> {
        match &self.source {
            Source::Mirror { dir, .. } => {
                let spec = format!("{tag}:{path}");
                let output = Command::new("git")
                    .args(["-C", &dir.to_string_lossy(), "show", &spec])
                    .output()?;
                if !output.status.success() {
                    return Err(CatalogError::NotFound {
                        tag: tag.to_string(),
                        path: path.to_string(),
                    });
                }
                Ok(output.stdout)
            }
            Source::Dir { root } => fs_read(root, path).ok_or_else(|| CatalogError::NotFound {
                tag: tag.to_string(),
                path: path.to_string(),
            }),
        }
    }

    /// The compiled draft-07 validator for `(tag, path)`, memoized.
    pub fn compiled(&self, tag: &str, path: &str) -> Result<Arc<JSONSchema>> {
        let key = format!("{tag}\u{0}{path}");
        if let Some(found) = self.cache.lock().expect("catalog cache lock").get(&key) {
            return Ok(Arc::clone(found));
        }

        let raw = self.load_yaml(tag, path)?;
        let inlined = self.inline_refs(raw, tag, parent_dir(path), 0, path)?;
        let schema = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&inlined)
            .map_err(|e| CatalogError::Compile {
                path: path.to_string(),
                detail: e.to_string(),
            })?;
        let schema = Arc::new(schema);
        self.cache
            .lock()
            .expect("catalog cache lock")
            .insert(key, Arc::clone(&schema));
        Ok(schema)
    }

    fn load_yaml(&self, tag: &str, path: &str) -> Result<Value> {
        let bytes = self.get_file(tag, path)?;
        serde_yaml::from_slice(&bytes).map_err(|source| CatalogError::Yaml {
            path: path.to_string(),
            source,
        })
    }

    /// Replace `$ref` objects pointing at sibling files with their inlined
    /// contents. Internal (`#/...`) references pass through untouched.
    fn inline_refs(
        &self,
        value: Value,
        tag: &str,
        base_dir: &str,
        depth: usize,
        origin: &str,
    ) -> Result<Value> {
        if depth > MAX_REF_DEPTH {
            return Err(CatalogError::RefCycle {
                path: origin.to_string(),
            });
        }
        match value {
            Value::Object(map) => {
                if let Some(target) = file_ref(&map) {
                    let (file, fragment) = match target.split_once('#') {
                        Some((file, frag)) => (file, Some(frag.to_string())),
                        None => (target.as_str(), None),
                    };
                    let ref_path = join_rel(base_dir, file);
                    let loaded = self.load_yaml(tag, &ref_path)?;
                    let inlined =
                        self.inline_refs(loaded, tag, parent_dir(&ref_path), depth + 1, origin)?;
                    return match fragment {
                        Some(frag) => inlined
                            .pointer(&frag)
                            .cloned()
                            .ok_or_else(|| CatalogError::NotFound {
                                tag: tag.to_string(),
                                path: format!("{ref_path}#{frag}"),
                            }),
                        None => Ok(inlined),
                    };
                }
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, val) in map {
                    out.insert(key, self.inline_refs(val, tag, base_dir, depth, origin)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => Ok(Value::Array(
                items
                    .into_iter()
                    .map(|item| self.inline_refs(item, tag, base_dir, depth, origin))
                    .collect::<Result<_>>()?,
            )),
            other => Ok(other),
        }
    }
}

/// A `$ref` to a sibling file (not an internal pointer, not a URL).
fn file_ref(map: &serde_json::Map<String, Value>) -> Option<String> {
    let target = map.get("$ref")?.as_str()?;
    if target.starts_with('#') || target.contains("://") {
        return None;
    }
    Some(target.to_string())
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn join_rel(base: &str, rel: &str) -> String {
    let mut parts: Vec<&str> = if base.is_empty() {
        Vec::new()
    } else {
        base.split('/').collect()
    };
    for segment in rel.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn fs_read(root: &Path, path: &str) -> Option<Vec<u8>> {
    std::fs::read(root.join(path)).ok()
}

fn run_git(cwd: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("git").args(args).current_dir(cwd).output()?;
    if !output.status.success() {
        return Err(CatalogError::Git {
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, path: &str, content: &str) {
        let full = dir.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    #[test]
    fn from_dir_serves_files_regardless_of_tag() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "schemas/a.json", "type: object\n");
        let catalog = SchemaCatalog::from_dir(dir.path());
        assert!(catalog.get_file("1.0.0", "schemas/a.json").is_ok());
        assert!(catalog.get_file("9.9.9", "schemas/a.json").is_ok());
        assert!(catalog.get_file("1.0.0", "schemas/missing.json").is_err());
    }

    #[test]
    fn compiled_schema_validates_and_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "schemas/brew-build.test.complete.json",
            "type: object\nrequired: [version]\nproperties:\n  version:\n    type: string\n",
        );
        let catalog = SchemaCatalog::from_dir(dir.path());
        let schema = catalog
            .compiled("1.1.14", "schemas/brew-build.test.complete.json")
            .unwrap();
        assert!(schema.is_valid(&serde_json::json!({"version": "1.1.14"})));
        assert!(!schema.is_valid(&serde_json::json!({})));

        let again = catalog
            .compiled("1.1.14", "schemas/brew-build.test.complete.json")
            .unwrap();
        assert!(Arc::ptr_eq(&schema, &again));
    }

    #[test]
    fn sibling_refs_are_inlined() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "schemas/outer.json",
            "type: object\nrequired: [run]\nproperties:\n  run:\n    $ref: ./run.yaml\n",
        );
        write(
            dir.path(),
            "schemas/run.yaml",
            "type: object\nrequired: [url]\nproperties:\n  url:\n    type: string\n",
        );
        let catalog = SchemaCatalog::from_dir(dir.path());
        let schema = catalog.compiled("1.0.0", "schemas/outer.json").unwrap();
        assert!(schema.is_valid(&serde_json::json!({"run": {"url": "https://x"}})));
        assert!(!schema.is_valid(&serde_json::json!({"run": {}})));
    }

    #[test]
    fn ref_with_fragment_selects_a_definition() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "schemas/outer.json",
            "type: object\nproperties:\n  issuer:\n    $ref: common.yaml#/definitions/nonempty\n",
        );
        write(
            dir.path(),
            "schemas/common.yaml",
            "definitions:\n  nonempty:\n    type: string\n    minLength: 1\n",
        );
        let catalog = SchemaCatalog::from_dir(dir.path());
        let schema = catalog.compiled("1.0.0", "schemas/outer.json").unwrap();
        assert!(schema.is_valid(&serde_json::json!({"issuer": "bodhi"})));
        assert!(!schema.is_valid(&serde_json::json!({"issuer": ""})));
    }

    #[test]
    fn circular_refs_are_detected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "schemas/a.json", "$ref: ./b.yaml\n");
        write(dir.path(), "schemas/b.yaml", "$ref: ./a.json\n");
        let catalog = SchemaCatalog::from_dir(dir.path());
        assert!(matches!(
            catalog.compiled("1.0.0", "schemas/a.json"),
            Err(CatalogError::RefCycle { .. })
        ));
    }

    #[test]
    fn join_rel_normalizes_dot_segments() {
        assert_eq!(join_rel("schemas", "./run.yaml"), "schemas/run.yaml");
        assert_eq!(join_rel("schemas/sub", "../run.yaml"), "schemas/run.yaml");
        assert_eq!(join_rel("", "run.yaml"), "run.yaml");
    }
}
