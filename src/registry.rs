//! On-disk model registry with atomic publication.
//!
//! Layout under the registry directory:
//!
//! ```text
//! artifacts/<version>.json   every artifact ever saved
//! CURRENT                    {"version": ..., "blake3": ...}
//! ```
//!
//! Both files are written to a temp file in the target directory, synced and
//! renamed into place, so readers see either the old or the new state.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{PipelineError, Result};
use crate::features::FeatureSchema;
use crate::trainer::ModelArtifact;

const CURRENT_FILE: &str = "CURRENT";
const ARTIFACT_DIR: &str = "artifacts";

/// Pointer to the published artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentPointer {
    pub version: String,
    pub blake3: String,
}

/// Filesystem-backed registry holding one current artifact plus history.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    dir: PathBuf,
}

impl ModelRegistry {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join(ARTIFACT_DIR))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `artifact` and make it current.
    pub fn save(&self, artifact: &ModelArtifact) -> Result<CurrentPointer> {
        check_version_name(&artifact.version)?;

        let bytes = serde_json::to_vec_pretty(artifact)?;
        let pointer = CurrentPointer {
            version: artifact.version.clone(),
            blake3: digest(&bytes),
        };

        // Artifacts are immutable once written; CURRENT may point at this path.
        write_new(&self.artifact_path(&artifact.version), &bytes).map_err(|e| match e {
            PipelineError::Io(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                PipelineError::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("artifact version {} already exists", artifact.version),
                ))
            }
            other => other,
        })?;
        self.publish(&pointer)?;

        tracing::info!(version = %pointer.version, digest = %pointer.blake3, "artifact published");
        Ok(pointer)
    }

    /// Load the current artifact, verifying its digest.
    pub fn load(&self) -> Result<ModelArtifact> {
        let pointer = self.current()?.ok_or(PipelineError::NoModelAvailable)?;
        self.load_verified(&pointer)
    }

    /// Feature schema of the current artifact.
    pub fn current_schema(&self) -> Result<FeatureSchema> {
        Ok(self.load()?.schema)
    }

    /// Pointer to the current artifact, if one has been published.
    pub fn current(&self) -> Result<Option<CurrentPointer>> {
        match fs::read(self.dir.join(CURRENT_FILE)) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All retained versions, oldest first.
    pub fn versions(&self) -> Result<Vec<String>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(self.dir.join(ARTIFACT_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    versions.push(stem.to_string());
                }
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// Make a previously saved version current again.
    pub fn rollback(&self, version: &str) -> Result<CurrentPointer> {
        check_version_name(version)?;

        let bytes = fs::read(self.artifact_path(version))?;
        let artifact: ModelArtifact =
            serde_json::from_slice(&bytes).map_err(|e| PipelineError::CorruptArtifact {
                version: version.to_string(),
                reason: e.to_string(),
            })?;
        if artifact.version != version {
            return Err(PipelineError::CorruptArtifact {
                version: version.to_string(),
                reason: format!("file holds version {}", artifact.version),
            });
        }

        let pointer = CurrentPointer {
            version: version.to_string(),
            blake3: digest(&bytes),
        };
        self.publish(&pointer)?;

        tracing::info!(version, "rolled back");
        Ok(pointer)
    }

    fn load_verified(&self, pointer: &CurrentPointer) -> Result<ModelArtifact> {
        let bytes = fs::read(self.artifact_path(&pointer.version))?;

        let actual = digest(&bytes);
        if actual != pointer.blake3 {
            return Err(PipelineError::CorruptArtifact {
                version: pointer.version.clone(),
                reason: format!("digest {} does not match published {}", actual, pointer.blake3),
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| PipelineError::CorruptArtifact {
            version: pointer.version.clone(),
            reason: e.to_string(),
        })
    }

    fn publish(&self, pointer: &CurrentPointer) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(pointer)?;
        write_atomic(&self.dir.join(CURRENT_FILE), &bytes)
    }

    fn artifact_path(&self, version: &str) -> PathBuf {
        self.dir.join(ARTIFACT_DIR).join(format!("{}.json", version))
    }
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

fn check_version_name(version: &str) -> Result<()> {
    let valid = !version.is_empty()
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !version.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(PipelineError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid artifact version {:?}", version),
        )))
    }
}

/// Temp file in the same directory, fsync, rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    staged(path, bytes)?
        .persist(path)
        .map_err(|e| PipelineError::Io(e.error))?;
    Ok(())
}

/// Like [`write_atomic`], but fails with `AlreadyExists` instead of replacing.
fn write_new(path: &Path, bytes: &[u8]) -> Result<()> {
    staged(path, bytes)?
        .persist_noclobber(path)
        .map_err(|e| PipelineError::Io(e.error))?;
    Ok(())
}

fn staged(path: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let parent = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&parent)?;

    let mut temp = NamedTempFile::new_in(&parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    Ok(temp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Vocabulary;
    use crate::metrics::EvaluationReport;
    use crate::model::cart::{Node, Tree};
    use crate::model::{Hyperparameters, RandomForest};
    use chrono::Utc;

    fn artifact(version: &str) -> ModelArtifact {
        artifact_with_trees(
            version,
            vec![Tree {
                nodes: vec![Node {
                    feature_index: 0,
                    threshold: 0.0,
                    left: 0,
                    right: 0,
                    value: Some(0.25),
                }],
            }],
        )
    }

    fn artifact_with_trees(version: &str, trees: Vec<Tree>) -> ModelArtifact {
        let schema = FeatureSchema::new(
            5,
            Vocabulary::from_ids(["ham", "ver"]),
            Vocabulary::from_ids(["mercedes", "red_bull"]),
        );
        let encoding = schema.fingerprint();
        ModelArtifact {
            version: version.to_string(),
            created_at: Utc::now(),
            forest: RandomForest {
                num_features: schema.feature_names.len(),
                trees,
            },
            schema,
            encoding,
            hyperparameters: Hyperparameters::default(),
            evaluation: EvaluationReport::default(),
            train_samples: 10,
        }
    }

    #[test]
    fn test_empty_registry_has_no_model() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path()).unwrap();

        assert!(matches!(registry.load(), Err(PipelineError::NoModelAvailable)));
        assert!(matches!(
            registry.current_schema(),
            Err(PipelineError::NoModelAvailable)
        ));
        assert!(registry.versions().unwrap().is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path()).unwrap();
        let original = artifact("v1");

        let pointer = registry.save(&original).unwrap();
        assert_eq!(pointer.version, "v1");

        let loaded = registry.load().unwrap();
        assert_eq!(loaded, original);
        assert_eq!(registry.current_schema().unwrap(), original.schema);
    }

    #[test]
    fn test_rollback_republishes_old_version() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path()).unwrap();
        registry.save(&artifact("v1")).unwrap();
        registry.save(&artifact("v2")).unwrap();

        assert_eq!(registry.versions().unwrap(), vec!["v1", "v2"]);
        assert_eq!(registry.load().unwrap().version, "v2");

        registry.rollback("v1").unwrap();
        assert_eq!(registry.load().unwrap().version, "v1");
        assert!(registry.rollback("v9").is_err());
        assert!(registry.rollback("../v1").is_err());
    }

    #[test]
    fn test_tampered_artifact_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path()).unwrap();
        registry.save(&artifact("v1")).unwrap();

        let path = dir.path().join(ARTIFACT_DIR).join("v1.json");
        let mut raw = fs::read_to_string(&path).unwrap();
        raw = raw.replace("0.25", "0.75");
        fs::write(&path, raw).unwrap();

        assert!(matches!(
            registry.load(),
            Err(PipelineError::CorruptArtifact { .. })
        ));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path()).unwrap();
        registry.save(&artifact("v1")).unwrap();

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec![ARTIFACT_DIR, CURRENT_FILE]);
    }

    #[test]
    fn test_reloaded_model_scores_bit_identically() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path()).unwrap();

        // Neither the threshold nor the leaf values are exact binary fractions
        let leaf = |value: f64| Node {
            feature_index: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            value: Some(value),
        };
        let split = Node {
            feature_index: 0,
            threshold: 1.0 / 3.0,
            left: 1,
            right: 2,
            value: None,
        };
        let trees = vec![
            Tree {
                nodes: vec![split, leaf(1.0 / 11.0), leaf(2.0 / 7.0)],
            },
            Tree {
                nodes: vec![leaf(3.0 / 13.0)],
            },
        ];
        let original = artifact_with_trees("v1", trees);
        registry.save(&original).unwrap();
        let loaded = registry.load().unwrap();

        let mut rows = ndarray::Array2::<f64>::zeros((3, original.schema.feature_names.len()));
        rows[[0, 0]] = 0.1;
        rows[[1, 0]] = 1.0 / 3.0;
        rows[[2, 0]] = 0.9;

        let before = original.predict_proba(&rows).unwrap();
        let after = loaded.predict_proba(&rows).unwrap();
        let bits = |v: &[f64]| v.iter().map(|p| p.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&before), bits(&after));
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_saving_existing_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path()).unwrap();
        let first = registry.save(&artifact("v1")).unwrap();

        let mut replacement = artifact("v1");
        replacement.train_samples = 99;
        let err = registry.save(&replacement).unwrap_err();
        assert!(matches!(err, PipelineError::Io(ref e) if e.kind() == io::ErrorKind::AlreadyExists));

        // The published artifact and its pointer are untouched
        assert_eq!(registry.current().unwrap(), Some(first));
        assert_eq!(registry.load().unwrap().train_samples, 10);
    }
}
