use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::EngineError;
use crate::prompting::ModelFamily;

#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub id: String,
    pub path: PathBuf,
    pub family: ModelFamily,
    pub tokenizer_path: Option<PathBuf>,
}

/// GGUF files found under the configured weights location.
#[derive(Debug)]
pub struct ModelCatalog {
    pub weights_root: PathBuf,
    pub entries: Vec<ModelEntry>,
}

impl ModelCatalog {
    /// `weights` may name a single `.gguf` file or a directory searched recursively.
    pub fn discover(weights: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let weights_root = weights.into();
        if !weights_root.exists() {
            return Err(EngineError::load(format!(
                "weights path not found: {}",
                weights_root.display()
            )));
        }

        let mut gguf_files = Vec::new();
        if weights_root.is_file() {
            if !is_gguf(&weights_root) {
                return Err(EngineError::load(format!(
                    "weights file is not a GGUF model: {}",
                    weights_root.display()
                )));
            }
            gguf_files.push(weights_root.clone());
        } else {
            collect_gguf_files(&weights_root, &mut gguf_files)?;
        }

        let search_root = if weights_root.is_file() {
            weights_root.parent().unwrap_or(Path::new(".")).to_path_buf()
        } else {
            weights_root.clone()
        };

        let mut entries: Vec<ModelEntry> = gguf_files
            .into_iter()
            .map(|path| {
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("unknown-model")
                    .to_string();
                ModelEntry {
                    id: build_model_id(&search_root, &path),
                    family: infer_family_from_filename(&stem),
                    tokenizer_path: infer_tokenizer_path(&search_root, &path),
                    path,
                }
            })
            .collect();

        entries.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(Self {
            weights_root,
            entries,
        })
    }

    /// Code-tuned checkpoints first, then Qwen, Llama and anything else.
    pub fn preferred(&self) -> Result<&ModelEntry, EngineError> {
        let rank = |entry: &ModelEntry| {
            let code_tuned = entry.id.to_lowercase().contains("code");
            let family_rank = match entry.family {
                ModelFamily::Qwen => 0,
                ModelFamily::Llama => 1,
                ModelFamily::Unknown => 2,
            };
            (!code_tuned, family_rank)
        };

        self.entries
            .iter()
            .min_by_key(|entry| rank(*entry))
            .ok_or_else(|| {
                EngineError::load(format!(
                    "no GGUF weights found under {}",
                    self.weights_root.display()
                ))
            })
    }
}

fn infer_family_from_filename(name: &str) -> ModelFamily {
    let lowered = name.to_lowercase();
    if lowered.contains("qwen") {
        ModelFamily::Qwen
    } else if lowered.contains("llama") {
        ModelFamily::Llama
    } else {
        ModelFamily::Unknown
    }
}

fn is_gguf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gguf"))
}

fn collect_gguf_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), EngineError> {
    let entries = fs::read_dir(dir).map_err(|e| {
        EngineError::load(format!("weights directory read failed '{}': {}", dir.display(), e))
    })?;

    for entry in entries {
        let path = entry
            .map_err(|e| {
                EngineError::load(format!(
                    "weights directory entry read failed '{}': {}",
                    dir.display(),
                    e
                ))
            })?
            .path();

        if path.is_dir() {
            collect_gguf_files(&path, out)?;
        } else if path.is_file() && is_gguf(&path) {
            out.push(path);
        }
    }

    Ok(())
}

fn build_model_id(root: &Path, model_path: &Path) -> String {
    let mut relative = model_path
        .strip_prefix(root)
        .unwrap_or(model_path)
        .to_path_buf();
    relative.set_extension("");
    relative.to_string_lossy().replace('\\', "/")
}

fn infer_tokenizer_path(root: &Path, model_path: &Path) -> Option<PathBuf> {
    let local_tok = model_path.parent().unwrap_or(root).join("tokenizer.json");
    if local_tok.exists() {
        return Some(local_tok);
    }

    let root_tok = root.join("tokenizer.json");
    if root_tok.exists() {
        return Some(root_tok);
    }

    None
}
