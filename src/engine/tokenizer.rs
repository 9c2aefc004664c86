use std::path::{Path, PathBuf};

use tokenizers::{PaddingParams, Tokenizer};
use tracing::{info, warn};

use crate::errors::EngineError;
use crate::prompting::ModelFamily;

use super::SpecialTokens;

pub(super) fn resolve_tokenizer_path(
    explicit: Option<&Path>,
    catalog_hint: Option<PathBuf>,
    hub_repo: Option<&str>,
) -> Result<PathBuf, EngineError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(EngineError::load(format!(
            "configured tokenizer not found: {}",
            path.display()
        )));
    }

    if let Some(hint) = catalog_hint {
        if hint.exists() {
            return Ok(hint);
        }
    }

    let root_tok_path = Path::new("tokenizer.json");
    if root_tok_path.exists() {
        return Ok(root_tok_path.to_path_buf());
    }

    if let Some(repo) = hub_repo {
        info!(repo, "tokenizer.json not found locally, fetching from the hub");
        let api = hf_hub::api::sync::Api::new().map_err(EngineError::load)?;
        return api
            .model(repo.to_string())
            .get("tokenizer.json")
            .map_err(EngineError::load);
    }

    Err(EngineError::load(
        "tokenizer.json not found next to the weights and no hub repo configured",
    ))
}

pub(super) fn resolve_special_tokens(
    tokenizer: &Tokenizer,
    family: ModelFamily,
) -> Result<(u32, u32), EngineError> {
    match family {
        ModelFamily::Llama => {
            let eos = tokenizer
                .token_to_id("<|end_of_text|>")
                .or_else(|| tokenizer.token_to_id("</s>"))
                .ok_or_else(|| {
                    EngineError::load(
                        "tokenizer/model incompatibility: Llama requires <|end_of_text|> or </s>",
                    )
                })?;
            let eot = tokenizer.token_to_id("<|eot_id|>").unwrap_or(eos);
            Ok((eos, eot))
        }
        ModelFamily::Qwen => {
            let eos = tokenizer
                .token_to_id("<|endoftext|>")
                .or_else(|| tokenizer.token_to_id("</s>"))
                .ok_or_else(|| {
                    EngineError::load(
                        "tokenizer/model incompatibility: Qwen requires <|endoftext|> or </s>",
                    )
                })?;
            let eot = tokenizer.token_to_id("<|im_end|>").unwrap_or(eos);
            Ok((eos, eot))
        }
        ModelFamily::Unknown => {
            let eos = tokenizer
                .token_to_id("<|endoftext|>")
                .or_else(|| tokenizer.token_to_id("</s>"))
                .or_else(|| tokenizer.token_to_id("<|end_of_text|>"));
            match eos {
                Some(eos) => Ok((eos, eos)),
                None => {
                    warn!("no known end-of-sequence token in tokenizer, assuming id 2");
                    Ok((2, 2))
                }
            }
        }
    }
}

/// Pads with EOS when the tokenizer ships without a padding token.
pub(super) fn ensure_pad_token(tokenizer: &mut Tokenizer, eos: u32) -> u32 {
    if let Some(padding) = tokenizer.get_padding() {
        return padding.pad_id;
    }

    let pad_token = tokenizer.id_to_token(eos).unwrap_or_default();
    info!(pad_id = eos, pad_token = %pad_token, "tokenizer has no pad token, using EOS");
    tokenizer.with_padding(Some(PaddingParams {
        pad_id: eos,
        pad_token,
        ..Default::default()
    }));
    eos
}

pub(super) fn load_tokenizer(
    path: &Path,
    family: ModelFamily,
) -> Result<(Tokenizer, SpecialTokens), EngineError> {
    let mut tokenizer = Tokenizer::from_file(path).map_err(|e| {
        EngineError::load(format!("invalid tokenizer '{}': {}", path.display(), e))
    })?;
    let (eos, eot) = resolve_special_tokens(&tokenizer, family)?;
    let pad = ensure_pad_token(&mut tokenizer, eos);
    Ok((tokenizer, SpecialTokens { eos, eot, pad }))
}
