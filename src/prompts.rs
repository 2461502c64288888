//! Prompt catalog loading.
//!
//! The file is a JSON object `{"prompts": [...]}` whose entries are either plain
//! strings or `{"id": ..., "text": ...}` objects. A missing or unreadable file
//! falls back to the built-in set.

use crate::types::Prompt;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

const BUILTIN_PROMPTS: &[&str] = &[
    "The worst thing to hear from your pilot",
    "A terrible name for a cruise ship",
    "What the cat is actually thinking",
    "The least popular ice cream flavor",
    "A rejected title for a superhero movie",
    "Something you should never say at a job interview",
    "The real reason dinosaurs went extinct",
    "A bad slogan for a dentist",
    "What aliens would complain about on Earth",
    "The most useless superpower",
    "A strange thing to find in your sandwich",
    "The secret ingredient in grandma's soup",
];

#[derive(Debug, Deserialize)]
struct RawCatalog {
    prompts: Vec<RawPrompt>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPrompt {
    Text(String),
    Full { id: String, text: String },
}

/// The prompts shipped with the binary
pub fn builtin_prompts() -> Vec<Prompt> {
    BUILTIN_PROMPTS
        .iter()
        .enumerate()
        .map(|(i, text)| Prompt {
            id: format!("builtin-{}", i + 1),
            text: text.to_string(),
        })
        .collect()
}

fn parse_catalog(contents: &str) -> Result<Vec<Prompt>, serde_json::Error> {
    let raw: RawCatalog = serde_json::from_str(contents)?;
    Ok(raw
        .prompts
        .into_iter()
        .enumerate()
        .filter_map(|(i, entry)| {
            let (id, text) = match entry {
                RawPrompt::Text(text) => (format!("prompt-{}", i + 1), text),
                RawPrompt::Full { id, text } => (id, text),
            };
            let text = text.trim();
            (!text.is_empty()).then(|| Prompt {
                id,
                text: text.to_string(),
            })
        })
        .collect())
}

/// Load prompts from `path`, falling back to [`builtin_prompts`]
pub async fn load_prompts(path: &Path) -> Vec<Prompt> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => match parse_catalog(&contents) {
            Ok(prompts) if !prompts.is_empty() => {
                info!(
                    path = %path.display(),
                    count = prompts.len(),
                    "Loaded prompt catalog"
                );
                prompts
            }
            Ok(_) => {
                warn!(path = %path.display(), "Prompt catalog is empty; using built-in prompts");
                builtin_prompts()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "Failed to parse prompt catalog; using built-in prompts"
                );
                builtin_prompts()
            }
        },
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "No prompt catalog found; using built-in prompts");
            builtin_prompts()
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "Failed to read prompt catalog; using built-in prompts"
            );
            builtin_prompts()
        }
    }
}
