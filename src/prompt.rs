//! Prompt assembly: static instructions context, per-query search context,
//! and the outgoing message sent to the model.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// System preamble carried on the first turn of a workspace. Subsequent turns
/// omit it because the model already holds it in its rolling history.
pub const SYSTEM_INSTRUCTION: &str = "You have access to recent internet search results for every user query. \
These results will be provided to you in the context. Use this information when relevant to the conversation. \
Always cite your sources by providing the URLs of the resources you used in your response. \
Format the sources on a new line starting with \"Source: \" followed by the URL.";

/// Static instructions dataset: a JSON object with an `instructions` field
/// holding a sequence of single-key objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstructionsData {
    #[serde(default)]
    pub instructions: Vec<serde_json::Map<String, serde_json::Value>>,
}

impl InstructionsData {
    /// Reads the dataset once at startup. A missing or malformed file is not
    /// fatal; the static context then renders as "N/A".
    pub fn load(path: &Path) -> Self {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "instructions dataset unavailable");
                return Self::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "instructions dataset is malformed");
            Self::default()
        })
    }
}

pub struct PromptAssembler {
    instructions: InstructionsData,
}

impl PromptAssembler {
    pub fn new(instructions: InstructionsData) -> Self {
        Self { instructions }
    }

    pub fn instructions(&self) -> &InstructionsData {
        &self.instructions
    }

    /// Numbered list built from the instructions dataset, or "N/A" when the
    /// dataset is absent or empty.
    pub fn static_context(&self) -> String {
        let joined = self
            .instructions
            .instructions
            .iter()
            .filter_map(|entry| entry.values().next())
            .map(value_text)
            .enumerate()
            .map(|(i, text)| format!("{}. {}", i + 1, text))
            .collect::<Vec<_>>()
            .join(" | ");

        if joined.is_empty() {
            "Instructions: N/A".to_string()
        } else {
            format!("Instructions: {}", joined)
        }
    }

    /// Static context plus the formatted search results for `query`, plus the
    /// boilerplate telling the model how to cite sources and how to ask for a
    /// follow-up search.
    pub fn search_context(&self, query: &str, formatted_results: &str) -> String {
        format!(
            "{}\n\nRecent Internet Search Results for \"{}\":\n{}\n\n\
             Use these search results to inform your response when relevant. \
             Always cite your sources by providing the URLs of the resources you used. \
             Format the sources on a new line starting with \"Source: \" followed by the URL. \
             Only if you can't reply to the user's query, start your response with \"/search\" \
             followed by what you need to search for.",
            self.static_context(),
            query,
            formatted_results
        )
    }

    /// The message actually sent to the model for this turn. The system
    /// preamble rides along only on a workspace's first turn.
    pub fn outgoing_message(
        &self,
        query: &str,
        search_context: &str,
        is_first_turn: bool,
    ) -> String {
        if is_first_turn {
            format!(
                "{}\n\nUser query: {}\n\n{}",
                SYSTEM_INSTRUCTION, query, search_context
            )
        } else {
            format!("User query: {}\n\n{}", query, search_context)
        }
    }

    /// Context message for the single follow-up search round.
    pub fn additional_context(&self, query: &str, formatted_results: &str) -> String {
        format!(
            "Additional search results for \"{}\":\n{}\n\n\
             Please provide an updated response based on this additional information only when needed. \
             Remember to cite your sources.",
            query, formatted_results
        )
    }
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
