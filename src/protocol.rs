//! Parser for the tagged-line micro-protocol spoken by the model.
//!
//! Two markers exist: a reply that opens with `/search` is a request for one
//! follow-up search round, and body lines opening with `Source: ` carry the
//! citation URLs the prompt boilerplate asks for. Centralizing the parsing
//! here keeps the orchestrator free of scattered string checks.

pub const SEARCH_DIRECTIVE: &str = "/search";
pub const SOURCE_PREFIX: &str = "Source: ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Plain(String),
    Source(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Follow-up query extracted from a leading `/search` directive, if any.
    /// A directive reply carries no body lines.
    pub directive: Option<String>,
    pub lines: Vec<Line>,
}

impl Reply {
    pub fn sources(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                Line::Source(url) => Some(url.as_str()),
                Line::Plain(_) => None,
            })
            .collect()
    }
}

/// Classifies a model reply. The `/search` marker is only meaningful as a
/// prefix of the whole reply; `Source: ` is matched per line.
pub fn parse_reply(text: &str) -> Reply {
    if let Some(rest) = text.strip_prefix(SEARCH_DIRECTIVE) {
        return Reply {
            directive: Some(rest.trim().to_string()),
            lines: Vec::new(),
        };
    }

    let lines = text
        .lines()
        .map(|line| match line.strip_prefix(SOURCE_PREFIX) {
            Some(url) => Line::Source(url.trim().to_string()),
            None => Line::Plain(line.to_string()),
        })
        .collect();

    Reply {
        directive: None,
        lines,
    }
}
