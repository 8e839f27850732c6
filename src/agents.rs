//! Feedback-agent catalog
//!
//! Agents are markdown files with a front-matter header (`name`,
//! `description`, `model`) and a prompt body, found under plugin directories
//! as `<root>/*/agents/*.md` or `<root>/agents/*.md`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TurnloopError};
use crate::storage::frontmatter;

const DESCRIPTION_MAX: usize = 120;
const DEFAULT_MODEL: &str = "inherit";

/// One discovered agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentSpec {
    pub name: String,
    pub description: Option<String>,
    pub model: String,
    pub prompt: String,
    pub source: PathBuf,
}

impl AgentSpec {
    /// Catalog line, e.g. `- **reviewer**: Reviews prose for clarity`
    pub fn catalog_line(&self) -> String {
        let desc = self.description.as_deref().unwrap_or("No description");
        format!("- **{}**: {}", self.name, truncate(desc, DESCRIPTION_MAX))
    }
}

#[derive(Debug, Default, Deserialize)]
struct AgentHeader {
    name: Option<String>,
    description: Option<String>,
    model: Option<String>,
}

/// Parse an agent file; `None` if it has no front matter
pub fn parse_agent(path: &Path, content: &str) -> Option<AgentSpec> {
    let (yaml, body) = frontmatter::split(content)?;
    let header = serde_yaml::from_str::<AgentHeader>(yaml).unwrap_or_else(|e| {
        debug!("Falling back to line parsing for {}: {}", path.display(), e);
        parse_header_lines(yaml)
    });

    let name = header
        .name
        .filter(|n| !n.trim().is_empty())
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))?;

    Some(AgentSpec {
        name,
        description: header.description.filter(|d| !d.trim().is_empty()),
        model: header.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        prompt: body.trim().to_string(),
        source: path.to_path_buf(),
    })
}

/// Lenient `key: value` parsing for headers that are not valid YAML
fn parse_header_lines(yaml: &str) -> AgentHeader {
    let mut header = AgentHeader::default();
    for line in yaml.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = unquote(value.trim()).to_string();
        match key.trim() {
            "name" => header.name = Some(value),
            "description" => header.description = Some(value),
            "model" => header.model = Some(value),
            _ => {}
        }
    }
    header
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max - 3).collect();
    format!("{}...", kept)
}

/// Discover agents under the search paths, de-duplicated by name and sorted
pub fn find_agents(search_paths: &[PathBuf]) -> Vec<AgentSpec> {
    let mut agents = Vec::new();
    let mut seen = HashSet::new();

    for root in search_paths {
        if !root.is_dir() {
            continue;
        }
        for pattern in [root.join("*").join("agents").join("*.md"), root.join("agents").join("*.md")] {
            let Some(pattern) = pattern.to_str() else {
                continue;
            };
            let entries = match glob::glob(pattern) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Invalid agent search pattern {}: {}", pattern, e);
                    continue;
                }
            };
            let mut files: Vec<PathBuf> = entries.filter_map(|e| e.ok()).collect();
            files.sort();

            for file in files {
                let Ok(content) = fs::read_to_string(&file) else {
                    continue;
                };
                if let Some(agent) = parse_agent(&file, &content) {
                    if seen.insert(agent.name.clone()) {
                        agents.push(agent);
                    }
                }
            }
        }
    }

    agents.sort_by(|a, b| a.name.cmp(&b.name));
    agents
}

/// Look up an agent by name
pub fn find_agent<'a>(agents: &'a [AgentSpec], name: &str) -> Option<&'a AgentSpec> {
    agents.iter().find(|a| a.name == name)
}

/// Full prompt of a named agent; unknown names are a validation error
pub fn agent_prompt<'a>(agents: &'a [AgentSpec], name: &str) -> Result<&'a str> {
    match find_agent(agents, name) {
        Some(agent) => Ok(&agent.prompt),
        None => {
            let known: Vec<&str> = agents.iter().map(|a| a.name.as_str()).collect();
            let known = if known.is_empty() { "none".to_string() } else { known.join(", ") };
            Err(TurnloopError::Validation(format!(
                "unknown agent '{}' (available: {})",
                name, known
            )))
        }
    }
}

/// The whole catalog as pretty JSON
pub fn catalog_json(agents: &[AgentSpec]) -> Result<String> {
    Ok(serde_json::to_string_pretty(agents)?)
}
