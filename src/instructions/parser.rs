//! Instruction file parsing and frontmatter normalization.

use crate::error::{Error, Result};
use crate::instructions::types::{Frontmatter, Instruction};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Splits optional YAML frontmatter from the Markdown body.
static FRONTMATTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^---\s*\n(.*?)\n---\s*\n(.*)$").expect("invalid regex"));

/// Parse an instruction file from disk.
///
/// `root` is the tree being walked; files directly under it take no
/// directory-derived category.
pub fn parse_instruction_file(path: &Path, root: &Path) -> Result<Instruction> {
    let content = std::fs::read_to_string(path)?;
    parse_instruction_text(path, root, &content)
}

/// Parse instruction text. A file without frontmatter is plain Markdown with
/// empty metadata; invalid YAML is an error the caller logs and skips.
pub fn parse_instruction_text(path: &Path, root: &Path, content: &str) -> Result<Instruction> {
    let (frontmatter, body) = match FRONTMATTER_RE.captures(content) {
        Some(caps) => {
            let yaml = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            // An empty header block is empty metadata, not a parse error.
            let frontmatter: Frontmatter = if yaml.trim().is_empty() {
                Frontmatter::default()
            } else {
                serde_yaml::from_str(yaml).map_err(|e| {
                    Error::instruction_parse(path.display().to_string(), e.to_string())
                })?
            };
            (frontmatter, body)
        }
        None => (Frontmatter::default(), content),
    };

    Ok(normalize(path, root, frontmatter, body))
}

fn normalize(path: &Path, root: &Path, fm: Frontmatter, body: &str) -> Instruction {
    // Directory-derived category first, preserving category/name matching
    // conventions downstream. Files directly at the root get none.
    let mut categories = Vec::new();
    let parent = path.parent();
    if parent != Some(root) {
        if let Some(dir) = parent.and_then(|p| p.file_name()).and_then(|n| n.to_str()) {
            categories.push(dir.to_string());
        }
    }
    for cat in fm.categories.iter().chain(fm.domains.iter()) {
        if !categories.contains(cat) {
            categories.push(cat.clone());
        }
    }

    // `patterns` stands in for tags when tags are absent.
    let tags = if fm.tags.is_empty() { fm.patterns } else { fm.tags };

    // Top-level `applies_to` merges into routing.applyTo.globs (set union).
    let mut routing = fm.routing;
    for glob in fm.applies_to {
        if !routing.apply_to.globs.contains(&glob) {
            routing.apply_to.globs.push(glob);
        }
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed")
        .to_string();

    let mut metadata = fm.metadata;
    metadata.extend(fm.extra);

    Instruction {
        file_path: path.to_path_buf(),
        id: fm.id.unwrap_or(stem),
        version: fm.version.unwrap_or_else(|| "1.0.0".to_string()),
        schema: fm.schema.unwrap_or_else(|| "pongogo-instruction-v1".to_string()),
        description: fm.description.unwrap_or_default(),
        tags,
        categories,
        routing,
        body: body.trim().to_string(),
        foundational: fm.foundational,
        procedural: fm.procedural,
        protected: false,
        metadata,
    }
}
