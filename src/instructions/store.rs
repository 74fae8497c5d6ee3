//! Instruction store: two-phase loading with a protected core overlay.

use crate::error::Result;
use crate::instructions::parser::parse_instruction_file;
use crate::instructions::types::Instruction;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// In-memory index over the instruction corpus.
///
/// Loading happens in two phases whose order guarantees protection: the
/// bundled core tree first (every instruction marked protected), then the
/// user tree, where any id colliding with a protected id is skipped with a
/// warning.
pub struct InstructionStore {
    knowledge_root: PathBuf,
    core_root: Option<PathBuf>,
    instructions: HashMap<String, Instruction>,
    /// Insertion order of ids, for deterministic enumeration.
    order: Vec<String>,
    by_category: HashMap<String, Vec<String>>,
    protected_ids: HashSet<String>,
}

/// A full-text search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub instruction: Instruction,
    pub search_score: i64,
    pub search_matches: Vec<String>,
}

impl InstructionStore {
    /// Create an empty store over the given trees. Call [`load`](Self::load)
    /// to populate it.
    pub fn new(knowledge_root: impl Into<PathBuf>, core_root: Option<PathBuf>) -> Self {
        Self {
            knowledge_root: knowledge_root.into(),
            core_root,
            instructions: HashMap::new(),
            order: Vec::new(),
            by_category: HashMap::new(),
            protected_ids: HashSet::new(),
        }
    }

    /// Load all instruction files. Missing roots are not fatal; per-file
    /// errors are logged and the file skipped.
    pub fn load(&mut self) -> Result<usize> {
        let mut count = 0;

        // Phase 1: bundled core, protected from shadowing.
        if let Some(core_root) = self.core_root.clone() {
            if core_root.exists() {
                for path in instruction_files(&core_root) {
                    match parse_instruction_file(&path, &core_root) {
                        Ok(mut instruction) => {
                            instruction.protected = true;
                            self.protected_ids.insert(instruction.id.clone());
                            if let Some(base) = instruction.id.strip_prefix("core:") {
                                self.protected_ids.insert(base.to_string());
                            }
                            debug!("Loaded core instruction: {}", instruction.id);
                            self.index(instruction);
                            count += 1;
                        }
                        Err(e) => warn!("Error loading core instruction {}: {e}", path.display()),
                    }
                }
                info!("Loaded {count} core instruction files");
            }
        }

        // Phase 2: user tree. Optional; projects may run on core alone.
        let knowledge_root = self.knowledge_root.clone();
        if !knowledge_root.exists() {
            debug!(
                "No user instructions at {} (using core only)",
                knowledge_root.display()
            );
            return Ok(count);
        }

        for path in instruction_files(&knowledge_root) {
            match parse_instruction_file(&path, &knowledge_root) {
                Ok(instruction) => {
                    if self.protected_ids.contains(&instruction.id) {
                        warn!(
                            "Skipping '{}' from {} - shadows protected core instruction",
                            instruction.id,
                            path.display()
                        );
                        continue;
                    }
                    debug!("Loaded instruction: {}", instruction.id);
                    self.index(instruction);
                    count += 1;
                }
                Err(e) => warn!("Error loading instruction {}: {e}", path.display()),
            }
        }

        info!("Loaded {count} instruction files total");
        Ok(count)
    }

    fn index(&mut self, instruction: Instruction) {
        let id = instruction.id.clone();
        for category in &instruction.categories {
            self.by_category
                .entry(category.clone())
                .or_default()
                .push(id.clone());
        }
        if !self.instructions.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.instructions.insert(id, instruction);
    }

    /// Look up a specific instruction by category and name.
    ///
    /// Tries `category/name` as an id, then `name` alone, then falls back to
    /// matching the file stem with the category against the instruction's
    /// category set or parent directory.
    pub fn get(&self, category: &str, name: &str) -> Option<&Instruction> {
        let qualified = format!("{category}/{name}");
        if let Some(inst) = self.instructions.get(&qualified) {
            return Some(inst);
        }
        if let Some(inst) = self.instructions.get(name) {
            return Some(inst);
        }

        self.iter().find(|inst| {
            let stem = inst
                .file_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("");
            stem == name
                && (inst.categories.iter().any(|c| c == category)
                    || inst
                        .file_path
                        .parent()
                        .and_then(|p| p.file_name())
                        .and_then(|n| n.to_str())
                        == Some(category))
        })
    }

    /// Get an instruction by exact id.
    pub fn get_by_id(&self, id: &str) -> Option<&Instruction> {
        self.instructions.get(id)
    }

    /// All instructions of a category, in insertion order.
    pub fn by_category(&self, category: &str) -> Vec<&Instruction> {
        self.by_category
            .get(category)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.instructions.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All loaded instructions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.order.iter().filter_map(|id| self.instructions.get(id))
    }

    /// All instructions flagged `foundational: true`, in discovery order.
    pub fn foundational(&self) -> Vec<&Instruction> {
        self.iter().filter(|inst| inst.foundational).collect()
    }

    /// Case-insensitive full-text search across id, description, categories,
    /// tags, and body. Body hits include a snippet around the first match.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let query_lower = query.to_lowercase();
        let mut hits = Vec::new();

        for instruction in self.iter() {
            let mut score = 0;
            let mut matches = Vec::new();

            if instruction.id.to_lowercase().contains(&query_lower) {
                score += 10;
                matches.push(format!("ID: {}", instruction.id));
            }
            if instruction.description.to_lowercase().contains(&query_lower) {
                score += 8;
                matches.push(format!("Description: {}", instruction.description));
            }
            for category in &instruction.categories {
                if category.to_lowercase().contains(&query_lower) {
                    score += 7;
                    matches.push(format!("Category: {category}"));
                }
            }
            for tag in &instruction.tags {
                if tag.to_lowercase().contains(&query_lower) {
                    score += 5;
                    matches.push(format!("Tag: {tag}"));
                }
            }
            let body_lower = instruction.body.to_lowercase();
            if let Some(idx) = body_lower.find(&query_lower) {
                score += 3;
                matches.push(format!("Content: ...{}...", snippet(&instruction.body, idx)));
            }

            if score > 0 {
                hits.push(SearchHit {
                    instruction: instruction.clone(),
                    search_score: score,
                    search_matches: matches,
                });
            }
        }

        hits.sort_by(|a, b| b.search_score.cmp(&a.search_score));
        hits.truncate(limit);
        hits
    }

    /// Number of loaded instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True when nothing is loaded.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Number of protected (core) instructions currently indexed.
    pub fn protected_count(&self) -> usize {
        self.iter().filter(|inst| inst.protected).count()
    }

    /// Known category names.
    pub fn category_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_category.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// The user knowledge root this store was loaded from.
    pub fn knowledge_root(&self) -> &Path {
        &self.knowledge_root
    }
}

/// Enumerate `*.instructions.md` files under a root, sorted for determinism.
fn instruction_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(".instructions.md"))
        })
        .map(|entry| entry.into_path())
        .collect()
}

/// ±100 characters of context around a byte offset, clamped to char
/// boundaries.
fn snippet(body: &str, idx: usize) -> &str {
    let mut start = idx.saturating_sub(100);
    while start > 0 && !body.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (idx + 100).min(body.len());
    while end < body.len() && !body.is_char_boundary(end) {
        end += 1;
    }
    &body[start..end]
}
