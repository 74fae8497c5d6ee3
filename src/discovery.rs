//! Discovery lifecycle: matching and auto-promoting knowledge candidates.
//!
//! Routing keywords are intersected with discovered artifacts' keyword sets;
//! a match in `DISCOVERED` status is promoted on first observation. Promotion
//! synthesizes an instruction file under the user instruction tree (so the
//! watcher's next reload cycle picks it up) and links an implementation row.

use crate::db::{
    artifacts::{self, ArtifactRow, ArtifactStatus},
    Database,
};
use crate::engine::PromotedDiscovery;
use crate::error::Result;
use std::path::PathBuf;
use tracing::{info, warn};

/// Maximum discovery candidates considered per routing request.
const MATCH_LIMIT: usize = 3;

/// Discovery matching and promotion over the persistence substrate.
pub struct DiscoveryEngine {
    project_root: PathBuf,
    db: Database,
}

impl DiscoveryEngine {
    pub fn new(project_root: impl Into<PathBuf>, db: Database) -> Self {
        Self {
            project_root: project_root.into(),
            db,
        }
    }

    /// Discoveries whose keyword sets intersect the given keywords, scored
    /// by overlap size, best first.
    pub fn find_matches(&self, keywords: &[String], limit: usize) -> Result<Vec<ArtifactRow>> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let discovered =
            artifacts::artifacts_by_status(&self.db, ArtifactStatus::Discovered, None, 1000)?;
        let keyword_set: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();

        let mut scored: Vec<(usize, ArtifactRow)> = discovered
            .into_iter()
            .filter_map(|row| {
                let overlap = row
                    .keywords
                    .iter()
                    .filter(|k| keyword_set.contains(&k.to_lowercase()))
                    .count();
                (overlap > 0).then_some((overlap, row))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(limit).map(|(_, row)| row).collect())
    }

    /// Promote a discovery: write the synthesized instruction file and link
    /// the implementation row. Returns the instruction path relative to the
    /// project root, or `None` when the discovery does not exist.
    pub fn promote(&self, discovery_id: i64) -> Result<Option<String>> {
        let Some(discovery) = artifacts::get_artifact(&self.db, discovery_id)? else {
            return Ok(None);
        };

        let slug = match &discovery.section_title {
            Some(title) => slugify(title),
            None => slugify(
                PathBuf::from(&discovery.source_file)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("discovery"),
            ),
        };
        let filename = format!(
            "{}_{slug}.instructions.md",
            discovery.source_type.to_lowercase()
        );

        let instruction_dir = self
            .project_root
            .join(".pongogo")
            .join("instructions")
            .join("_discovered");
        std::fs::create_dir_all(&instruction_dir)?;
        let instruction_path = instruction_dir.join(&filename);
        std::fs::write(&instruction_path, instruction_content(&discovery, &slug))?;

        let relative_path = instruction_path
            .strip_prefix(&self.project_root)
            .unwrap_or(&instruction_path)
            .display()
            .to_string();

        let category = source_category(&discovery.source_type);
        artifacts::promote_artifact(
            &self.db,
            discovery_id,
            &relative_path,
            Some(&format!("discovered:{slug}")),
            Some(category),
            discovery.section_title.as_deref(),
            Some(&format!("Auto-discovered from {}", discovery.source_file)),
        )?;

        info!("Discovery #{discovery_id} promoted to {relative_path}");
        Ok(Some(relative_path))
    }

    /// Routing hook: auto-promote matching discoveries on first observation.
    /// Failures are logged and absorbed; routing never waits on a reload.
    pub fn check_and_promote(&self, keywords: &[String]) -> Vec<PromotedDiscovery> {
        let matches = match self.find_matches(keywords, MATCH_LIMIT) {
            Ok(matches) => matches,
            Err(e) => {
                warn!("Discovery match check failed: {e}");
                return Vec::new();
            }
        };

        let mut promoted = Vec::new();
        for discovery in matches {
            if discovery.status != ArtifactStatus::Discovered.as_str() {
                continue;
            }
            match self.promote(discovery.id) {
                Ok(Some(instruction_file)) => promoted.push(PromotedDiscovery {
                    discovery_id: discovery.id,
                    source_file: discovery.source_file.clone(),
                    section_title: discovery.section_title.clone(),
                    instruction_file,
                    message: format!(
                        "Auto-created instruction from {} discovery",
                        discovery.source_type
                    ),
                }),
                Ok(None) => {}
                Err(e) => warn!("Discovery promotion failed for #{}: {e}", discovery.id),
            }
        }
        promoted
    }
}

fn source_category(source_type: &str) -> &'static str {
    match source_type {
        "CLAUDE_MD" => "project_guidance",
        "WIKI" => "architecture",
        "DOCS" => "documentation",
        _ => "discovered",
    }
}

fn instruction_content(discovery: &ArtifactRow, slug: &str) -> String {
    let title = discovery
        .section_title
        .clone()
        .unwrap_or_else(|| "Discovered Knowledge".to_string());
    let keywords: Vec<&str> = discovery.keywords.iter().take(10).map(String::as_str).collect();

    format!(
        "---\n\
         id: discovered:{slug}\n\
         description: {title}\n\
         categories: [{category}]\n\
         tags: [{keywords}]\n\
         metadata:\n\
         \x20 source_file: {source_file}\n\
         \x20 source_type: {source_type}\n\
         \x20 discovered_at: {discovered_at}\n\
         \x20 auto_generated: true\n\
         ---\n\
         \n\
         # {title}\n\
         \n\
         > **Source**: Automatically discovered from `{source_file}` during repository knowledge scan.\n\
         \n\
         {content}\n",
        category = source_category(&discovery.source_type),
        keywords = keywords.join(", "),
        source_file = discovery.source_file,
        source_type = discovery.source_type,
        discovered_at = discovery.discovered_at,
        content = discovery.section_content,
    )
}

/// Filename slug: lowercase, word chars only, whitespace/dashes collapsed to
/// underscores, capped at 50 chars.
fn slugify(text: &str) -> String {
    let lower = text.to_lowercase();
    let mut slug = String::new();
    let mut last_sep = true;
    for c in lower.chars() {
        if c.is_alphanumeric() {
            slug.push(c);
            last_sep = false;
        } else if (c.is_whitespace() || c == '-' || c == '_') && !last_sep {
            slug.push('_');
            last_sep = true;
        }
    }
    let slug = slug.trim_matches('_').to_string();
    slug.chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{artifacts::store_artifact_discovery, SourceType};
    use crate::instructions::InstructionStore;
    use tempfile::TempDir;

    fn setup() -> (TempDir, DiscoveryEngine) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join(".pongogo").join("pongogo.db")).unwrap();
        let engine = DiscoveryEngine::new(dir.path(), db);
        (dir, engine)
    }

    fn seed(engine: &DiscoveryEngine, title: &str, content: &str, keywords: &[&str]) -> i64 {
        store_artifact_discovery(
            &engine.db,
            "CLAUDE.md",
            SourceType::ClaudeMd,
            content,
            Some(title),
            &keywords.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        )
        .unwrap()
        .unwrap()
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Build & Deploy Rules"), "build_deploy_rules");
        assert_eq!(slugify("  spaced   out  "), "spaced_out");
        let long = "x".repeat(80);
        assert_eq!(slugify(&long).len(), 50);
    }

    #[test]
    fn test_find_matches_ranks_by_overlap() {
        let (_dir, engine) = setup();
        seed(&engine, "One", "a", &["docker"]);
        seed(&engine, "Two", "b", &["docker", "compose"]);

        let matches = engine
            .find_matches(&["docker".to_string(), "compose".to_string()], 10)
            .unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].section_title.as_deref(), Some("Two"));
    }

    #[test]
    fn test_find_matches_no_keywords() {
        let (_dir, engine) = setup();
        seed(&engine, "One", "a", &["docker"]);
        assert!(engine.find_matches(&[], 10).unwrap().is_empty());
    }

    #[test]
    fn test_promote_writes_instruction_file() {
        let (dir, engine) = setup();
        let id = seed(&engine, "Build Rules", "Always build first.", &["build"]);

        let path = engine.promote(id).unwrap().unwrap();
        assert_eq!(
            path,
            ".pongogo/instructions/_discovered/claude_md_build_rules.instructions.md"
        );

        let written = std::fs::read_to_string(dir.path().join(&path)).unwrap();
        assert!(written.contains("id: discovered:build_rules"));
        assert!(written.contains("Always build first."));

        // The synthesized file parses as a loadable instruction.
        let kb_root = dir.path().join(".pongogo").join("instructions");
        let mut store = InstructionStore::new(&kb_root, None);
        assert_eq!(store.load().unwrap(), 1);
        let inst = store.get_by_id("discovered:build_rules").unwrap();
        assert_eq!(inst.categories[0], "_discovered");
        assert!(inst.categories.contains(&"project_guidance".to_string()));
    }

    #[test]
    fn test_check_and_promote_first_observation() {
        let (_dir, engine) = setup();
        seed(&engine, "Build Rules", "Always build first.", &["build"]);

        let promoted = engine.check_and_promote(&["build".to_string()]);
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].source_file, "CLAUDE.md");

        // Second observation: status is PROMOTED, nothing left to promote.
        let again = engine.check_and_promote(&["build".to_string()]);
        assert!(again.is_empty());
    }

    #[test]
    fn test_promote_missing_discovery() {
        let (_dir, engine) = setup();
        assert!(engine.promote(404).unwrap().is_none());
    }
}
