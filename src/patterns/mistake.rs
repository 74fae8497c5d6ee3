//! Mistake-type detection: maps user pushback to preventive instructions.

use crate::patterns::clip;
use regex::Regex;
use std::sync::LazyLock;

/// Boost applied to each preventive instruction for a detected mistake type.
pub const OUTCOME_BOOST_AMOUNT: i64 = 5;

/// One mistake type: compiled alternation plus the instruction files that
/// prevent it.
pub struct MistakeGroup {
    pub mistake_type: &'static str,
    pub regex: Regex,
    pub preventive_instructions: &'static [&'static str],
}

fn group(
    mistake_type: &'static str,
    patterns: &[&str],
    preventive_instructions: &'static [&'static str],
) -> MistakeGroup {
    MistakeGroup {
        mistake_type,
        regex: Regex::new(&format!("(?i){}", patterns.join("|"))).expect("invalid regex"),
        preventive_instructions,
    }
}

/// Declaration order is match priority: the first matching type wins.
static MISTAKE_GROUPS: LazyLock<Vec<MistakeGroup>> = LazyLock::new(|| {
    vec![
        group(
            "incomplete_implementation",
            &[
                r"not\s+good\s+enough",
                r"thoroughly\s+analyze\s+all",
                r"guessing\s+is\s+against",
                r"cutting\s+corners",
                r"goal\s+of\s+completeness",
                r"circumvent.*directive",
                r"abbreviated\s+manner",
                r"lost\s+confidence",
                r"gotten\s+off\s+task",
                r"isn'?t\s+an?\s+accurate\s+reflection",
                r"ongoing\s+problem",
                r"not\s+following\s+the\s+process",
                r"revert.*start\s+again",
                r"(6th|fifth|fourth|third)\s+time.*stop\s+you",
            ],
            &[
                "architecture_principles.instructions.md",
                "development_workflow.instructions.md",
            ],
        ),
        group(
            "premature_action",
            &[
                r"no,?\s+you\s+may\s+not",
                r"please\s+first\s+show",
                r"let'?s\s+determine",
                r"shouldn'?t\s+consider\s+it\s+correct",
                r"did\s+you\s+verify.*first",
                r"before\s+you\s+(do|proceed|continue)",
            ],
            &[
                "issue_closure.instructions.md",
                "issue_status_in_progress.instructions.md",
            ],
        ),
        group(
            "github_api_misuse",
            &[
                r"don'?t\s+see\s+any\s+changes\s+to\s+the\s+project\s*board",
                r"not\s+in\s+the\s+right\s+place",
                r"serious\s+mistakes.*project\s*board",
                r"should\s+never\s+have\s+been\s+created",
                r"project\s*board.*wrong",
            ],
            &[
                "github_project_status_workflow.instructions.md",
                "github_essentials.instructions.md",
            ],
        ),
        group(
            "closure_checklist_skip",
            &[
                r"complete\s+this\s+entire\s+checklist",
                r"confirm\s+the\s+status\s+of\s+every",
                r"missing\s+a\s+major\s+procedural\s+gate",
                r"checklist.*not\s+(being\s+)?used",
            ],
            &["issue_closure.instructions.md"],
        ),
        group(
            "commencement_checklist_skip",
            &[
                r"did\s+you\s+verify\s+the\s+status\s+of\s+issues?",
                r"check\s+prerequisites?\s+first",
                r"before\s+starting\s+work",
            ],
            &[
                "issue_status_in_progress.instructions.md",
                "issue_commencement.instructions.md",
            ],
        ),
        group(
            "over_engineering",
            &[
                r"overcomplicat(ing|e)",
                r"don'?t\s+overcomplicate",
                r"already\s+(did|done|broke\s+out)",
                r"too\s+complex",
            ],
            &["architecture_principles.instructions.md"],
        ),
        group(
            "wrong_file_location",
            &[
                r"not\s+the\s+right\s+(place|location|directory)",
                r"should\s+be\s+stored\s+outside",
                r"wrong\s+(place|location|directory)",
                r"moved\s+(them|it)\s+to\s+the\s+correct",
            ],
            &[
                "documentation_placement.instructions.md",
                "repository_organization.instructions.md",
            ],
        ),
        group(
            "misunderstanding_architecture",
            &[
                r"why\s+are\s+they\s+competing",
                r"became\s+confused",
                r"misunderstand.*architecture",
                r"that'?s\s+not\s+how.*works",
            ],
            &[
                "mcp_deployment_architecture.instructions.md",
                "architecture_principles.instructions.md",
            ],
        ),
    ]
});

/// Mistake detection outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MistakeInfo {
    pub detected: bool,
    /// First matching mistake type.
    pub mistake_type: Option<&'static str>,
    pub signals: Vec<String>,
    /// Preventive instruction filenames to boost.
    pub instruction_boosts: &'static [&'static str],
}

/// Detect a mistake type in a message.
pub fn detect_mistake(message: &str) -> MistakeInfo {
    let mut signals = Vec::new();
    let mut mistake_type = None;
    let mut instruction_boosts: &'static [&'static str] = &[];

    for mistake in MISTAKE_GROUPS.iter() {
        if let Some(m) = mistake.regex.find(message) {
            signals.push(format!("{}:{}", mistake.mistake_type, clip(m.as_str(), 30)));
            if mistake_type.is_none() {
                mistake_type = Some(mistake.mistake_type);
                instruction_boosts = mistake.preventive_instructions;
            }
        }
    }

    MistakeInfo {
        detected: !signals.is_empty(),
        mistake_type,
        signals,
        instruction_boosts,
    }
}
