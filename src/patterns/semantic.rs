//! Semantic flag groups: message-level signals that boost category sets.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// A named semantic flag: one compiled alternation plus the categories it
/// boosts.
pub struct SemanticFlagGroup {
    pub name: &'static str,
    pub regex: Regex,
    pub boost_categories: &'static [&'static str],
    pub boost_amount: i64,
}

fn group(
    name: &'static str,
    patterns: &[&str],
    boost_categories: &'static [&'static str],
    boost_amount: i64,
) -> SemanticFlagGroup {
    let joined = format!("(?i){}", patterns.join("|"));
    SemanticFlagGroup {
        name,
        regex: Regex::new(&joined).expect("invalid regex"),
        boost_categories,
        boost_amount,
    }
}

static SEMANTIC_FLAGS: LazyLock<Vec<SemanticFlagGroup>> = LazyLock::new(|| {
    vec![
        group(
            "corrective",
            &[
                r"\bno\b", r"\bstop\b", r"\bwrong\b", r"\bincorrect\b", r"\bunacceptable\b",
                r"\bmistake\b", r"\berror\b", r"\bdon'?t\b", r"\bfail\b", r"\bbug\b",
            ],
            &["trust_execution", "learning", "safety_prevention"],
            8,
        ),
        group(
            "directive",
            &[
                r"\bplease\s+\w+", r"\bshould\b", r"\bmust\b", r"\bneed\s+to\b", r"\bensure\b",
                r"\balways\b", r"\bnever\b", r"\brequire\b",
            ],
            &["agentic_workflows", "safety_prevention", "project_management"],
            5,
        ),
        group(
            "compliance",
            &[
                r"\bfollow\b", r"\badhere\b", r"\bcomplian", r"\bstandard\b", r"\bpolicy\b",
                r"\bprocess\b", r"\bworkflow\b", r"\bguideline\b",
            ],
            &["safety_prevention", "agentic_workflows", "trust_execution"],
            8,
        ),
        group(
            "technical",
            &[
                r"\bgit\b", r"\bgithub\b", r"\bdocker\b", r"\bcontainer\b", r"\bmcp\b",
                r"\bserver\b", r"\bapi\b", r"\bdatabase\b", r"\bdb\b",
            ],
            &["infrastructure", "github_integration", "devops"],
            6,
        ),
        group(
            "meta",
            &[
                r"\bissue\b", r"\btask\b", r"\bepic\b", r"\bsprint\b", r"\bmilestone\b",
                r"\bproject\b", r"\bstatus\b", r"\bclose\b", r"\bboard\b",
            ],
            &["github_integration", "project_management"],
            6,
        ),
    ]
});

/// Semantic flag detection outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SemanticFlags {
    pub detected: bool,
    pub flags: Vec<&'static str>,
    /// Accumulated boost per category across all matched groups.
    pub category_boosts: BTreeMap<String, i64>,
}

/// Detect semantic flags in a message.
pub fn detect_semantic_flags(message: &str) -> SemanticFlags {
    let mut flags = Vec::new();
    let mut category_boosts: BTreeMap<String, i64> = BTreeMap::new();

    for flag in SEMANTIC_FLAGS.iter() {
        if flag.regex.is_match(message) {
            flags.push(flag.name);
            for category in flag.boost_categories {
                *category_boosts.entry((*category).to_string()).or_insert(0) +=
                    flag.boost_amount;
            }
        }
    }

    SemanticFlags {
        detected: !flags.is_empty(),
        flags,
        category_boosts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrective_flag() {
        let flags = detect_semantic_flags("that is wrong, stop");
        assert!(flags.detected);
        assert!(flags.flags.contains(&"corrective"));
        assert_eq!(flags.category_boosts.get("trust_execution"), Some(&8));
    }

    #[test]
    fn test_technical_flag() {
        let flags = detect_semantic_flags("restart the docker container");
        assert!(flags.flags.contains(&"technical"));
        assert_eq!(flags.category_boosts.get("infrastructure"), Some(&6));
    }

    #[test]
    fn test_boosts_accumulate_across_groups() {
        // "must" (directive) and "follow process" (compliance) both boost
        // safety_prevention: 5 + 8.
        let flags = detect_semantic_flags("you must follow the process");
        assert!(flags.flags.contains(&"directive"));
        assert!(flags.flags.contains(&"compliance"));
        assert_eq!(flags.category_boosts.get("safety_prevention"), Some(&13));
    }

    #[test]
    fn test_neutral_message() {
        let flags = detect_semantic_flags("summarize the readme");
        assert!(!flags.detected);
        assert!(flags.category_boosts.is_empty());
    }
}
