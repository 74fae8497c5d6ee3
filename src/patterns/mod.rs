//! Compiled pattern libraries used by the routing engines.
//!
//! Every collection here is compiled once at first use and immutable
//! afterwards, so engines can match without synchronization:
//!
//! - **approval**: suppression gate + commencement override
//! - **violation**: compliance-boost signals
//! - **semantic**: named flag groups boosting category sets
//! - **friction**: correction/retry/rejection detection
//! - **mistake**: mistake types mapped to preventive instructions
//! - **procedural**: step/checklist/compliance-gate detection
//! - **guidance**: explicit/implicit user-guidance triggers
//! - **bundles**: co-occurring instruction pairs

pub mod approval;
pub mod bundles;
pub mod friction;
pub mod guidance;
pub mod mistake;
pub mod procedural;
pub mod semantic;
pub mod violation;

pub use approval::{check_approval, ApprovalCheck};
pub use bundles::{bundle_partners, BundlePartner};
pub use friction::{detect_friction, FrictionInfo, FRICTION_BOOST_AMOUNT, FRICTION_BOOST_CATEGORIES};
pub use guidance::{detect_guidance, GuidanceKind, GuidanceMatch};
pub use mistake::{detect_mistake, MistakeInfo, OUTCOME_BOOST_AMOUNT};
pub use procedural::{detect_procedural, ProceduralInfo, PROCEDURAL_WARNING_THRESHOLD};
pub use semantic::{detect_semantic_flags, SemanticFlags};
pub use violation::{
    detect_violations, ViolationInfo, VIOLATION_BOOST_CATEGORIES, VIOLATION_CATEGORY_BOOST,
};

/// Clip a matched snippet to at most `max` bytes on a char boundary, for
/// signal labels.
pub(crate) fn clip(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
