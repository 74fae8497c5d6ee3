//! Co-occurring instruction bundles.
//!
//! When one instruction of a known pair is routed, its partner gets a boost.
//! Pairs and rates come from ground-truth co-occurrence analysis of routing
//! events.

use std::collections::HashMap;
use std::sync::LazyLock;

/// A bundle partner: the co-occurring instruction, the boost it receives,
/// and the observed co-occurrence rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BundlePartner {
    pub id: &'static str,
    pub boost: i64,
    pub co_occurrence_rate: f64,
}

const fn partner(id: &'static str, boost: i64, co_occurrence_rate: f64) -> BundlePartner {
    BundlePartner {
        id,
        boost,
        co_occurrence_rate,
    }
}

static INSTRUCTION_BUNDLES: LazyLock<HashMap<&'static str, Vec<BundlePartner>>> =
    LazyLock::new(|| {
        HashMap::from([
            // Trust execution bundle (55% co-occurrence)
            (
                "trust_execution/development_workflow_essentials",
                vec![partner("trust_execution/trust_based_task_execution", 12, 0.55)],
            ),
            (
                "trust_execution/trust_based_task_execution",
                vec![partner("trust_execution/development_workflow_essentials", 12, 0.55)],
            ),
            // Batch processing bundle (61% co-occurrence)
            (
                "batch_processing_patterns",
                vec![
                    partner("safety_prevention/systematic_prevention_framework", 10, 0.61),
                    partner("safety_prevention/validation_first_execution", 8, 0.56),
                ],
            ),
            // Docker/container bundle (89% co-occurrence)
            (
                "docker_compose_patterns",
                vec![partner("infrastructure/container_management", 15, 0.89)],
            ),
            (
                "infrastructure/container_management",
                vec![
                    partner("docker_compose_patterns", 15, 0.89),
                    partner("mcp_deployment_architecture", 12, 1.00),
                ],
            ),
            (
                "mcp_deployment_architecture",
                vec![partner("infrastructure/container_management", 12, 1.00)],
            ),
            // Issue closure bundle (62% co-occurrence)
            (
                "github/issue_status_done",
                vec![partner("project_management/issue_closure", 10, 0.62)],
            ),
        ])
    });

/// Partners for an instruction id, if it keys a bundle.
pub fn bundle_partners(id: &str) -> Option<&'static [BundlePartner]> {
    INSTRUCTION_BUNDLES.get(id).map(Vec::as_slice)
}
