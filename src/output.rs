use tabled::settings::Style;
use tabled::{Table, Tabled};
use termtree::Tree;

use crate::executor::ExecutionReport;
use crate::ownership::OwnershipRecord;
use crate::planner::TransferPlan;
use crate::stack::Stack;

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Plan")]
    id: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Destination")]
    destination: String,
    #[tabled(rename = "Resource")]
    key: String,
    #[tabled(rename = "Preserve ID")]
    preserve_id: bool,
    #[tabled(rename = "Status")]
    status: String,
}

#[derive(Tabled)]
struct OwnerRow {
    #[tabled(rename = "Resource")]
    key: String,
    #[tabled(rename = "Owner")]
    owner: String,
    #[tabled(rename = "Readers")]
    readers: String,
}

pub fn plan_table<'a>(plans: impl IntoIterator<Item = &'a TransferPlan>) -> String {
    let rows = plans.into_iter().map(|plan| PlanRow {
        id: plan.id.to_string(),
        source: plan.source.to_string(),
        destination: plan.destination.to_string(),
        key: plan.resource_key.to_string(),
        preserve_id: plan.preserve_id,
        status: plan.status.to_string(),
    });
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn owner_table<'a>(records: impl IntoIterator<Item = &'a OwnershipRecord>) -> String {
    let rows = records.into_iter().map(|record| OwnerRow {
        key: record.resource_key.to_string(),
        owner: record.owning_deployment.clone(),
        readers: if record.readers.is_empty() {
            "-".to_string()
        } else {
            record.readers.iter().cloned().collect::<Vec<_>>().join(", ")
        },
    });
    Table::new(rows).with(Style::rounded()).to_string()
}

/// One line per phase the transaction went through.
pub fn report_summary(report: &ExecutionReport) -> String {
    let phases = report
        .phases
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(" -> ");
    format!("{} {}: {}", report.plan_id, report.status, phases)
}

/// Stack, then deployments with their backend, then components.
pub fn stack_tree(stack: &Stack) -> Tree<String> {
    let deployments = stack.deployments.values().map(|deployment| {
        let components = stack.components.iter().cloned().map(Tree::new);
        Tree::new(format!("{} ({})", deployment.id, deployment.backend.id())).with_leaves(components)
    });
    Tree::new(stack.id.clone()).with_leaves(deployments)
}
