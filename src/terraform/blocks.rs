//! HCL rendering of the per-component blocks equivalent to a transfer.

use crate::locator::ResourceAddress;
use crate::planner::TransferPlan;

pub fn removed_block(address: &ResourceAddress) -> String {
    format!(
        "removed {{\n  from = {}\n\n  lifecycle {{\n    destroy = false\n  }}\n}}",
        address
    )
}

pub fn import_block(address: &ResourceAddress, id: &str) -> String {
    format!("import {{\n  to = {}\n  id = \"{}\"\n}}", address, id)
}

/// Both halves of a plan, each headed by the deployment and component
/// it has to be applied in.
pub fn render_plan(plan: &TransferPlan) -> String {
    format!(
        "# deployment \"{}\", component \"{}\"\n{}\n\n# deployment \"{}\", component \"{}\"\n{}\n",
        plan.source.deployment_id,
        plan.source.component_id,
        removed_block(&plan.source.resource_address),
        plan.destination.deployment_id,
        plan.destination.component_id,
        import_block(&plan.destination.resource_address, &plan.resource_key.provider_id),
    )
}
