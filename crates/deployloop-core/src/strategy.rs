use crate::deploy::{self, DeployContext, DeployStep};
use crate::error::Result;
use crate::outputs::{self, OutputsContext, StackOutputs};
use crate::types::DeploymentKind;

/// How one deployment kind is deployed and how its outputs are read back.
pub struct DeployStrategy {
    pub kind: DeploymentKind,
    pub plan: fn(&DeployContext) -> Result<Vec<DeployStep>>,
    pub extract: fn(&OutputsContext) -> Result<StackOutputs>,
}

static STRATEGIES: [DeployStrategy; 6] = [
    DeployStrategy {
        kind: DeploymentKind::Sam,
        plan: deploy::plan_sam,
        extract: outputs::extract_stack,
    },
    DeployStrategy {
        kind: DeploymentKind::Cdk,
        plan: deploy::plan_cdk,
        extract: outputs::extract_cdk,
    },
    DeployStrategy {
        kind: DeploymentKind::Terraform,
        plan: deploy::plan_terraform,
        extract: outputs::extract_terraform,
    },
    DeployStrategy {
        kind: DeploymentKind::Serverless,
        plan: deploy::plan_serverless,
        extract: outputs::extract_serverless,
    },
    DeployStrategy {
        kind: DeploymentKind::Cloudformation,
        plan: deploy::plan_cloudformation,
        extract: outputs::extract_stack,
    },
    DeployStrategy {
        kind: DeploymentKind::Lambda,
        plan: deploy::plan_lambda,
        extract: outputs::extract_stack,
    },
];

/// `None` for [`DeploymentKind::Unknown`].
pub fn strategy_for(kind: DeploymentKind) -> Option<&'static DeployStrategy> {
    STRATEGIES.iter().find(|s| s.kind == kind)
}
