//! Binding stages and their ordering constraints.

use std::fmt;

use serde::Serialize;

/// One step of the binding pipeline.
///
/// Declared in execution order. Each stage lists the stages whose output
/// it consumes; running it before those have completed is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingStage {
    Releases,
    ExistingDeployment,
    ResourcePools,
    Stemcells,
    Templates,
    Properties,
    UnallocatedVms,
    InstanceNetworks,
    CompilePackages,
    Dns,
}

impl BindingStage {
    /// The eight stages run by the "Preparing deployment" phase, in order.
    pub const PREPARE: [BindingStage; 8] = [
        BindingStage::Releases,
        BindingStage::ExistingDeployment,
        BindingStage::ResourcePools,
        BindingStage::Stemcells,
        BindingStage::Templates,
        BindingStage::Properties,
        BindingStage::UnallocatedVms,
        BindingStage::InstanceNetworks,
    ];

    pub fn prerequisites(self) -> &'static [BindingStage] {
        use BindingStage::*;
        match self {
            Releases | ExistingDeployment | ResourcePools => &[],
            Stemcells => &[ResourcePools],
            Templates => &[Releases, Stemcells],
            Properties => &[ResourcePools],
            UnallocatedVms => &[ExistingDeployment, ResourcePools],
            InstanceNetworks => &[ExistingDeployment, ResourcePools],
            CompilePackages => &[Templates],
            Dns => &[InstanceNetworks, CompilePackages],
        }
    }

    /// Progress label announced when the stage runs.
    pub fn label(self) -> &'static str {
        match self {
            BindingStage::Releases => "Binding releases",
            BindingStage::ExistingDeployment => "Binding existing deployment",
            BindingStage::ResourcePools => "Binding resource pools",
            BindingStage::Stemcells => "Binding stemcells",
            BindingStage::Templates => "Binding templates",
            BindingStage::Properties => "Binding properties",
            BindingStage::UnallocatedVms => "Binding unallocated VMs",
            BindingStage::InstanceNetworks => "Binding instance networks",
            BindingStage::CompilePackages => "Compiling packages",
            BindingStage::Dns => "Binding DNS",
        }
    }
}

impl fmt::Display for BindingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
