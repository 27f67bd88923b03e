/*!
 * Registry Builder
 * Builder pattern for Registry construction
 */

use super::partition::{plan_world_switches, Partition};
use super::Registry;
use crate::core::errors::Result;
use crate::core::types::{vf_mask, WorldSwitchId};
use crate::device::Device;
use crate::world_switch::WorldSwitch;
use log::info;
use std::sync::Arc;

/// Builder for [`Registry`]
pub struct RegistryBuilder {
    dev: Arc<Device>,
    partitions: Vec<Partition>,
    inline: bool,
}

impl RegistryBuilder {
    pub fn new(dev: Arc<Device>) -> Self {
        Self {
            dev,
            partitions: Vec::new(),
            inline: false,
        }
    }

    /// Add a compute partition
    pub fn with_partition(mut self, partition: Partition) -> Self {
        self.partitions.push(partition);
        self
    }

    pub fn with_partitions(mut self, partitions: impl IntoIterator<Item = Partition>) -> Self {
        self.partitions.extend(partitions);
        self
    }

    /// World switches are driven by the caller instead of worker threads
    pub fn inline(mut self) -> Self {
        self.inline = true;
        self
    }

    pub fn build(self) -> Result<Registry> {
        let partitions = if self.partitions.is_empty() {
            let num_vf = self.dev.functions().num_vf();
            vec![Partition::whole_device(&self.dev, vf_mask(num_vf))]
        } else {
            self.partitions
        };

        let plans = plan_world_switches(&self.dev, &partitions)?;
        let mut switches = Vec::with_capacity(plans.len());
        for (id, plan) in plans.iter().enumerate() {
            let mut builder = WorldSwitch::builder(self.dev.clone(), id as WorldSwitchId, plan.block)
                .with_engines(plan.engine_mask)
                .with_allowed(plan.allowed);
            if self.inline {
                builder = builder.inline();
            }
            switches.push(builder.build()?);
        }

        info!(
            "Scheduler registry: {} world switches over {} partitions",
            switches.len(),
            partitions.len()
        );
        Ok(Registry::from_parts(self.dev, switches, partitions))
    }
}
