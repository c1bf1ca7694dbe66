//! Online restore bracketing
//!
//! While restoring into a live cluster, restored regions are pinned to a
//! reserved set of stores: those stores get a label and a placement rule
//! over the restored key span keeps replicas on stores carrying it.
//! Regions outside the span keep their normal placement. `finish` undoes
//! both.

use std::sync::Arc;

use tracing::{info, warn};

use br_core::KeyRange;

use crate::config::OnlineConfig;
use crate::error::Result;
use crate::placement::{LabelConstraint, LabelConstraintOp, PlacementRule, RuleRole};
use crate::split_client::SplitClient;

/// Replicas placed by the restore rule
const RESTORE_RULE_REPLICAS: u32 = 3;

pub struct OnlineRestore {
    client: Arc<dyn SplitClient>,
    config: OnlineConfig,
}

impl OnlineRestore {
    /// Label the reserved stores and install the placement rule over
    /// `span`, the key span being restored
    pub async fn begin(
        client: Arc<dyn SplitClient>,
        config: OnlineConfig,
        span: KeyRange,
    ) -> Result<Self> {
        client
            .set_stores_label(&config.stores, &config.label_key, &config.label_value)
            .await?;
        let rule = restore_rule(&config, &span);
        client.set_placement_rule(&rule).await?;
        info!(
            "Online restore of {} pinned to {} store(s) labeled {}={}",
            span,
            config.stores.len(),
            config.label_key,
            config.label_value
        );
        Ok(Self { client, config })
    }

    /// Remove the placement rule and clear the store labels
    pub async fn finish(self) -> Result<()> {
        if let Err(e) = self
            .client
            .delete_placement_rule(&self.config.rule_group, &self.config.rule_id)
            .await
        {
            warn!(
                "Failed to delete placement rule {}/{}: {}",
                self.config.rule_group, self.config.rule_id, e
            );
            return Err(e);
        }
        self.client
            .set_stores_label(&self.config.stores, &self.config.label_key, "")
            .await?;
        info!("Online restore released {} store(s)", self.config.stores.len());
        Ok(())
    }
}

/// Placement rule keeping every voter of `span` on the reserved stores
pub fn restore_rule(config: &OnlineConfig, span: &KeyRange) -> PlacementRule {
    PlacementRule::new(
        config.rule_group.clone(),
        config.rule_id.clone(),
        RuleRole::Voter,
        RESTORE_RULE_REPLICAS,
    )
    .with_key_range(span.start_key.clone(), span.end_key.clone())
    .with_index(100, true)
    .with_label_constraint(LabelConstraint::new(
        config.label_key.clone(),
        LabelConstraintOp::In,
        vec![config.label_value.clone()],
    ))
}
