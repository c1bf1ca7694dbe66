//! Placement rule and store label side channel
//!
//! Plain HTTP against the metadata service leader, independent of the
//! region RPC path. Every call is a single attempt.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use br_core::{format_key, StoreId};

use crate::error::{Error, Result};
use crate::pd_client::check_status;

const RULE_PREFIX: &str = "/pd/api/v1/config/rule";

/// Replica role a rule places
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleRole {
    Voter,
    Leader,
    Follower,
    Learner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LabelConstraintOp {
    In,
    NotIn,
    Exists,
    NotExists,
}

/// Constraint on store labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelConstraint {
    pub key: String,
    pub op: LabelConstraintOp,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl LabelConstraint {
    pub fn new(key: impl Into<String>, op: LabelConstraintOp, values: Vec<String>) -> Self {
        Self {
            key: key.into(),
            op,
            values,
        }
    }
}

/// Placement rule document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRule {
    pub group_id: String,
    pub id: String,
    #[serde(default)]
    pub index: i32,
    #[serde(default)]
    pub r#override: bool,
    #[serde(default, with = "br_core::keys::hex_bytes")]
    pub start_key: Vec<u8>,
    #[serde(default, with = "br_core::keys::hex_bytes")]
    pub end_key: Vec<u8>,
    pub role: RuleRole,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_constraints: Vec<LabelConstraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub location_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub isolation_level: String,
}

impl PlacementRule {
    /// Rule covering the whole key space
    pub fn new(group_id: impl Into<String>, id: impl Into<String>, role: RuleRole, count: u32) -> Self {
        Self {
            group_id: group_id.into(),
            id: id.into(),
            index: 0,
            r#override: false,
            start_key: Vec::new(),
            end_key: Vec::new(),
            role,
            count,
            label_constraints: Vec::new(),
            location_labels: Vec::new(),
            isolation_level: String::new(),
        }
    }

    pub fn with_key_range(mut self, start_key: Vec<u8>, end_key: Vec<u8>) -> Self {
        self.start_key = start_key;
        self.end_key = end_key;
        self
    }

    pub fn with_label_constraint(mut self, constraint: LabelConstraint) -> Self {
        self.label_constraints.push(constraint);
        self
    }

    pub fn with_index(mut self, index: i32, r#override: bool) -> Self {
        self.index = index;
        self.r#override = r#override;
        self
    }
}

/// Normalize a leader address into an HTTP base URL
///
/// Adds `https://` (TLS) or `http://` when no scheme is present and trims
/// trailing slashes. Returns `None` for an empty address.
pub fn normalize_api_addr(addr: &str, tls: bool) -> Option<String> {
    let addr = addr.trim().trim_end_matches('/');
    if addr.is_empty() {
        return None;
    }
    if addr.starts_with("http://") || addr.starts_with("https://") {
        Some(addr.to_string())
    } else if tls {
        Some(format!("https://{}", addr))
    } else {
        Some(format!("http://{}", addr))
    }
}

/// HTTP client for placement rules and store labels
#[derive(Debug, Clone)]
pub struct PlacementApi {
    http: reqwest::Client,
    tls: bool,
}

impl PlacementApi {
    pub fn new(http: reqwest::Client, tls: bool) -> Self {
        Self { http, tls }
    }

    fn base(&self, leader_addr: &str) -> Result<String> {
        normalize_api_addr(leader_addr, self.tls).ok_or(Error::PdLeaderNotFound)
    }

    pub async fn get_rule(&self, leader_addr: &str, group_id: &str, rule_id: &str) -> Result<PlacementRule> {
        let url = format!("{}{}/{}/{}", self.base(leader_addr)?, RULE_PREFIX, group_id, rule_id);
        let resp = self.http.get(&url).send().await?;
        Ok(check_status(resp, &url).await?.json().await?)
    }

    pub async fn set_rule(&self, leader_addr: &str, rule: &PlacementRule) -> Result<()> {
        let url = format!("{}{}", self.base(leader_addr)?, RULE_PREFIX);
        let resp = self.http.post(&url).json(rule).send().await?;
        check_status(resp, &url).await?;
        info!(
            "Set placement rule {}/{} on [{}, {})",
            rule.group_id,
            rule.id,
            format_key(&rule.start_key),
            format_key(&rule.end_key)
        );
        Ok(())
    }

    pub async fn delete_rule(&self, leader_addr: &str, group_id: &str, rule_id: &str) -> Result<()> {
        let url = format!("{}{}/{}/{}", self.base(leader_addr)?, RULE_PREFIX, group_id, rule_id);
        let resp = self.http.delete(&url).send().await?;
        check_status(resp, &url).await?;
        info!("Deleted placement rule {}/{}", group_id, rule_id);
        Ok(())
    }

    /// Set one label on one store; an empty value clears the label
    pub async fn set_store_label(
        &self,
        leader_addr: &str,
        store_id: StoreId,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let url = format!("{}/pd/api/v1/store/{}/label", self.base(leader_addr)?, store_id);
        let body = HashMap::from([(key.to_string(), value.to_string())]);
        let resp = self.http.post(&url).json(&body).send().await?;
        check_status(resp, &url).await?;
        Ok(())
    }

    /// Label stores one after another, stopping at the first failure
    ///
    /// Stores labeled before the failure keep their label.
    pub async fn set_stores_label(
        &self,
        leader_addr: &str,
        store_ids: &[StoreId],
        key: &str,
        value: &str,
    ) -> Result<()> {
        for (done, &store_id) in store_ids.iter().enumerate() {
            if let Err(e) = self.set_store_label(leader_addr, store_id, key, value).await {
                warn!(
                    "Failed to set label {}={} on store {} after {} store(s): {}",
                    key, value, store_id, done, e
                );
                return Err(e);
            }
            info!("Set label {}={} on store {}", key, value, store_id);
        }
        Ok(())
    }
}
