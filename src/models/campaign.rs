//! Campaign model.

use serde::{Deserialize, Serialize};

/// Marketing intent of a campaign.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CampaignType {
    #[default]
    Announcement,
    Sale,
    Deadline,
}

impl CampaignType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignType::Announcement => "announcement",
            CampaignType::Sale => "sale",
            CampaignType::Deadline => "deadline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "announcement" => Some(CampaignType::Announcement),
            "sale" => Some(CampaignType::Sale),
            "deadline" => Some(CampaignType::Deadline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub name: String,
    pub campaign_type: CampaignType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_a: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_b: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preheader: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignRequest {
    #[serde(default)]
    pub event_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub campaign_type: CampaignType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subject_a: Option<String>,
    #[serde(default)]
    pub subject_b: Option<String>,
    #[serde(default)]
    pub preheader: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCampaignRequest {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub campaign_type: Option<CampaignType>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subject_a: Option<String>,
    #[serde(default)]
    pub subject_b: Option<String>,
    #[serde(default)]
    pub preheader: Option<String>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignFilter {
    #[serde(default)]
    pub event_id: Option<String>,
}
