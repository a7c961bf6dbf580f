use serde::{Deserialize, Serialize};

use crate::config::LeadServerConfig;

/// A lead-generation form submission.
///
/// Field names follow the public JSON contract (camelCase). Required fields
/// default to empty strings on deserialization so a partial payload can be
/// validated and reported field by field instead of failing wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSubmission {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub restaurant_name: String,
    #[serde(default)]
    pub restaurant_type: String,
    #[serde(default)]
    pub num_branches: String,
    #[serde(default)]
    pub menu_size: String,
    #[serde(default)]
    pub state: String,

    // Optional attribution fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_medium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landing_page: Option<String>,
}

impl LeadSubmission {
    /// Names (contract spelling) of required fields that are missing or blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let required: [(&'static str, &str); 9] = [
            ("firstName", &self.first_name),
            ("lastName", &self.last_name),
            ("email", &self.email),
            ("phone", &self.phone),
            ("restaurantName", &self.restaurant_name),
            ("restaurantType", &self.restaurant_type),
            ("numBranches", &self.num_branches),
            ("menuSize", &self.menu_size),
            ("state", &self.state),
        ];
        required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn validate(&self) -> Result<(), String> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("Missing required fields: {}", missing.join(", ")))
        }
    }
}

/// A persisted lead, as forwarded to the downstream webhooks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredLead {
    pub id: i64,
    pub submitted_at: String,
    #[serde(flatten)]
    pub lead: LeadSubmission,
}

/// POST a stored lead to one webhook. Failures are logged and swallowed; a
/// dead automation tool or CRM must never fail the submission itself.
async fn forward_to(client: &reqwest::Client, label: &str, url: &str, record: &StoredLead) {
    match client.post(url).json(record).send().await {
        Ok(response) if response.status().is_success() => {
            tracing::info!("Lead {} forwarded to {}", record.id, label);
        }
        Ok(response) => {
            tracing::warn!(
                "{} webhook rejected lead {}: {}",
                label,
                record.id,
                response.status()
            );
        }
        Err(e) => {
            tracing::warn!("{} webhook unreachable for lead {}: {}", label, record.id, e);
        }
    }
}

/// Best-effort forwarding of a stored lead to the automation tool and the CRM.
pub fn spawn_webhook_forwards(
    client: reqwest::Client,
    config: &LeadServerConfig,
    record: StoredLead,
) {
    let automation = config.automation_webhook_url.clone();
    let crm = config.crm_webhook_url.clone();
    if automation.is_none() && crm.is_none() {
        return;
    }
    tokio::spawn(async move {
        if let Some(url) = automation {
            forward_to(&client, "automation", &url, &record).await;
        }
        if let Some(url) = crm {
            forward_to(&client, "crm", &url, &record).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_lead() -> LeadSubmission {
        serde_json::from_value(serde_json::json!({
            "firstName": "Dana",
            "lastName": "Rivera",
            "email": "dana@example.com",
            "phone": "+1-555-0100",
            "restaurantName": "Trattoria Sole",
            "restaurantType": "casual dining",
            "numBranches": "3",
            "menuSize": "40-60",
            "state": "CA"
        }))
        .unwrap()
    }

    #[test]
    fn complete_submission_validates() {
        assert!(complete_lead().validate().is_ok());
    }

    #[test]
    fn missing_fields_are_reported_by_contract_name() {
        let lead: LeadSubmission = serde_json::from_value(serde_json::json!({
            "firstName": "Dana",
            "email": "dana@example.com"
        }))
        .unwrap();
        let missing = lead.missing_fields();
        assert!(missing.contains(&"lastName"));
        assert!(missing.contains(&"restaurantName"));
        assert!(!missing.contains(&"firstName"));

        let err = lead.validate().unwrap_err();
        assert!(err.starts_with("Missing required fields: "));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let mut lead = complete_lead();
        lead.phone = "   ".to_string();
        assert_eq!(lead.missing_fields(), vec!["phone"]);
    }

    #[test]
    fn attribution_fields_round_trip() {
        let lead: LeadSubmission = serde_json::from_value(serde_json::json!({
            "firstName": "Dana",
            "utmSource": "newsletter"
        }))
        .unwrap();
        assert_eq!(lead.utm_source.as_deref(), Some("newsletter"));

        let value = serde_json::to_value(&lead).unwrap();
        assert_eq!(value["utmSource"], "newsletter");
        // Unset attribution fields stay off the wire.
        assert!(value.get("utmMedium").is_none());
    }

    #[test]
    fn stored_lead_flattens_submission() {
        let record = StoredLead {
            id: 7,
            submitted_at: "2026-08-23 10:00:00".to_string(),
            lead: complete_lead(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["firstName"], "Dana");
    }
}
