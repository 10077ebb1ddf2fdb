use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::branch::BranchKey;
use crate::domain::lenient;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EstimateId(pub String);

impl From<String> for EstimateId {
    fn from(value: String) -> Self {
        Self(value.trim().to_string())
    }
}

impl fmt::Display for EstimateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upstream estimate status. The export mixes casings (`sold`, `Sold`,
/// `SOLD`), so parsing is case-insensitive and unknown values are kept.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EstimateStatus {
    Draft,
    Open,
    Pending,
    Sold,
    Lost,
    Cancelled,
    Other(String),
}

impl EstimateStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Draft => "draft",
            Self::Open => "open",
            Self::Pending => "pending",
            Self::Sold => "sold",
            Self::Lost => "lost",
            Self::Cancelled => "cancelled",
            Self::Other(raw) => raw,
        }
    }

    pub fn from_raw(value: &str) -> Self {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "draft" => Self::Draft,
            "open" => Self::Open,
            "pending" => Self::Pending,
            "sold" => Self::Sold,
            "lost" => Self::Lost,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Other(trimmed.to_string()),
        }
    }
}

impl FromStr for EstimateStatus {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_raw(value))
    }
}

impl fmt::Display for EstimateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EstimateStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EstimateStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_raw(&raw))
    }
}

fn optional_status<'de, D>(deserializer: D) -> Result<Option<EstimateStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient::optional_string(deserializer)?
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| EstimateStatus::from_raw(&raw)))
}

fn optional_branch<'de, D>(deserializer: D) -> Result<Option<BranchRef>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(name)) => Some(BranchRef { name: Some(name) }),
        Some(value @ Value::Object(_)) => serde_json::from_value(value).ok(),
        _ => None,
    })
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchRef {
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxDetails {
    #[serde(default, deserialize_with = "lenient::optional_decimal")]
    pub final_price_after_taxes: Option<Decimal>,
}

/// One job estimate as exported by the upstream estimating system.
///
/// Field names follow the export verbatim, including its mix of snake and
/// camel case. Every field is optional at the wire level; readers default
/// missing values at the point of use.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEstimate {
    #[serde(default, deserialize_with = "lenient::identifier")]
    pub id: EstimateId,
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "optional_status")]
    pub status: Option<EstimateStatus>,
    #[serde(default, deserialize_with = "optional_branch")]
    pub branch: Option<BranchRef>,
    #[serde(default, deserialize_with = "lenient::optional_decimal")]
    pub true_cost: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient::optional_decimal")]
    pub sub_services_retail_cost: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient::optional_decimal")]
    pub final_price: Option<Decimal>,
    #[serde(
        rename = "multiplierOverride",
        default,
        deserialize_with = "lenient::optional_decimal"
    )]
    pub multiplier_override: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient::optional_decimal")]
    pub discount_provided: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient::optional_decimal")]
    pub retail_cost: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient::optional_object")]
    pub tax_details: Option<TaxDetails>,
    #[serde(rename = "estimateSnapshot", default, deserialize_with = "lenient::optional_value")]
    pub estimate_snapshot: Option<Value>,
    #[serde(default, deserialize_with = "lenient::optional_value")]
    pub global_info: Option<Value>,
}

impl RawEstimate {
    pub fn branch_name(&self) -> Option<&str> {
        self.branch.as_ref().and_then(|branch| branch.name.as_deref())
    }

    pub fn branch_key(&self) -> BranchKey {
        BranchKey::from_name(self.branch_name())
    }

    pub fn discount_pct(&self) -> Decimal {
        self.discount_provided.unwrap_or(Decimal::ZERO)
    }

    /// Override value when present and non-zero; a zero override is unset.
    pub fn explicit_override(&self) -> Option<Decimal> {
        self.multiplier_override.filter(|value| !value.is_zero())
    }

    pub fn recorded_price_after_taxes(&self) -> Option<Decimal> {
        self.tax_details.as_ref().and_then(|details| details.final_price_after_taxes)
    }

    /// SHA-256 over the canonical JSON form of the decoded record.
    pub fn content_hash(&self) -> String {
        let canonical_payload = match serde_json::to_vec(self) {
            Ok(payload) => payload,
            Err(_) => self.id.0.as_bytes().to_vec(),
        };
        encode_hex(Sha256::digest(&canonical_payload).as_slice())
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{EstimateStatus, RawEstimate};
    use crate::domain::branch::BranchKey;

    #[test]
    fn status_parsing_is_case_insensitive() {
        assert_eq!("sold".parse::<EstimateStatus>(), Ok(EstimateStatus::Sold));
        assert_eq!("Sold".parse::<EstimateStatus>(), Ok(EstimateStatus::Sold));
        assert_eq!(" SOLD ".parse::<EstimateStatus>(), Ok(EstimateStatus::Sold));
        assert_eq!("Canceled".parse::<EstimateStatus>(), Ok(EstimateStatus::Cancelled));
        assert_eq!(
            "Awaiting Deposit".parse::<EstimateStatus>(),
            Ok(EstimateStatus::Other("Awaiting Deposit".to_string()))
        );
    }

    #[test]
    fn decodes_full_upstream_record() {
        let estimate: RawEstimate = serde_json::from_value(json!({
            "id": 4417,
            "name": "Roof tear-off",
            "status": "Sold",
            "branch": {"name": "Kent -WA"},
            "true_cost": 5000,
            "sub_services_retail_cost": null,
            "final_price": "12500.00",
            "multiplierOverride": 2.5,
            "discount_provided": 10,
            "retail_cost": 13000,
            "tax_details": {"final_price_after_taxes": 13762.5},
            "estimateSnapshot": {"snapshotData": {"multiplierRanges": []}},
            "global_info": {"2": 1}
        }))
        .expect("record should decode");

        assert_eq!(estimate.id.0, "4417");
        assert_eq!(estimate.status, Some(EstimateStatus::Sold));
        assert_eq!(estimate.branch_key(), BranchKey::Named("Kent -WA".to_string()));
        assert_eq!(estimate.true_cost, Some(Decimal::new(5000, 0)));
        assert_eq!(estimate.sub_services_retail_cost, None);
        assert_eq!(estimate.final_price, Some(Decimal::new(12_500, 0)));
        assert_eq!(estimate.explicit_override(), Some(Decimal::new(25, 1)));
        assert_eq!(estimate.recorded_price_after_taxes(), Some(Decimal::new(137_625, 1)));
        assert!(estimate.estimate_snapshot.is_some());
    }

    #[test]
    fn malformed_fields_degrade_instead_of_failing() {
        let estimate: RawEstimate = serde_json::from_value(json!({
            "id": "E-1",
            "branch": "Everett",
            "true_cost": "unknown",
            "tax_details": "none",
            "multiplierOverride": 0,
            "estimateSnapshot": null,
            "status": ""
        }))
        .expect("record should decode");

        assert_eq!(estimate.branch_name(), Some("Everett"));
        assert_eq!(estimate.true_cost, None);
        assert_eq!(estimate.tax_details, None);
        assert_eq!(estimate.explicit_override(), None);
        assert_eq!(estimate.estimate_snapshot, None);
        assert_eq!(estimate.status, None);
        assert_eq!(estimate.discount_pct(), Decimal::ZERO);
    }

    #[test]
    fn content_hash_is_stable_and_sensitive_to_changes() {
        let record = json!({"id": "E-9", "true_cost": 1200, "global_info": {"2": 0, "1": "x"}});
        let first: RawEstimate = serde_json::from_value(record.clone()).expect("decode");
        let second: RawEstimate = serde_json::from_value(record).expect("decode");

        assert_eq!(first.content_hash(), second.content_hash());
        assert_eq!(first.content_hash().len(), 64);

        let mut changed = first.clone();
        changed.final_price = Some(Decimal::ONE);
        assert_ne!(first.content_hash(), changed.content_hash());
    }
}
