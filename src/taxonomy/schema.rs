use serde::{Deserialize, Serialize};

/// Serialized taxonomy file: a versioned list of classification labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxonomyFile {
    #[serde(default = "default_version")]
    pub version: u32,
    pub labels: Vec<TaxonomyEntry>,
}

fn default_version() -> u32 {
    1
}

/// One classification label and what it implies for triage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxonomyEntry {
    pub label: String,
    pub category: Category,
    pub requires_reply: bool,
    /// High-urgency semantics. Only honored for complaint and lead categories.
    #[serde(default)]
    pub urgent: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Lead,
    Complaint,
    Customer,
    Supplier,
    Transaction,
    Notification,
    Marketing,
    Internal,
    Personal,
    Spam,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Lead => "lead",
            Category::Complaint => "complaint",
            Category::Customer => "customer",
            Category::Supplier => "supplier",
            Category::Transaction => "transaction",
            Category::Notification => "notification",
            Category::Marketing => "marketing",
            Category::Internal => "internal",
            Category::Personal => "personal",
            Category::Spam => "spam",
            Category::Other => "other",
        }
    }
}

impl TaxonomyEntry {
    /// Complaints and leads flagged urgent jump the queue.
    pub fn is_act_now(&self) -> bool {
        self.urgent && matches!(self.category, Category::Complaint | Category::Lead)
    }
}
