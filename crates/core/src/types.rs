/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Free-form attribute bag carried by canonical events.
pub type Attributes = serde_json::Map<String, serde_json::Value>;
