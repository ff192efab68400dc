//! Shared Entity Types
//!
//! Sanitized records kept by the caches. Only the fields needed for offline
//! browsing and search are retained, to control snapshot size.

use serde::{Deserialize, Serialize};

/// A sanitized remote file or folder record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    /// Provider-assigned entity ID
    pub id: String,
    /// Display name
    pub name: String,
    /// MIME type ("application/vnd.folder" for folders)
    pub mime_type: String,
    /// Parent folder ID, if known
    pub parent_id: Option<String>,
    /// Size in bytes (0 for folders)
    pub size_bytes: u64,
    /// Last modification time (seconds since the Unix epoch)
    pub modified_at: u64,
}

impl RemoteItem {
    /// Whether this item's name matches a search query (case-insensitive
    /// substring, mirroring the remote API's name search).
    pub fn matches_query(&self, query: &str) -> bool {
        self.name.to_lowercase().contains(&query.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_query_case_insensitive() {
        let item = RemoteItem {
            id: "f1".to_string(),
            name: "Quarterly Report.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            parent_id: None,
            size_bytes: 1024,
            modified_at: 0,
        };

        assert!(item.matches_query("report"));
        assert!(item.matches_query("QUARTERLY"));
        assert!(!item.matches_query("invoice"));
    }
}
