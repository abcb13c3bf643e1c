//! Request ID generation

use uuid::Uuid;

/// Per-request correlation id, echoed in the `x-request-id` response header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh request id
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string().to_uppercase())
    }

    /// Create a request ID with a specific value (for testing)
    pub fn with_id(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_generation() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();

        // IDs should be unique
        assert_ne!(id1, id2);

        // ID should be uppercase hex
        assert_eq!(id1.as_str().len(), 32);
        assert!(id1
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_request_id_with_id() {
        let id = RequestId::with_id("test-id-123");
        assert_eq!(id.as_str(), "test-id-123");
        assert_eq!(id.to_string(), "test-id-123");
    }
}
