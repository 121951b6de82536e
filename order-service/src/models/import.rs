//! Import outcome reporting.

use serde::Serialize;

/// One failed row of an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportError {
    pub row_number: u32,
    pub record_id: Option<String>,
    pub error_message: String,
}

/// Aggregate outcome of one CSV import. Counters and errors accumulate
/// across every batch of the upload; `total_records` always equals
/// `success_count + failed_count`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub total_records: u64,
    pub success_count: u64,
    pub failed_count: u64,
    pub errors: Vec<ImportError>,
}

impl ImportResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record rows that were persisted.
    pub fn add_successes(&mut self, count: usize) {
        self.total_records += count as u64;
        self.success_count += count as u64;
    }

    /// Record one failed row, in upload order.
    pub fn add_failure(
        &mut self,
        row_number: u32,
        record_id: Option<String>,
        error_message: String,
    ) {
        self.total_records += 1;
        self.failed_count += 1;
        self.errors.push(ImportError {
            row_number,
            record_id,
            error_message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_stay_consistent() {
        let mut result = ImportResult::new();
        result.add_successes(3);
        result.add_failure(5, Some("ext-1".to_string()), "boom".to_string());
        result.add_successes(2);
        result.add_failure(9, None, "boom again".to_string());

        assert_eq!(result.total_records, 7);
        assert_eq!(result.success_count, 5);
        assert_eq!(result.failed_count, 2);
        assert_eq!(
            result.total_records,
            result.success_count + result.failed_count
        );
    }

    #[test]
    fn test_errors_keep_insertion_order() {
        let mut result = ImportResult::new();
        result.add_failure(4, None, "first".to_string());
        result.add_failure(2, Some("x".to_string()), "second".to_string());

        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].row_number, 4);
        assert_eq!(result.errors[1].row_number, 2);
        assert_eq!(result.errors[1].record_id.as_deref(), Some("x"));
    }

    #[test]
    fn test_zero_row_result_serializes_with_empty_errors() {
        let result = ImportResult::new();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["totalRecords"], 0);
        assert_eq!(json["successCount"], 0);
        assert_eq!(json["failedCount"], 0);
        assert!(json["errors"].as_array().unwrap().is_empty());
    }
}
