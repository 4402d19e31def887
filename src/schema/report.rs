//! Plain-text validation report for operators

use super::validator::SchemaValidationResult;
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub tables: usize,
    pub valid: usize,
    pub missing: usize,
    pub with_issues: usize,
}

impl ValidationSummary {
    pub fn from_results(results: &[SchemaValidationResult]) -> Self {
        let mut summary = ValidationSummary {
            tables: results.len(),
            ..Default::default()
        };
        for result in results {
            if !result.exists {
                summary.missing += 1;
            } else if result.is_valid() {
                summary.valid += 1;
            } else {
                summary.with_issues += 1;
            }
        }
        summary
    }
}

/// Render validation results. `detailed` adds the per-column breakdown of
/// every table that is not valid.
pub fn generate_validation_report(results: &[SchemaValidationResult], detailed: bool) -> String {
    let summary = ValidationSummary::from_results(results);
    let mut out = String::new();

    let _ = writeln!(out, "Schema validation report");
    let _ = writeln!(out, "========================");
    let _ = writeln!(out, "Tables checked: {}", summary.tables);
    let _ = writeln!(out, "Valid:          {}", summary.valid);
    let _ = writeln!(out, "Missing:        {}", summary.missing);
    let _ = writeln!(out, "With issues:    {}", summary.with_issues);
    let _ = writeln!(out);

    for result in results {
        let tag = if !result.exists {
            "[MISSING]"
        } else if result.is_valid() {
            "[OK]     "
        } else {
            "[DIFF]   "
        };

        if result.exists {
            let _ = writeln!(out, "{} {} ({} rows)", tag, result.table, result.record_count);
        } else {
            let _ = writeln!(out, "{} {}", tag, result.table);
        }

        if !detailed || !result.exists || result.is_valid() {
            continue;
        }

        if !result.missing_columns.is_empty() {
            let _ = writeln!(out, "    missing columns: {}", result.missing_columns.join(", "));
        }
        if !result.different_columns.is_empty() {
            let _ = writeln!(out, "    different columns:");
            for difference in &result.different_columns {
                let _ = writeln!(out, "      - {}: {}", difference.column, difference.diff.describe());
            }
        }
        if !result.missing_foreign_keys.is_empty() {
            let _ = writeln!(
                out,
                "    missing foreign keys: {}",
                result.missing_foreign_keys.join(", ")
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::{CanonicalType, ColumnDiff, FieldDiff};
    use crate::schema::validator::ColumnDifference;

    fn result(table: &str, exists: bool) -> SchemaValidationResult {
        SchemaValidationResult {
            table: table.to_string(),
            exists,
            missing_columns: Vec::new(),
            different_columns: Vec::new(),
            missing_foreign_keys: Vec::new(),
            has_data: false,
            record_count: 0,
        }
    }

    fn sample() -> Vec<SchemaValidationResult> {
        let mut patients = result("patients", true);
        patients.record_count = 40;
        patients.missing_columns = vec!["blood_group".to_string()];
        patients.different_columns = vec![ColumnDifference {
            column: "notes".to_string(),
            diff: ColumnDiff {
                data_type: Some(FieldDiff {
                    expected: CanonicalType::String,
                    actual: CanonicalType::Text,
                }),
                ..Default::default()
            },
        }];

        vec![result("users", true), result("vaccinations", false), patients]
    }

    #[test]
    fn test_summary_counts() {
        let summary = ValidationSummary::from_results(&sample());
        assert_eq!(
            summary,
            ValidationSummary {
                tables: 3,
                valid: 1,
                missing: 1,
                with_issues: 1
            }
        );
    }

    #[test]
    fn test_brief_report_lists_statuses_only() {
        let report = generate_validation_report(&sample(), false);
        assert!(report.contains("[OK]      users (0 rows)"));
        assert!(report.contains("[MISSING] vaccinations"));
        assert!(report.contains("[DIFF]    patients (40 rows)"));
        assert!(!report.contains("blood_group"));
    }

    #[test]
    fn test_detailed_report_includes_columns() {
        let report = generate_validation_report(&sample(), true);
        assert!(report.contains("missing columns: blood_group"));
        assert!(report.contains("- notes: type: string -> text"));
    }
}
