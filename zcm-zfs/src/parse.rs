// SPDX-License-Identifier: GPL-3.0-only

use crate::adapter::PropertyRow;
use crate::error::{Result, ZfsError};

/// Parse scripted `zfs list -H -p -o <properties>` output.
///
/// Columns are tab separated in the order requested; `-` means no value.
pub fn parse_list_output(output: &str, properties: &[&str]) -> Result<Vec<PropertyRow>> {
    let mut rows = Vec::new();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() != properties.len() {
            return Err(ZfsError::Parse(format!(
                "expected {} columns, found {}: {}",
                properties.len(),
                columns.len(),
                line
            )));
        }

        let mut row = PropertyRow::new();
        for (property, value) in properties.iter().zip(columns) {
            if value != "-" {
                row.insert(*property, value);
            }
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Whether stderr reports a dataset that does not exist.
pub fn is_missing_dataset(stderr: &str) -> bool {
    stderr.contains("does not exist")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROPERTIES: &[&str] = &["name", "zfs_clone_manager:path", "origin", "mountpoint"];

    #[test]
    fn parses_managed_tree_listing() {
        let output = "tank/zcm\t/srv/app\t-\t/srv/app/.clones\n\
                      tank/zcm/00000000\t/srv/app\t-\t/srv/app/.clones/00000000\n\
                      tank/zcm/00000001\t/srv/app\ttank/zcm/00000000@00000001\t/srv/app\n";

        let rows = parse_list_output(output, PROPERTIES).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].name(), "tank/zcm");
        assert_eq!(rows[0].get("origin"), None);
        assert_eq!(rows[2].get("origin"), Some("tank/zcm/00000000@00000001"));
        assert_eq!(rows[2].get("mountpoint"), Some("/srv/app"));
    }

    #[test]
    fn keeps_spaces_inside_columns() {
        let rows = parse_list_output("tank/a\t/srv/my app\t-\t/srv/my app/.clones\n", PROPERTIES)
            .unwrap();
        assert_eq!(rows[0].get("zfs_clone_manager:path"), Some("/srv/my app"));
    }

    #[test]
    fn rejects_short_rows() {
        let error = parse_list_output("tank/a\t-\n", PROPERTIES).unwrap_err();
        assert!(matches!(error, ZfsError::Parse(_)));
    }

    #[test]
    fn skips_blank_lines() {
        assert!(parse_list_output("\n\n", PROPERTIES).unwrap().is_empty());
    }

    #[test]
    fn recognises_missing_dataset() {
        assert!(is_missing_dataset("cannot open 'tank/nope': dataset does not exist"));
        assert!(!is_missing_dataset("permission denied"));
    }
}
