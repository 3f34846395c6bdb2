// SPDX-License-Identifier: GPL-3.0-only

//! Human-readable rendering of clones and managers

use std::fmt::Write;

use zcm_types::{CloneId, ManagedClone, ManagerInfo, bytes_to_pretty};

const CLONE_HEADERS: [&str; 6] = ["ID", "ACTIVE", "MOUNTED", "CREATED", "USED", "ORIGIN"];

fn format_line(cells: &[&str], widths: &[usize]) -> String {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|header| header.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "{}", format_line(headers, &widths));
    for row in rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        let _ = writeln!(out, "{}", format_line(&cells, &widths));
    }
    out
}

/// One row per clone, oldest first.
pub fn clone_table(clones: &[ManagedClone], active: Option<CloneId>) -> String {
    let rows: Vec<Vec<String>> = clones
        .iter()
        .map(|clone| {
            vec![
                clone.id.to_string(),
                if Some(clone.id) == active { "*" } else { "" }.to_string(),
                if clone.mounted { "yes" } else { "no" }.to_string(),
                clone.creation.format("%Y-%m-%d %H:%M:%S").to_string(),
                bytes_to_pretty(&clone.used_bytes, false),
                clone
                    .origin_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    render_table(&CLONE_HEADERS, &rows)
}

pub fn manager_summary(info: &ManagerInfo) -> String {
    let active = info
        .active
        .map(|id| id.to_string())
        .unwrap_or_else(|| "none".to_string());
    format!(
        "{} at {}\n  active: {}\n  clones: {} ({} older, {} newer)\n  next id: {}\n  used: {}\n",
        info.root,
        info.path.display(),
        active,
        info.total,
        info.older,
        info.newer,
        info.next_id,
        bytes_to_pretty(&info.used_bytes, true)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use std::path::PathBuf;

    fn clone(id: u32, origin: Option<u32>, mounted: bool) -> ManagedClone {
        ManagedClone {
            id: CloneId::new(id),
            dataset: format!("tank/app/{}", CloneId::new(id)),
            origin: origin.map(|o| format!("tank/app/{}@{}", CloneId::new(o), CloneId::new(id))),
            origin_id: origin.map(CloneId::new),
            mountpoint: PathBuf::from("/srv/app"),
            mounted,
            creation: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            used_bytes: 2048,
        }
    }

    #[test]
    fn table_aligns_columns_and_marks_active() {
        let table = clone_table(
            &[clone(0, None, true), clone(1, Some(0), false)],
            Some(CloneId::new(1)),
        );
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID        ACTIVE  MOUNTED"));
        assert!(lines[1].starts_with("00000000          yes      2023-11-14 22:13:20"));
        assert!(lines[2].starts_with("00000001  *       no"));
        assert!(lines[2].ends_with("00000000"));
        assert!(lines[1].ends_with("-"));
        assert!(lines[1].contains("2.00 KB"));
    }

    #[test]
    fn summary_mentions_active_and_counts() {
        let info = ManagerInfo {
            root: "tank/app".to_string(),
            path: PathBuf::from("/srv/app"),
            active: None,
            next_id: CloneId::new(3),
            total: 2,
            older: 0,
            newer: 0,
            used_bytes: 0,
        };
        let summary = manager_summary(&info);
        assert!(summary.starts_with("tank/app at /srv/app\n"));
        assert!(summary.contains("active: none"));
        assert!(summary.contains("next id: 00000003"));
    }
}
