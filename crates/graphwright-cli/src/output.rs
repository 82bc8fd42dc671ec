//! Output formatting utilities

use clap::ValueEnum;
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Pretty-printed JSON
pub fn format_json<T: Serialize>(data: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(data)?)
}

/// Column-aligned plain text table
#[derive(Debug, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(cells.into_iter().map(Into::into).collect());
    }

    pub fn render(&self) -> String {
        let columns = self
            .rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.headers.len()))
            .max()
            .unwrap_or(0);
        let mut widths = vec![0; columns];
        for line in std::iter::once(&self.headers).chain(&self.rows) {
            for (i, cell) in line.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }

        let format_line = |cells: &[String]| {
            let padded: Vec<String> = (0..columns)
                .map(|i| {
                    let cell = cells.get(i).map(String::as_str).unwrap_or("");
                    format!("{:<width$}", cell, width = widths[i])
                })
                .collect();
            padded.join("  ").trim_end().to_string()
        };

        let mut out = vec![format_line(&self.headers)];
        out.push(format_line(
            &widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>(),
        ));
        out.extend(self.rows.iter().map(|r| format_line(r)));
        out.join("\n")
    }
}

/// Render a JSON value as a table cell
pub fn cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_aligns_columns() {
        let mut table = Table::new(["REPO", "NODES"]);
        table.row(["infra", "120"]);
        table.row(["app-backend", "7"]);
        let rendered = table.render();
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines[0], "REPO         NODES");
        assert_eq!(lines[1], "-----------  -----");
        assert_eq!(lines[2], "infra        120");
        assert_eq!(lines[3], "app-backend  7");
    }

    #[test]
    fn test_cell_rendering() {
        assert_eq!(cell(&serde_json::json!("x")), "x");
        assert_eq!(cell(&serde_json::json!(3)), "3");
        assert_eq!(cell(&serde_json::Value::Null), "");
    }
}
