//! Table rendering and heuristic detection.

use std::sync::LazyLock;

use regex::Regex;

use coursebuilder_shared::{ContentTable, ExtractedTable};

/// Minimum consecutive aligned lines before a block counts as a table.
const MIN_TABLE_LINES: usize = 3;

/// Render an extracted table as a Markdown pipe table.
///
/// Tables without headers promote their first row. Ragged rows are padded.
pub fn to_markdown(table: &ExtractedTable) -> String {
    let (headers, rows): (&[String], &[Vec<String>]) = if table.headers.is_empty() {
        match table.rows.split_first() {
            Some((first, rest)) => (first.as_slice(), rest),
            None => return String::new(),
        }
    } else {
        (table.headers.as_slice(), table.rows.as_slice())
    };

    let width = rows.iter().map(Vec::len).chain([headers.len()]).max().unwrap_or(0);
    if width == 0 {
        return String::new();
    }

    let mut out = String::new();
    out.push_str(&markdown_row(headers, width));
    out.push_str(&markdown_row(&vec!["---".to_string(); width], width));
    for row in rows {
        out.push_str(&markdown_row(row, width));
    }
    out
}

fn markdown_row(cells: &[String], width: usize) -> String {
    let padded: Vec<&str> = (0..width)
        .map(|i| cells.get(i).map(|c| c.trim()).unwrap_or(""))
        .collect();
    format!("| {} |\n", padded.join(" | "))
}

/// Render a generated table as plain pipe-delimited text.
pub fn to_pipe_text(table: &ContentTable) -> String {
    let mut lines = Vec::with_capacity(table.rows.len() + 2);
    if !table.title.is_empty() {
        lines.push(table.title.clone());
    }
    if !table.headers.is_empty() {
        lines.push(table.headers.join(" | "));
    }
    for row in &table.rows {
        lines.push(row.join(" | "));
    }
    lines.join("\n")
}

/// Find column-aligned blocks in extracted page text.
///
/// A line is tabular when tabs or runs of two or more spaces split it into at
/// least two cells. Three or more consecutive tabular lines with the same
/// cell count become a table whose first line is the header. This is a
/// heuristic: false positives and misses are expected.
pub fn detect_tables(page_text: &str, page: u32) -> Vec<ExtractedTable> {
    static COLUMN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\t+| {2,}").expect("valid regex"));

    let mut tables = Vec::new();
    let mut block: Vec<Vec<String>> = Vec::new();

    let flush = |block: &mut Vec<Vec<String>>, tables: &mut Vec<ExtractedTable>| {
        if block.len() >= MIN_TABLE_LINES {
            let mut rows = std::mem::take(block);
            let headers = rows.remove(0);
            tables.push(ExtractedTable {
                page,
                headers,
                rows,
            });
        }
        block.clear();
    };

    for line in page_text.lines() {
        let cells: Vec<String> = COLUMN_RE
            .split(line.trim())
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect();

        if cells.len() < 2 {
            flush(&mut block, &mut tables);
            continue;
        }
        if block.first().is_some_and(|first| first.len() != cells.len()) {
            flush(&mut block, &mut tables);
        }
        block.push(cells);
    }
    flush(&mut block, &mut tables);

    tables
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_markdown_with_headers() {
        let table = ExtractedTable {
            page: 3,
            headers: vec!["Tip".into(), "Boyut".into()],
            rows: vec![vec!["int".into(), "4".into()], vec!["long".into()]],
        };
        assert_eq!(
            to_markdown(&table),
            "| Tip | Boyut |\n| --- | --- |\n| int | 4 |\n| long |  |\n"
        );
    }

    #[test]
    fn promotes_first_row_when_headers_missing() {
        let table = ExtractedTable {
            page: 1,
            headers: vec![],
            rows: vec![vec!["a".into(), "b".into()], vec!["1".into(), "2".into()]],
        };
        assert!(to_markdown(&table).starts_with("| a | b |\n| --- | --- |"));
    }

    #[test]
    fn empty_table_renders_nothing() {
        assert_eq!(to_markdown(&ExtractedTable::default()), "");
    }

    #[test]
    fn pipe_text_includes_title() {
        let table = ContentTable {
            title: "Karşılaştırma".into(),
            headers: vec!["A".into(), "B".into()],
            rows: vec![vec!["x".into(), "y".into()]],
        };
        assert_eq!(to_pipe_text(&table), "Karşılaştırma\nA | B\nx | y");
    }

    #[test]
    fn detects_aligned_block() {
        let text = "Veri tipleri aşağıdadır.\nTip    Boyut   Aralık\nint    4       32 bit\nlong   8       64 bit\n\nSonraki paragraf.";
        let tables = detect_tables(text, 7);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].page, 7);
        assert_eq!(tables[0].headers, vec!["Tip", "Boyut", "Aralık"]);
        assert_eq!(tables[0].rows.len(), 2);
    }

    #[test]
    fn ignores_short_aligned_runs() {
        let text = "a  b\nc  d\nnormal text";
        assert!(detect_tables(text, 1).is_empty());
    }
}
