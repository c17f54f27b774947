use clap::ValueEnum;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::io::{self, Write};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Bordered table for a terminal.
    #[default]
    Table,
    /// Comma-separated rows without a header line.
    Csv,
    /// Array of objects keyed by column header.
    Json,
}

/// Rows of text collected for rendering in one of the output formats.
#[derive(Debug, Default)]
pub struct TableWriter {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TableWriter {
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

    pub fn push<I, S>(&mut self, row: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(row.into_iter().map(Into::into).collect());
    }

    pub fn render(&self, format: OutputFormat, out: &mut impl Write) -> io::Result<()> {
        match format {
            OutputFormat::Table => self.render_table(out),
            OutputFormat::Csv => self.render_csv(out),
            OutputFormat::Json => self.render_json(out),
        }
    }

    fn render_table(&self, out: &mut impl Write) -> io::Result<()> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (idx, cell) in row.iter().enumerate().take(widths.len()) {
                widths[idx] = widths[idx].max(cell.chars().count());
            }
        }

        let border = widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+");
        let border = format!("+{border}+");

        writeln!(out, "{border}")?;
        let headers: Vec<String> = self.headers.iter().map(|h| h.to_uppercase()).collect();
        write_row(out, &headers, &widths)?;
        writeln!(out, "{border}")?;
        for row in &self.rows {
            write_row(out, row, &widths)?;
        }
        if !self.rows.is_empty() {
            writeln!(out, "{border}")?;
        }
        Ok(())
    }

    fn render_csv(&self, out: &mut impl Write) -> io::Result<()> {
        for row in &self.rows {
            let line = row
                .iter()
                .map(|field| csv_field(field))
                .collect::<Vec<_>>()
                .join(",");
            writeln!(out, "{line}")?;
        }
        Ok(())
    }

    fn render_json(&self, out: &mut impl Write) -> io::Result<()> {
        let value: Vec<Value> = self
            .rows
            .iter()
            .map(|row| {
                let object: Map<String, Value> = self
                    .headers
                    .iter()
                    .zip(row)
                    .map(|(header, cell)| (header.clone(), Value::String(cell.clone())))
                    .collect();
                Value::Object(object)
            })
            .collect();
        serde_json::to_writer_pretty(&mut *out, &value)?;
        writeln!(out)
    }
}

fn write_row(out: &mut impl Write, cells: &[String], widths: &[usize]) -> io::Result<()> {
    write!(out, "|")?;
    for (idx, width) in widths.iter().enumerate() {
        let cell = cells.get(idx).map(String::as_str).unwrap_or("");
        write!(out, " {cell:<width$} |")?;
    }
    writeln!(out)
}

/// Quotes a field when it holds a separator, a quote or a line break, or
/// starts with whitespace. Embedded quotes are doubled.
fn csv_field(field: &str) -> Cow<'_, str> {
    let needs_quotes = !field.is_empty()
        && (field == r"\."
            || field.contains([',', '"', '\r', '\n'])
            || field.starts_with(char::is_whitespace));
    if needs_quotes {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Writes a secret value, with a trailing newline unless `noline` is set.
pub fn print_secret(out: &mut impl Write, secret: &str, noline: bool) -> io::Result<()> {
    if noline {
        write!(out, "{secret}")
    } else {
        writeln!(out, "{secret}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TableWriter {
        let mut table = TableWriter::new(["Name", "Version"]);
        table.push(["db", "0000000000000000002"]);
        table.push(["api-key", "0000000000000000001"]);
        table
    }

    fn render(table: &TableWriter, format: OutputFormat) -> String {
        let mut buffer = Vec::new();
        table.render(format, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn table_aligns_columns() {
        let expected = "\
+---------+---------------------+
| NAME    | VERSION             |
+---------+---------------------+
| db      | 0000000000000000002 |
| api-key | 0000000000000000001 |
+---------+---------------------+
";
        assert_eq!(render(&sample(), OutputFormat::Table), expected);
    }

    #[test]
    fn json_keys_rows_by_header() {
        let rendered = render(&sample(), OutputFormat::Json);
        let value: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value[0]["Name"], "db");
        assert_eq!(value[1]["Version"], "0000000000000000001");
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn empty_table_renders_header_only() {
        let table = TableWriter::new(["Name"]);
        assert_eq!(
            render(&table, OutputFormat::Table),
            "+------+\n| NAME |\n+------+\n"
        );
        assert_eq!(render(&table, OutputFormat::Json).trim(), "[]");
    }

    #[test]
    fn csv_writes_rows_without_header() {
        assert_eq!(
            render(&sample(), OutputFormat::Csv),
            "db,0000000000000000002\napi-key,0000000000000000001\n"
        );
        assert_eq!(render(&TableWriter::new(["Name"]), OutputFormat::Csv), "");
    }

    #[test]
    fn csv_quotes_like_encoding_csv() {
        let mut table = TableWriter::new(["Name", "Secret"]);
        table.push(["plain", ""]);
        table.push(["comma", "a,b"]);
        table.push(["quote", r#"say "hi""#]);
        table.push(["multi", "line1\nline2"]);
        table.push(["padded", " leading"]);
        table.push(["dot", r"\."]);
        let expected = concat!(
            "plain,\n",
            "comma,\"a,b\"\n",
            "quote,\"say \"\"hi\"\"\"\n",
            "multi,\"line1\nline2\"\n",
            "padded,\" leading\"\n",
            "dot,\"\\.\"\n",
        );
        assert_eq!(render(&table, OutputFormat::Csv), expected);
    }

    #[test]
    fn noline_omits_newline() {
        let mut buffer = Vec::new();
        print_secret(&mut buffer, "s3cr3t", true).unwrap();
        assert_eq!(buffer, b"s3cr3t");
        buffer.clear();
        print_secret(&mut buffer, "s3cr3t", false).unwrap();
        assert_eq!(buffer, b"s3cr3t\n");
    }
}
