use std::path::Path;

use crate::{error::Result, table::ResultTable};

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn line(fields: &[String]) -> String {
    fields.iter().map(|f| escape(f)).collect::<Vec<_>>().join(",")
}

impl ResultTable {
    /// Header plus one line per row; unmeasured cells are empty fields.
    pub fn to_csv_string(&self) -> String {
        let mut out = line(&self.header());
        out.push('\n');
        for record in self.records() {
            out.push_str(&line(&record));
            out.push('\n');
        }
        out
    }

    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_csv_string())?;
        Ok(())
    }
}
