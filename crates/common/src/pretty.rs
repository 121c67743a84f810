use crate::RecordBatch;
use tabled::{builder::Builder, settings, Table};
use types::Value;

/// Predefined output styles that map to `tabled` styles.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TableStyleKind {
    #[default]
    Modern,
    Ascii,
    Plain,
}

impl TableStyleKind {
    fn apply(self, table: &mut Table) {
        match self {
            Self::Modern => table.with(settings::Style::modern()),
            Self::Ascii => table.with(settings::Style::ascii()),
            Self::Plain => table.with(settings::Style::empty()),
        };
    }
}

/// Render a `RecordBatch` into a human-friendly table string.
pub fn render_record_batch(batch: &RecordBatch, style: TableStyleKind) -> String {
    if batch.columns.is_empty() {
        return "<empty>".into();
    }

    let mut builder = Builder::default();
    builder.push_record(batch.columns.iter().cloned());

    for row in &batch.rows {
        builder.push_record(row.values.iter().map(format_value));
    }

    let mut table = builder.build();
    style.apply(&mut table);
    table.to_string()
}

/// Format a single value for display.
///
/// String fields are fixed-length character data, so they render bare,
/// without quoting.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Int(v) => v.to_string(),
        Value::Str(s) => s.clone(),
    }
}
