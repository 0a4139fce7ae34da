use anyhow::Result;
use comfy_table::{Cell, Table};

pub fn print_table(table: Table) -> Result<()> {
    println!("{table}");
    Ok(())
}

/// Table with a header row.
pub fn with_header(columns: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_header(columns.iter().map(|c| Cell::new(*c)).collect::<Vec<_>>());
    table
}
