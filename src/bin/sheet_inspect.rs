use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use sheetsync::config;
use sheetsync::sheets::{column_index, spreadsheet_id_from_url, CellValue, SheetStore, SheetTarget, SheetsClient};

#[derive(Parser, Debug)]
#[command(about = "Print the header rows of a sheet")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Spreadsheet id or full Google Sheets URL
    #[arg(long)]
    spreadsheet: String,

    /// Sheet (tab) name
    #[arg(long)]
    sheet: String,

    /// Number of rows to print, starting at row 1
    #[arg(long, default_value = "2")]
    rows: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = config::load(Some(&args.config))?;
    let spreadsheet_id = spreadsheet_id_from_url(&args.spreadsheet)
        .ok_or_else(|| anyhow!("not a spreadsheet id or URL: {}", args.spreadsheet))?;
    let max_column = column_index(&cfg.sheets.max_column)
        .ok_or_else(|| anyhow!("invalid sheets.max_column"))?;
    let client = SheetsClient::from_config(&cfg)?;

    let target = SheetTarget::new(spreadsheet_id, args.sheet);
    let range = target.range(0, 1, max_column, args.rows.max(1));
    let rows = client.read_range(&target.spreadsheet_id, &range).await?;
    println!("Sheet: {}", target);
    println!("Range: {}", range);
    for (i, row) in rows.iter().enumerate() {
        let cells: Vec<String> = row.iter().map(CellValue::as_text).collect();
        println!("  {:>3}: {}", i + 1, cells.join(" | "));
    }
    Ok(())
}
