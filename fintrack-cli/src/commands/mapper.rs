//! Mapper command - guess, save and list CSV column mappings

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;

use super::get_context;
use crate::output;
use fintrack_core::domain::{AmountColumns, MappingSchema};
use fintrack_core::services::{guess_mapping, read_table, MappingPreview};
use fintrack_core::Error;

#[derive(Subcommand)]
pub enum MapperCommands {
    /// Guess a mapping from a CSV file's headers
    Guess {
        /// Path to CSV file
        file: PathBuf,
        /// Also normalize the first rows with the guessed mapping
        #[arg(long)]
        preview: bool,
        /// Number of rows to preview
        #[arg(long, default_value = "10", requires = "preview")]
        preview_rows: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Save a new mapping version for an account
    Save {
        /// Institution ID
        #[arg(long)]
        institution: i64,
        /// Account ID (omit for an institution-wide mapping)
        #[arg(long)]
        account: Option<i64>,
        /// Read the mapping from a JSON file instead of column flags
        #[arg(long, conflicts_with_all = ["date_col", "desc_col", "amount_col", "debit_col", "credit_col"])]
        schema_file: Option<PathBuf>,
        #[command(flatten)]
        columns: ColumnArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List saved mapping versions of an account
    List {
        /// Account ID
        #[arg(long)]
        account: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
pub struct ColumnArgs {
    /// Column holding the transaction date
    #[arg(long)]
    date_col: Option<String>,
    /// Date pattern such as %m/%d/%Y (omit to detect common formats)
    #[arg(long)]
    date_fmt: Option<String>,
    /// Column holding the description
    #[arg(long)]
    desc_col: Option<String>,
    /// Single signed amount column
    #[arg(long, conflicts_with_all = ["debit_col", "credit_col"])]
    amount_col: Option<String>,
    /// Credit/debit indicator column (with --amount-col)
    #[arg(long, requires = "amount_col")]
    indicator_col: Option<String>,
    /// Debit column (amount = credit - debit)
    #[arg(long)]
    debit_col: Option<String>,
    /// Credit column (amount = credit - debit)
    #[arg(long)]
    credit_col: Option<String>,
    /// Running balance column
    #[arg(long)]
    balance_col: Option<String>,
    /// Mark pending rows as excluded (stored only)
    #[arg(long)]
    exclude_pending: bool,
}

impl ColumnArgs {
    fn into_schema(self) -> MappingSchema {
        let amount = match self.amount_col {
            Some(amount_col) => AmountColumns::Net {
                amount_col,
                indicator_col: self.indicator_col,
            },
            None => AmountColumns::Split {
                debit_col: self.debit_col,
                credit_col: self.credit_col,
            },
        };
        MappingSchema {
            date_col: self.date_col,
            date_fmt: self.date_fmt,
            desc_col: self.desc_col,
            amount,
            balance_col: self.balance_col,
            exclude_pending: self.exclude_pending,
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Rows of a schema for display: field, value
fn schema_rows(schema: &MappingSchema) -> Vec<(&'static str, String)> {
    let show = |v: &Option<String>| output::or_dash(v.as_deref());
    let mut rows = vec![
        ("Date column", show(&schema.date_col)),
        ("Date format", schema.date_fmt.clone().unwrap_or_else(|| "(auto)".to_string())),
        ("Description column", show(&schema.desc_col)),
    ];
    match &schema.amount {
        AmountColumns::Net { amount_col, indicator_col } => {
            rows.push(("Amount column", amount_col.clone()));
            rows.push(("Indicator column", show(indicator_col)));
        }
        AmountColumns::Split { debit_col, credit_col } => {
            rows.push(("Debit column", show(debit_col)));
            rows.push(("Credit column", show(credit_col)));
        }
    }
    rows.push(("Balance column", show(&schema.balance_col)));
    rows
}

fn print_schema(schema: &MappingSchema) {
    let mut table = output::create_table();
    table.set_header(vec!["Field", "Column"]);
    for (field, value) in schema_rows(schema) {
        table.add_row(vec![field.to_string(), value]);
    }
    println!("{}", table);
}

fn print_preview(preview: &MappingPreview) {
    let mut table = output::create_table();
    table.set_header(vec!["Date", "Description", "Amount", "Balance"]);
    for row in &preview.rows {
        table.add_row(vec![
            row.txn_date.format("%Y-%m-%d").to_string(),
            row.description_raw.clone(),
            output::format_cents(row.amount_cents),
            output::or_dash(row.running_balance_cents.map(output::format_cents)),
        ]);
    }
    println!("{}", table);
    for err in &preview.errors {
        output::warning(&format!("  line {}: {}", err.line, err.reason));
    }
}

pub fn run(command: MapperCommands) -> Result<()> {
    match command {
        MapperCommands::Guess {
            file,
            preview,
            preview_rows,
            json,
        } => {
            let bytes = read_file(&file)?;
            let table = read_table(&bytes)?;
            let schema = guess_mapping(&table.headers);

            let preview = if preview {
                let ctx = get_context("mapper guess")?;
                Some(ctx.import_service.preview(&bytes, &schema, preview_rows)?)
            } else {
                None
            };

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "headers": table.headers,
                        "schema": schema,
                        "preview": preview,
                    }))?
                );
                return Ok(());
            }

            println!("{} {}", "Headers:".bold(), table.headers.join(", "));
            print_schema(&schema);
            if let Some(preview) = preview {
                println!();
                println!("{}", "Preview".bold());
                print_preview(&preview);
            }
            output::info("Adjust as needed, then save with `ft mapper save`.");
        }
        MapperCommands::Save {
            institution,
            account,
            schema_file,
            columns,
            json,
        } => {
            let schema = match schema_file {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    MappingSchema::from_json(&content)?
                }
                None => columns.into_schema(),
            };

            let ctx = get_context("mapper save")?;
            if ctx.repository.get_institution(institution)?.is_none() {
                return Err(Error::not_found(format!("institution {}", institution)).into());
            }
            if let Some(account_id) = account {
                let acct = ctx
                    .repository
                    .get_account(account_id)?
                    .ok_or_else(|| Error::not_found(format!("account {}", account_id)))?;
                if acct.institution_id != institution {
                    return Err(Error::validation(format!(
                        "account {} belongs to institution {}",
                        account_id, acct.institution_id
                    ))
                    .into());
                }
            }

            let mapper = ctx.mapper_service.create_version(institution, account, &schema)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&mapper)?);
            } else {
                output::success(&format!("Saved mapper {} (version {})", mapper.id, mapper.version));
                print_schema(&mapper.schema);
            }
        }
        MapperCommands::List { account, json } => {
            let ctx = get_context("mapper list")?;
            let mappers = ctx.mapper_service.list_for_account(account)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&mappers)?);
                return Ok(());
            }
            if mappers.is_empty() {
                println!("No mappers saved for account {}.", account);
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["ID", "Version", "Date", "Description", "Amount", "Created"]);
            for mapper in mappers {
                let amount = match &mapper.schema.amount {
                    AmountColumns::Net { amount_col, .. } => amount_col.clone(),
                    AmountColumns::Split { debit_col, credit_col } => format!(
                        "{} / {}",
                        output::or_dash(debit_col.as_deref()),
                        output::or_dash(credit_col.as_deref())
                    ),
                };
                table.add_row(vec![
                    mapper.id.to_string(),
                    mapper.version.to_string(),
                    output::or_dash(mapper.schema.date_col.as_deref()),
                    output::or_dash(mapper.schema.desc_col.as_deref()),
                    amount,
                    mapper.created_at.format("%Y-%m-%d %H:%M").to_string(),
                ]);
            }
            println!("{}", table);
        }
    }

    Ok(())
}
