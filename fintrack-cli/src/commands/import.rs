//! Import command - parse, review, commit and retract CSV imports

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use super::{get_context, parse_index_list};
use crate::output;
use fintrack_core::domain::{CommitDecisions, ImportRecord, Mapper};
use fintrack_core::services::{guess_mapping, read_table};
use fintrack_core::{Error, FintrackContext};

#[derive(Subcommand)]
pub enum ImportCommands {
    /// Parse a CSV file and stage it for review
    Parse {
        /// Path to CSV file
        file: PathBuf,
        /// Account ID to import into
        #[arg(long)]
        account: i64,
        /// Mapper ID (defaults to the account's latest, or a fresh guess)
        #[arg(long)]
        mapper: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the review of a parsed import
    Review {
        /// Import ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Commit a parsed import
    Commit {
        /// Import ID
        id: i64,
        /// Secondary duplicate indices to insert anyway (e.g. 0,2)
        #[arg(long, value_name = "INDICES")]
        accept_duplicate: Option<String>,
        /// Transfer candidate row indices to confirm (e.g. 1,4)
        #[arg(long, value_name = "INDICES")]
        accept_transfer: Option<String>,
        /// Restore soft-deleted matches instead of inserting new rows
        #[arg(long)]
        revive_deleted: bool,
        /// Read decisions as JSON from a file, or `-` for stdin
        #[arg(long, value_name = "FILE")]
        decisions: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Soft-delete every transaction of an import
    Retract {
        /// Import ID
        id: i64,
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recent imports
    History {
        /// Number of imports to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: ImportCommands) -> Result<()> {
    match command {
        ImportCommands::Parse {
            file,
            account,
            mapper,
            json,
        } => parse(&file, account, mapper, json),
        ImportCommands::Review { id, json } => review(id, json),
        ImportCommands::Commit {
            id,
            accept_duplicate,
            accept_transfer,
            revive_deleted,
            decisions,
            json,
        } => {
            let mut decisions = match decisions {
                Some(source) => read_decisions(&source)?,
                None => CommitDecisions::default(),
            };
            if let Some(raw) = accept_duplicate {
                decisions.accepted_secondary_duplicates.extend(parse_index_list(&raw)?);
            }
            if let Some(raw) = accept_transfer {
                decisions.accepted_transfers.extend(parse_index_list(&raw)?);
            }
            decisions.revive_deleted |= revive_deleted;
            commit(id, &decisions, json)
        }
        ImportCommands::Retract { id, force, json } => retract(id, force, json),
        ImportCommands::History { limit, json } => history(limit, json),
    }
}

fn read_decisions(source: &str) -> Result<CommitDecisions> {
    let content = if source == "-" {
        if atty::is(atty::Stream::Stdin) {
            anyhow::bail!("--decisions - expects JSON piped on stdin");
        }
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read decisions from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(source).with_context(|| format!("Failed to read {}", source))?
    };
    serde_json::from_str(&content)
        .map_err(|e| Error::validation(format!("invalid decisions: {}", e)).into())
}

/// The mapper a parse should use: explicit, latest saved, or a new guess
fn resolve_mapper(
    ctx: &FintrackContext,
    bytes: &[u8],
    institution_id: i64,
    account_id: i64,
    requested: Option<i64>,
    quiet: bool,
) -> Result<Mapper> {
    if let Some(id) = requested {
        let mapper = ctx
            .mapper_service
            .get(id)?
            .ok_or_else(|| Error::not_found(format!("mapper {}", id)))?;
        return Ok(mapper);
    }
    if let Some(mapper) = ctx.mapper_service.latest_for(account_id, institution_id)? {
        return Ok(mapper);
    }

    let headers = read_table(bytes)?.headers;
    let schema = guess_mapping(&headers);
    let mapper = ctx
        .mapper_service
        .create_version(institution_id, Some(account_id), &schema)?;
    if !quiet {
        output::info(&format!(
            "No mapper saved for this account; saved a guessed one as mapper {} (version {}).",
            mapper.id, mapper.version
        ));
    }
    Ok(mapper)
}

fn parse(file: &Path, account_id: i64, mapper_id: Option<i64>, json: bool) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.csv".to_string());

    let ctx = get_context("import parse")?;
    let account = ctx
        .repository
        .get_account(account_id)?
        .ok_or_else(|| Error::not_found(format!("account {}", account_id)))?;
    let institution = ctx
        .repository
        .get_institution(account.institution_id)?
        .ok_or_else(|| Error::not_found(format!("institution {}", account.institution_id)))?;
    let mapper = resolve_mapper(&ctx, &bytes, institution.id, account.id, mapper_id, json)?;

    let parsed = ctx
        .import_service
        .stage_import(&bytes, &filename, &institution, &account, &mapper)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "import_id": parsed.record.id,
                "mapper_id": mapper.id,
                "review": parsed.review,
            }))?
        );
        return Ok(());
    }

    let review = &parsed.review;
    output::success(&format!("Parsed {} as import {}", filename, parsed.record.id));
    println!("  Rows:                 {}", review.row_count);
    println!("  New:                  {}", review.to_insert.len());
    println!("  Exact duplicates:     {}", review.dup_exact.len());
    println!("  Possible duplicates:  {}", review.dup_secondary.len());
    println!("  Possible transfers:   {}", review.transfer_candidates.len());
    if !review.parse_errors.is_empty() {
        output::warning(&format!("  Skipped rows:         {}", review.parse_errors.len()));
    }
    println!();
    println!(
        "Review with `ft import review {id}`, then `ft import commit {id}`.",
        id = parsed.record.id
    );
    Ok(())
}

fn load_import(ctx: &FintrackContext, id: i64) -> Result<ImportRecord> {
    Ok(ctx
        .import_service
        .get_import(id)?
        .ok_or_else(|| Error::not_found(format!("import {}", id)))?)
}

fn review(id: i64, json: bool) -> Result<()> {
    let ctx = get_context("import review")?;
    let record = load_import(&ctx, id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let review = &record.log.review;
    println!(
        "{} {} ({}, {})",
        "Import".bold(),
        record.id,
        record.original_filename,
        record.status
    );

    if !review.to_insert.is_empty() {
        println!();
        println!("{}", "New rows".bold());
        let mut table = output::create_table();
        table.set_header(vec!["#", "Date", "Description", "Amount", "Transfer?"]);
        for (i, row) in review.to_insert.iter().enumerate() {
            let transfer = review
                .transfer_candidates
                .iter()
                .find(|c| c.new_index == i)
                .map(|c| format!("matches txn {}", c.existing_id))
                .unwrap_or_default();
            table.add_row(vec![
                i.to_string(),
                row.txn_date.format("%Y-%m-%d").to_string(),
                row.description_raw.clone(),
                output::format_cents(row.amount_cents),
                transfer,
            ]);
        }
        println!("{}", table);
    }

    if !review.dup_secondary.is_empty() {
        println!();
        println!("{}", "Possible duplicates (skipped unless accepted)".bold());
        let mut table = output::create_table();
        table.set_header(vec!["#", "Date", "Description", "Amount", "Existing txn"]);
        for (i, pair) in review.dup_secondary.iter().enumerate() {
            table.add_row(vec![
                i.to_string(),
                pair.new.txn_date.format("%Y-%m-%d").to_string(),
                pair.new.description_raw.clone(),
                output::format_cents(pair.new.amount_cents),
                pair.existing_id.to_string(),
            ]);
        }
        println!("{}", table);
    }

    if !review.dup_exact.is_empty() {
        println!();
        println!("{} exact duplicate(s) will be skipped.", review.dup_exact.len());
    }
    for err in &review.parse_errors {
        output::warning(&format!("line {}: {}", err.line, err.reason));
    }

    if let Some(summary) = &record.log.commit_summary {
        println!();
        println!(
            "Committed: {} inserted, {} revived",
            summary.inserted, summary.revived
        );
    }
    Ok(())
}

fn commit(id: i64, decisions: &CommitDecisions, json: bool) -> Result<()> {
    let ctx = get_context("import commit")?;

    let summary = match ctx.import_service.commit_from_cache(id, &ctx.archiver, decisions) {
        Ok(summary) => summary,
        Err(e) => {
            if let Some(Error::CacheExpired(_)) = e.downcast_ref::<Error>() {
                if let Ok(record) = load_import(&ctx, id) {
                    output::warning(&format!(
                        "Run `ft import parse {} --account {}` again, then commit the new review.",
                        record.original_filename, record.account_id
                    ));
                }
            }
            return Err(e);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        output::success(&format!(
            "Committed import {}: {} inserted, {} revived",
            id, summary.inserted, summary.revived
        ));
        if !summary.accepted_transfers.is_empty() {
            println!("  Transfers confirmed: {}", summary.accepted_transfers.len());
        }
    }
    Ok(())
}

fn retract(id: i64, force: bool, json: bool) -> Result<()> {
    let ctx = get_context("import retract")?;
    let record = load_import(&ctx, id)?;

    if !force && !json {
        use dialoguer::Confirm;
        if !Confirm::new()
            .with_prompt(format!(
                "Retract import {} ({})? Its transactions will be soft-deleted.",
                record.id, record.original_filename
            ))
            .default(false)
            .interact()?
        {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let deleted = ctx.import_service.retract_import(id)?;
    if json {
        println!("{}", serde_json::json!({"import_id": id, "deleted": deleted}));
    } else {
        output::success(&format!("Retracted import {}: {} transaction(s) soft-deleted", id, deleted));
    }
    Ok(())
}

fn history(limit: usize, json: bool) -> Result<()> {
    let ctx = get_context("import history")?;
    let imports = ctx.import_service.list_imports(limit)?;

    if json {
        let rows: Vec<_> = imports
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "account_id": r.account_id,
                    "mapper_id": r.mapper_id,
                    "filename": r.original_filename,
                    "sha256": r.original_sha256,
                    "status": r.status,
                    "row_count": r.row_count,
                    "added_count": r.added_count,
                    "duplicate_count": r.duplicate_count,
                    "error_count": r.error_count,
                    "archived_path": r.archived_path,
                    "created_at": r.created_at,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if imports.is_empty() {
        println!("No imports yet.");
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["ID", "Account", "File", "Status", "Rows", "Added", "Dups", "Errors", "Created"]);
    for r in imports {
        let status = match r.status.as_str() {
            "success" => r.status.to_string().green().to_string(),
            "retracted" => r.status.to_string().dimmed().to_string(),
            _ => r.status.to_string().yellow().to_string(),
        };
        table.add_row(vec![
            r.id.to_string(),
            r.account_id.to_string(),
            r.original_filename,
            status,
            r.row_count.to_string(),
            r.added_count.to_string(),
            r.duplicate_count.to_string(),
            r.error_count.to_string(),
            r.created_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    println!("{}", table);
    Ok(())
}
