//! Account command - accounts that imports are loaded into

use anyhow::Result;
use clap::Subcommand;

use super::get_context;
use crate::output;
use fintrack_core::domain::NewAccount;
use fintrack_core::Error;

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Add an account under an institution
    Add {
        /// Institution ID
        #[arg(long)]
        institution: i64,
        /// Account name
        name: String,
        /// Account type (checking, savings, credit, ...)
        #[arg(long = "type", default_value = "checking")]
        account_type: String,
        /// ISO currency code
        #[arg(long, default_value = "USD")]
        currency: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List accounts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: AccountCommands) -> Result<()> {
    match command {
        AccountCommands::Add {
            institution,
            name,
            account_type,
            currency,
            json,
        } => {
            let ctx = get_context("account add")?;
            if ctx.repository.get_institution(institution)?.is_none() {
                return Err(Error::not_found(format!("institution {}", institution)).into());
            }

            let new_account = NewAccount::new(institution, name.trim())
                .with_type(account_type)
                .with_currency(&currency);
            new_account.validate().map_err(Error::validation)?;
            let account = ctx.repository.create_account(&new_account)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&account)?);
            } else {
                output::success(&format!("Added account {} ({})", account.name, account.id));
            }
        }
        AccountCommands::List { json } => {
            let ctx = get_context("account list")?;
            let accounts = ctx.repository.list_accounts()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&accounts)?);
                return Ok(());
            }
            if accounts.is_empty() {
                println!("No accounts yet. Add one with `ft account add --institution <id> <name>`.");
                return Ok(());
            }

            let institutions = ctx.repository.list_institutions()?;
            let mut table = output::create_table();
            table.set_header(vec!["ID", "Institution", "Name", "Type", "Currency"]);
            for account in accounts {
                let institution = institutions
                    .iter()
                    .find(|i| i.id == account.institution_id)
                    .map(|i| i.name.clone())
                    .unwrap_or_else(|| account.institution_id.to_string());
                table.add_row(vec![
                    account.id.to_string(),
                    institution,
                    account.name,
                    account.account_type,
                    account.currency,
                ]);
            }
            println!("{}", table);
        }
    }

    Ok(())
}
