//! Institution command - register the banks files come from

use anyhow::Result;
use clap::Subcommand;

use super::get_context;
use crate::output;

#[derive(Subcommand)]
pub enum InstitutionCommands {
    /// Register an institution
    Add {
        /// Display name, also used for archive folders
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List institutions
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: InstitutionCommands) -> Result<()> {
    match command {
        InstitutionCommands::Add { name, json } => {
            let name = name.trim();
            if name.is_empty() {
                anyhow::bail!("Institution name must not be empty");
            }
            let ctx = get_context("institution add")?;
            let institution = ctx.repository.create_institution(name)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&institution)?);
            } else {
                output::success(&format!("Added institution {} ({})", institution.name, institution.id));
            }
        }
        InstitutionCommands::List { json } => {
            let ctx = get_context("institution list")?;
            let institutions = ctx.repository.list_institutions()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&institutions)?);
                return Ok(());
            }
            if institutions.is_empty() {
                println!("No institutions yet. Add one with `ft institution add <name>`.");
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["ID", "Name", "Active", "Created"]);
            for inst in institutions {
                table.add_row(vec![
                    inst.id.to_string(),
                    inst.name,
                    if inst.is_active { "yes" } else { "no" }.to_string(),
                    inst.created_at.format("%Y-%m-%d").to_string(),
                ]);
            }
            println!("{}", table);
        }
    }

    Ok(())
}
