use anyhow::Result;
use clap::Parser;
use metagrep::config::Config;
use metagrep::db::{self, CancelFlag, Db};
use metagrep::model::ImportRecord;
use metagrep::render::{RenderOptions, TreeContext};
use metagrep::{cli, filter, render, scan, search, tree};
use serde_json::json;
use std::path::PathBuf;

fn default_db_path(repo: &PathBuf) -> PathBuf {
    repo.join(".metagrep").join("metagrep.sqlite")
}

fn main() -> Result<()> {
    let args = cli::Args::parse();

    match args.command {
        cli::Command::Search {
            query,
            repo,
            db,
            filters,
            fields,
            analyzed,
            path_globs,
            limit,
            no_ignore,
        } => {
            let db_path = db.unwrap_or_else(|| default_db_path(&repo));
            let db = Db::new(&db_path)?;
            let analyzed = db::parse_analyzed(&analyzed)?;
            let options = search::SearchOptions {
                filters: &filters,
                fields: &fields,
                analyzed,
                path_globs: &path_globs,
                limit,
                no_ignore,
            };
            let report = search::run_search(&repo, &db, &query, &options, &CancelFlag::new())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.is_truncated {
                eprintln!("metagrep: results truncated to {limit} files");
            }
            Ok(())
        }
        cli::Command::Tree {
            repo,
            db,
            filters,
            fields,
            focus,
            cwd,
            analyzed,
            path_globs,
            prune,
            no_compact,
            json,
            ai_json,
            no_ignore,
        } => {
            let db_path = db.unwrap_or_else(|| default_db_path(&repo));
            let db = Db::new(&db_path)?;
            let analyzed = db::parse_analyzed(&analyzed)?;
            let schema = db.field_schema()?;
            let conditions = filter::parse_filters(&filters, &schema)?;

            let files = scan::list_files(&repo, scan::ScanOptions::new(no_ignore))?;
            let mut built = tree::build_tree(&files, &cwd, &focus)?;

            let mut projected = fields.clone();
            for field in filter::referenced_fields(&conditions) {
                if !projected.contains(&field) {
                    projected.push(field);
                }
            }
            let (metadata, _available) = db.fetch_metadata(
                &built.paths,
                analyzed,
                &path_globs,
                &projected,
                &CancelFlag::new(),
            )?;

            tree::enrich_tree(&mut built.root, &cwd, &metadata, &schema, &conditions);
            tree::calculate_visibility(&mut built.root);
            let stats = tree::TreeStats::collect(&built.root);
            if prune {
                tree::prune_tree(&mut built.root);
            }

            let context = TreeContext {
                cwd: if cwd.is_empty() { ".".to_string() } else { cwd },
                database: db_path.display().to_string(),
                fields: fields.clone(),
                filters,
                focus,
                pruned: prune,
            };
            if json {
                println!("{}", render::render_json(&built.root, &stats, &context)?);
            } else if ai_json {
                println!("{}", render::render_ai_json(&built.root, &stats, &context)?);
            } else {
                let options = RenderOptions {
                    compact: !no_compact,
                    fields: &fields,
                    value_max_len: Config::get().value_max_len,
                };
                print!("{}", render::render_ascii(&built.root, &stats, &options)?);
            }
            Ok(())
        }
        cli::Command::Fields { repo, db } => {
            let db_path = db.unwrap_or_else(|| default_db_path(&repo));
            let db = Db::new(&db_path)?;
            println!("{}", serde_json::to_string_pretty(&db.list_fields()?)?);
            Ok(())
        }
        cli::Command::Import { repo, db, path } => {
            let db_path = db.unwrap_or_else(|| default_db_path(&repo));
            let abs = if path.is_absolute() {
                path
            } else {
                repo.join(path)
            };
            let content = std::fs::read_to_string(&abs)?;
            let records: Vec<ImportRecord> = serde_json::from_str(&content)?;
            let db = Db::new(&db_path)?;
            let imported = db.import_records(&records)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "imported": imported }))?
            );
            Ok(())
        }
    }
}
