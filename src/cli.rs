use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "metagrep",
    version,
    about = "Metadata-aware code search and tree visualization",
    after_help = r#"Examples:
  metagrep import --path analysis.json
  metagrep search 'unwrap\(\)' --filter risk_level=high
  metagrep search TODO --filter "topics=security;loc>200" --field risk_level,topics --limit 20
  metagrep tree --filter risk_level=high --prune
  metagrep tree --focus 'src/**' --field risk_level --ai-json
  metagrep fields
"#
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Search file contents and enrich matches with metadata.
    Search {
        /// Regex passed to ripgrep.
        query: String,
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        /// Metadata filter such as "risk_level=high"; repeatable, AND-combined.
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Metadata fields to include in the output.
        #[arg(long = "field", value_delimiter = ',')]
        fields: Vec<String>,
        /// Restrict to analyzed files: true|false|all.
        #[arg(long, default_value = "all")]
        analyzed: String,
        /// Path glob pushed into the metadata query; repeatable, OR-combined.
        #[arg(long = "path-glob")]
        path_globs: Vec<String>,
        /// Maximum number of files in the result (0 = unlimited).
        #[arg(long, default_value_t = 0)]
        limit: usize,
        /// Include files ignored by .gitignore.
        #[arg(long)]
        no_ignore: bool,
    },
    /// Render the repository as a metadata-annotated tree.
    Tree {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        /// Metadata filter such as "risk_level=high"; repeatable, AND-combined.
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Metadata fields to show beneath matched files.
        #[arg(long = "field", value_delimiter = ',')]
        fields: Vec<String>,
        /// Glob restricting which files enter the tree; repeatable.
        #[arg(long = "focus")]
        focus: Vec<String>,
        /// Subdirectory to root the tree at.
        #[arg(long, default_value = "")]
        cwd: String,
        /// Restrict to analyzed files: true|false|all.
        #[arg(long, default_value = "all")]
        analyzed: String,
        /// Path glob pushed into the metadata query; repeatable, OR-combined.
        #[arg(long = "path-glob")]
        path_globs: Vec<String>,
        /// Drop subtrees with no matching files.
        #[arg(long)]
        prune: bool,
        /// Always show the names of unmatched files.
        #[arg(long)]
        no_compact: bool,
        /// Emit the full JSON tree instead of ASCII.
        #[arg(long)]
        json: bool,
        /// Emit the reduced AI-portable JSON tree.
        #[arg(long)]
        ai_json: bool,
        /// Include files ignored by .gitignore.
        #[arg(long)]
        no_ignore: bool,
    },
    /// List metadata fields known to the store.
    Fields {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Import metadata records from a JSON file.
    Import {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        path: PathBuf,
    },
}
