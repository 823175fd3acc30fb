use clap::{Parser, Subcommand};
use keravec::cli::{self, Repl};
use keravec::Database;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keravec")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "KeraVec - chunked vector tables with exact KNN search", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new database
    Create {
        /// Path to the database file
        path: PathBuf,
    },

    /// Open interactive shell
    Shell {
        /// Path to the database file
        path: PathBuf,
    },

    /// Show database statistics
    Stats {
        /// Path to the database file
        path: PathBuf,
    },

    /// Execute a single shell command, e.g. "knn docs v 5 [1, 2, 3]"
    Query {
        /// Path to the database file
        path: PathBuf,

        /// Command to execute
        query: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Create { path } => {
            if path.exists() {
                anyhow::bail!("Database file already exists: {}", path.display());
            }

            Database::create(&path)?;
            println!("Created database: {}", path.display());
        }

        Commands::Shell { path } => {
            let mut repl = Repl::new(&path)?;
            repl.run()?;
        }

        Commands::Stats { path } => {
            let db = Database::open(&path)?;
            let tables = db.list_tables();
            let total_rows: usize = tables.iter().map(|(_, count)| count).sum();

            let file_size = std::fs::metadata(&path)?.len();
            let file_size_mb = file_size as f64 / 1024.0 / 1024.0;

            println!("Database: {}", path.display());
            println!("Size: {:.2} MB", file_size_mb);
            println!("Tables: {}", tables.len());
            println!("Total Rows: {}", total_rows);
            println!();

            for (name, _) in tables {
                let stats = db.stats(&name)?;
                println!(
                    "  {} - {} rows in {} chunks, {} overflow bytes",
                    name,
                    stats.row_count,
                    stats.chunk_count,
                    stats.overflow_live_bytes
                );
            }
        }

        Commands::Query { path, query } => {
            let db = Database::open(&path)?;
            cli::execute(&db, &query, &mut std::io::stdout())?;
        }
    }

    Ok(())
}
