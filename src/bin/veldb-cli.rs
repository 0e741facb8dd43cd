//! veldb interactive shell
//!
//! Opens (or creates) a database directory and runs SQL read from the
//! terminal or from `-e`. Exit codes: 0 success, 1 parse error,
//! 2 validation error, 3 runtime error, 4 I/O error.

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use veldb::{Database, DbConfig, DbError, QueryResult, Value};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_DATA_DIR: &str = "./veldb_data";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            match e.downcast_ref::<DbError>() {
                Some(db_err) => db_err.exit_code(),
                None => 3,
            }
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<i32> {
    let args: Vec<String> = env::args().skip(1).collect();

    let mut data_dir = PathBuf::from(DEFAULT_DATA_DIR);
    let mut one_shot: Option<String> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--version" | "-v" => {
                println!("veldb v{}", VERSION);
                return Ok(0);
            }
            "--help" | "-h" => {
                print_help();
                return Ok(0);
            }
            "-e" => {
                i += 1;
                let sql = args
                    .get(i)
                    .context("-e requires a SQL statement argument")?;
                one_shot = Some(sql.clone());
            }
            path => data_dir = PathBuf::from(path),
        }
        i += 1;
    }

    let mut db = Database::open(&data_dir, DbConfig::default())
        .with_context(|| format!("failed to open database at {}", data_dir.display()))?;

    if let Some(sql) = one_shot {
        return match db.execute(&sql) {
            Ok(result) => {
                print_result(&result);
                Ok(0)
            }
            Err(e) => {
                eprintln!("error: {}", e);
                Ok(e.exit_code())
            }
        };
    }

    println!("veldb v{} (data dir: {})", VERSION, data_dir.display());
    println!("Type SQL statements terminated by ';', or \\q to quit.");

    let stdin = io::stdin();
    let mut buffer = String::new();
    loop {
        if buffer.is_empty() {
            print!("veldb> ");
        } else {
            print!("   ... ");
        }
        io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let line = line.trim();
        if buffer.is_empty() && (line == "\\q" || line == "exit" || line == "quit") {
            break;
        }
        if line.is_empty() {
            continue;
        }

        buffer.push_str(line);
        buffer.push(' ');
        if !line.ends_with(';') {
            continue;
        }

        let sql = std::mem::take(&mut buffer);
        match db.execute(sql.trim()) {
            Ok(result) => print_result(&result),
            Err(e) => eprintln!("error: {}", e),
        }
    }

    db.close()?;
    Ok(0)
}

fn print_help() {
    println!(
        r#"veldb v{} - embedded relational database with vector search

Usage:
  veldb-cli                 start an interactive shell on {}
  veldb-cli <data_dir>      open the given database directory
  veldb-cli -e "SQL"        execute one statement and exit
  veldb-cli --version       print the version
  veldb-cli --help          this help

Exit codes:
  0 success, 1 parse error, 2 validation error, 3 runtime error, 4 I/O error
"#,
        VERSION, DEFAULT_DATA_DIR
    );
}

fn print_result(result: &QueryResult) {
    match result {
        QueryResult::Select { columns, rows } => {
            println!("{}", columns.join(" | "));
            for row in rows {
                let cells: Vec<String> = row.iter().map(format_value).collect();
                println!("{}", cells.join(" | "));
            }
            println!("({} rows)", rows.len());
        }
        QueryResult::Modification { affected_rows } => {
            println!("OK, {} rows affected", affected_rows);
        }
        QueryResult::Definition { message } | QueryResult::Transaction { message } => {
            println!("{}", message);
        }
        QueryResult::Vacuum(stats) => {
            for s in stats {
                println!(
                    "{}: removed {} versions ({} chains, {} versions, max chain {})",
                    s.table_name,
                    s.versions_removed,
                    s.total_chains,
                    s.total_versions,
                    s.max_chain_length
                );
            }
        }
    }
}

fn format_value(value: &Value) -> String {
    value.to_string()
}
