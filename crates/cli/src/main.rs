//! dbctx - run SQL through a dbcontext session

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use dbcontext_core::{Dataset, QueryResult, ResultSet, SessionConfig, SessionFactory};
use dbcontext_infra_sqlx::{driver_for_url, PgNoticeLayer};
use serde_json::{Map, Value};
use std::io::Read;
use std::path::PathBuf;
use tabled::builder::Builder;
use tabled::settings::Style;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_DATABASE_URL: &str = "sqlite::memory:";

#[derive(Parser)]
#[command(name = "dbctx")]
#[command(about = "Run SQL inside a managed database session", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database URL (sqlite:..., postgres://...)
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    database_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute SQL in one session (wrapped in a transaction by default)
    Exec {
        /// SQL text; read from --file or stdin when omitted
        sql: Option<String>,

        /// Read SQL from a file
        #[arg(short, long, conflicts_with = "sql")]
        file: Option<PathBuf>,

        /// Named parameter, `name=value` (value parsed as JSON, else a string)
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        /// Connect without BEGIN/COMMIT
        #[arg(long)]
        no_transaction: bool,
    },

    /// Connect, run `SELECT 1`, disconnect
    Ping,
}

fn init_tracing() -> Result<()> {
    let log_format =
        std::env::var("DBCONTEXT_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("dbcontext=info"))
        .context("Failed to create env filter")?;

    // stdout carries results; logs go to stderr. The notice layer has its
    // own filter so server notices reach sessions whatever RUST_LOG says.
    match log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_filter(env_filter),
            )
            .with(PgNoticeLayer::filtered())
            .init(),
        _ => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr)
                    .with_filter(env_filter),
            )
            .with(PgNoticeLayer::filtered())
            .init(),
    }
    Ok(())
}

/// `name=value`; the value is JSON when it parses, a plain string otherwise
fn parse_params(raw: &[String]) -> Result<Value> {
    let mut params = Map::new();
    for pair in raw {
        let (name, value) = pair
            .split_once('=')
            .with_context(|| format!("Invalid parameter `{}` (expected NAME=VALUE)", pair))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
        params.insert(name.trim().to_string(), value);
    }
    Ok(Value::Object(params))
}

fn read_sql(sql: Option<String>, file: Option<PathBuf>) -> Result<String> {
    match (sql, file) {
        (Some(sql), _) => Ok(sql),
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display())),
        (None, None) => {
            let mut sql = String::new();
            std::io::stdin()
                .read_to_string(&mut sql)
                .context("Failed to read SQL from stdin")?;
            Ok(sql)
        }
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Table for a row-returning statement, a count line otherwise
fn render_result_set(rs: &ResultSet) -> Result<String> {
    let Some(rows) = rs.rows()? else {
        let count = rs.row_count()?;
        return Ok(format!("{} row(s) affected", count));
    };
    if rows.is_empty() {
        return Ok("(0 rows)".to_string());
    }

    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        for name in row.keys() {
            if !columns.contains(&name.as_str()) {
                columns.push(name.as_str());
            }
        }
    }

    let mut builder = Builder::default();
    builder.push_record(columns.iter().map(|c| c.to_string()));
    for row in rows {
        builder.push_record(
            columns
                .iter()
                .map(|c| row.get(*c).map(cell).unwrap_or_default()),
        );
    }
    let mut table = builder.build();
    table.with(Style::rounded());

    Ok(format!("{}\n({} rows)", table, rows.len()))
}

fn print_result(result: &QueryResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    match result {
        QueryResult::Single(rs) => println!("{}", render_result_set(rs)?),
        QueryResult::Multiple(results) => {
            for (i, rs) in results.iter().enumerate() {
                println!("{}", format!("Statement {}:", i + 1).cyan().bold());
                println!("{}", render_result_set(rs)?);
                println!();
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let driver = driver_for_url(&cli.database_url)
        .await
        .context("Failed to create database driver")?;
    let factory = SessionFactory::new(driver);
    debug!(version = dbcontext_core::VERSION, "dbctx starting");

    let outcome = match cli.command {
        Commands::Exec {
            sql,
            file,
            params,
            json,
            no_transaction,
        } => {
            let sql = read_sql(sql, file)?;
            let named_params = parse_params(&params)?;
            let config = if no_transaction {
                SessionConfig::auto_connect()
            } else {
                SessionConfig::auto_commit()
            };

            factory
                .execute(config, move |s| {
                    Box::pin(async move {
                        let result = s.query(&sql, &named_params).await?;
                        Ok::<_, anyhow::Error>(result)
                    })
                })
                .await
                .and_then(|result| print_result(&result, json))
        }

        Commands::Ping => factory
            .execute(SessionConfig::auto_connect(), |s| {
                Box::pin(async move {
                    s.query("SELECT 1", &Value::Null).await?;
                    Ok::<_, anyhow::Error>(())
                })
            })
            .await
            .map(|()| println!("{}", "✓ Database reachable".green().bold())),
    };

    factory.shutdown().await?;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_params() {
        let params = parse_params(&[
            "id=1".to_string(),
            "name=alice".to_string(),
            "tags=[\"a\"]".to_string(),
            "note=a=b".to_string(),
        ])
        .unwrap();
        assert_eq!(
            params,
            json!({"id": 1, "name": "alice", "tags": ["a"], "note": "a=b"})
        );
        assert!(parse_params(&["missing".to_string()]).is_err());
    }

    #[test]
    fn test_render_row_count() {
        let out = render_result_set(&ResultSet::from_row_count(3)).unwrap();
        assert_eq!(out, "3 row(s) affected");
    }

    #[test]
    fn test_render_rows() {
        let rows = vec![
            json!({"id": 1, "val": "a"}).as_object().cloned().unwrap(),
            json!({"id": 2, "val": null}).as_object().cloned().unwrap(),
        ];
        let out = render_result_set(&ResultSet::from_rows(rows)).unwrap();
        assert!(out.contains("val"));
        assert!(out.contains("NULL"));
        assert!(out.ends_with("(2 rows)"));
    }

    #[test]
    fn test_render_keeps_column_order() {
        let rows = vec![json!({"val": "a", "id": 1}).as_object().cloned().unwrap()];
        let out = render_result_set(&ResultSet::from_rows(rows)).unwrap();
        let header = out.lines().nth(1).unwrap();
        assert!(header.find("val").unwrap() < header.find("id").unwrap());
    }
}
