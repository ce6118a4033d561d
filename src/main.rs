use clap::Parser;
use opproxy::app::App;
use opproxy::services::config::Config;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "opproxy", version, about = "OpenProject REST API as MCP tools over stdio")]
struct Cli {
    /// sqlite schema database with an `api_endpoints` table
    #[arg(long, value_name = "PATH")]
    schema_db: Option<PathBuf>,

    /// Load configuration, schema and catalog, print a summary, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("opproxy: {}", err);
            std::process::exit(2);
        }
    };
    if let Some(path) = cli.schema_db {
        config.schema_db = Some(path);
    }
    let app = match App::initialize(config) {
        Ok(app) => app,
        Err(err) => {
            eprintln!("opproxy: {}", err);
            std::process::exit(2);
        }
    };
    if cli.check {
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&app.summary()).unwrap_or_default()
        );
        return;
    }
    if let Err(err) = opproxy::mcp::server::run_stdio(app).await {
        eprintln!("opproxy: {}", err);
        std::process::exit(1);
    }
}
