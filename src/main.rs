mod cli;

use tablekit::config::{self, Config};
use tablekit::lessons::{classic, declarative, relations, table, LessonOptions};
use tablekit_db::Engine;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use serde::Serialize;
use std::fmt::Display;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "tablekit=trace,tablekit_db=trace,tablekit_common=debug".to_string()
        } else {
            "tablekit=info,tablekit_db=info".to_string()
        }
    });

    // Logs go to stderr so stdout stays clean for --json
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let json = cli.json;
    match &cli.command {
        Commands::Table => emit(&table::run(&lesson(&cli, table::DATABASE_FILE)?)?, json),
        Commands::Classic => emit(&classic::run(&lesson(&cli, classic::DATABASE_FILE)?)?, json),
        Commands::Declarative => emit(
            &declarative::run(&lesson(&cli, declarative::DATABASE_FILE)?)?,
            json,
        ),
        Commands::Init => {
            let created = relations::init(&blog(&cli)?)?;
            if created.is_empty() && !json {
                println!("All tables already exist");
            }
            emit_all(&created, "Created table", json)
        }
        Commands::CreateUsers => {
            emit_all(&relations::create_users(&blog(&cli)?)?, "Created", json)
        }
        Commands::AddProfiles => emit(&relations::add_profiles(&blog(&cli)?)?, json),
        Commands::CreatePosts => emit(&relations::create_posts(&blog(&cli)?)?, json),
        Commands::ShowUsers => emit(&relations::show_users(&blog(&cli)?)?, json),
        Commands::FilterProfiles => emit(&relations::filter_profiles(&blog(&cli)?)?, json),
        Commands::FilterPosts => {
            if !json {
                println!("users with flask or django posts:");
            }
            emit_all(&relations::filter_posts(&blog(&cli)?)?, "", json)
        }
        Commands::Tour => emit(&relations::tour(&blog(&cli)?)?, json),
        Commands::Validate { config: path } => {
            let path = path.as_deref().or(cli.config.as_deref());
            validate_config(path)
        }
        Commands::Version => {
            println!("tablekit {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Load the config file and apply command-line overrides.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = config::load_config_or_default(cli.config.as_deref())?;
    if let Some(url) = &cli.database {
        config.database.url = Some(url.clone());
    }
    if cli.echo {
        config.database.echo = true;
    }
    config::validate_config(&config)?;
    Ok(config)
}

fn lesson(cli: &Cli, file_name: &str) -> Result<LessonOptions> {
    let config = load_config(cli)?;
    Ok(LessonOptions::from_config(&config, file_name))
}

/// Engine for lesson 4 with the blog models registered.
fn blog(cli: &Cli) -> Result<Engine> {
    relations::open(&lesson(cli, relations::DATABASE_FILE)?)
}

/// Print a report as pretty JSON or as text.
fn emit<T: Serialize + Display>(report: &T, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        let text = report.to_string();
        print!("{}", text);
        if !text.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

/// Print a list as a JSON array or one item per line.
fn emit_all<T: Serialize + Display>(items: &[T], label: &str, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(items)?);
        return Ok(());
    }
    for item in items {
        let text = item.to_string();
        let text = text.trim_end();
        if label.is_empty() {
            println!("{}", text);
        } else {
            println!("{} {}", label, text);
        }
    }
    Ok(())
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!(
        "  Database: {}",
        config.database.url.as_deref().unwrap_or("<per lesson>")
    );
    println!("  Pool size: {}", config.database.pool_size);
    println!("  Echo: {}", config.database.echo);
    println!("  Data dir: {}", config.lessons.data_dir.display());
    for file in [
        table::DATABASE_FILE,
        classic::DATABASE_FILE,
        declarative::DATABASE_FILE,
        relations::DATABASE_FILE,
    ] {
        println!("    {}", config.database_url(file));
    }

    Ok(())
}
