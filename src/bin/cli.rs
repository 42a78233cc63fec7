use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use scanforge::config::Config;
use scanforge::error::ScanError;
use scanforge::exploits::{ExploitRegistry, Severity};
use scanforge::output::OutputFormat;
use scanforge::{LocalScan, CONFIG_FILE};

#[derive(Parser)]
#[command(
    name = "scanforge",
    about = "Security scanning service: live exploit probes and static code audits",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Config file path
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Bind address, overriding the config file
        #[arg(long, short = 'b', env = "SCANFORGE_BIND")]
        bind: Option<String>,
    },

    /// Statically scan a file or directory
    Scan {
        /// File or directory to scan
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Exploit to run (repeatable; default: every static exploit)
        #[arg(long = "exploit", short = 'e')]
        exploits: Vec<String>,

        /// Config file path
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Output format (console, json, html)
        #[arg(long, short = 'f', default_value = "console")]
        format: String,

        /// Minimum severity to fail (info, low, medium, high, critical)
        #[arg(long)]
        fail_on: Option<String>,

        /// Write output to file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// List all registered exploits
    ListExploits {
        /// Output format (table, json)
        #[arg(long, short = 'f', default_value = "table")]
        format: String,
    },

    /// Generate a starter .scanforge.toml config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { config, bind } => cmd_serve(config, bind).await,
        Commands::Scan {
            path,
            exploits,
            config,
            format,
            fail_on,
            output,
        } => cmd_scan(path, exploits, config, format, fail_on, output).await,
        Commands::ListExploits { format } => cmd_list_exploits(format),
        Commands::Init { force } => cmd_init(force),
    };

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config, ScanError> {
    Config::load(&path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE)))
}

async fn cmd_serve(config: Option<PathBuf>, bind: Option<String>) -> Result<i32, ScanError> {
    let mut config = load_config(config)?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    scanforge::server::serve(config).await?;
    Ok(0)
}

async fn cmd_scan(
    path: PathBuf,
    exploits: Vec<String>,
    config: Option<PathBuf>,
    format_str: String,
    fail_on_str: Option<String>,
    output_path: Option<PathBuf>,
) -> Result<i32, ScanError> {
    let format = OutputFormat::from_str_lenient(&format_str).unwrap_or_else(|| {
        eprintln!("Warning: unknown format '{}', using console", format_str);
        OutputFormat::Console
    });

    let fail_on = fail_on_str.and_then(|s| {
        let sev = Severity::from_str_lenient(&s);
        if sev.is_none() {
            eprintln!("Warning: unknown severity '{}', using config default", s);
        }
        sev
    });

    let options = LocalScan {
        config_path: config,
        exploits,
        fail_on_override: fail_on,
    };

    let report = scanforge::scan(&path, &options).await?;
    let rendered = scanforge::render_report(&report, format)?;

    match output_path {
        Some(out) => std::fs::write(&out, &rendered)?,
        None => print!("{}", rendered),
    }

    // Exit code: 0 = pass, 1 = findings at or above threshold
    Ok(if report.pass { 0 } else { 1 })
}

fn cmd_list_exploits(format_str: String) -> Result<i32, ScanError> {
    let config = load_config(None)?;
    let registry = ExploitRegistry::builtin(&config);
    let exploits = registry.list();

    match format_str.as_str() {
        "json" => {
            let json = serde_json::to_string_pretty(&exploits)?;
            println!("{}", json);
        }
        _ => {
            println!(
                "{:<20} {:<28} {:<10} {:<14} CATEGORY",
                "NAME", "DISPLAY NAME", "SEVERITY", "MODES"
            );
            println!("{}", "-".repeat(90));
            for exploit in &exploits {
                let modes: Vec<String> = exploit.modes.iter().map(|m| m.to_string()).collect();
                println!(
                    "{:<20} {:<28} {:<10} {:<14} {}",
                    exploit.name,
                    exploit.display_name,
                    exploit.severity.to_string(),
                    modes.join(","),
                    exploit.category,
                );
            }
        }
    }

    Ok(0)
}

fn cmd_init(force: bool) -> Result<i32, ScanError> {
    let path = PathBuf::from(CONFIG_FILE);

    if path.exists() && !force {
        eprintln!("{CONFIG_FILE} already exists. Use --force to overwrite.");
        return Ok(1);
    }

    std::fs::write(&path, Config::starter_toml())?;
    println!("Created {CONFIG_FILE}");

    Ok(0)
}
