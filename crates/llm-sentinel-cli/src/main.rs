use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use llm_sentinel_core::{
    build_provider, render_report, Analyzer, OutputFormat, ProviderGateway, ProviderSettings,
    RateGate, ScanConfig,
};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "llm-sentinel",
    author,
    version,
    about = "LLM-assisted source code security scanner"
)]
struct Cli {
    /// TOML configuration file; command-line flags take precedence
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a file or directory and report security findings
    Scan {
        /// File or directory to scan
        path: PathBuf,

        /// Report format: human, json, or csv
        #[arg(long, value_name = "FORMAT")]
        format: Option<String>,

        /// Write the report to a file instead of stdout
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Application name shown in the report header
        #[arg(long, value_name = "NAME")]
        app_name: Option<String>,

        /// Concurrent batches in flight
        #[arg(long, value_name = "N")]
        workers: Option<usize>,

        /// Skip files larger than this many bytes
        #[arg(long, value_name = "BYTES")]
        max_file_size: Option<u64>,

        /// Abandon unfinished batches after this many seconds
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,

        /// Skip the validation pass even when a checker is configured
        #[arg(long)]
        no_verify: bool,
    },
    /// Show the resolved provider configuration (keys redacted)
    Providers,
}

/// Optional `[scan]` table of the TOML configuration file.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    scan: ScanSection,
}

#[derive(Debug, Default, Deserialize)]
struct ScanSection {
    app_name: Option<String>,
    max_file_size: Option<u64>,
    extensions: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
    workers: Option<usize>,
    parse_retries: Option<u32>,
    timeout_secs: Option<u64>,
    format: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let file_config = load_file_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Scan {
            path,
            format,
            output,
            app_name,
            workers,
            max_file_size,
            timeout,
            no_verify,
        } => {
            let format: OutputFormat = format
                .or(file_config.scan.format.clone())
                .as_deref()
                .unwrap_or("human")
                .parse()?;
            let config = scan_config(
                &file_config.scan,
                app_name,
                workers,
                max_file_size,
                timeout,
            );
            scan(&path, config, format, output.as_deref(), no_verify).await
        }
        Commands::Providers => providers(),
    }
}

fn load_file_config(path: Option<&Path>) -> Result<FileConfig> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .build()
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    settings
        .try_deserialize()
        .with_context(|| format!("invalid config file {}", path.display()))
}

fn scan_config(
    section: &ScanSection,
    app_name: Option<String>,
    workers: Option<usize>,
    max_file_size: Option<u64>,
    timeout: Option<u64>,
) -> ScanConfig {
    let mut config = ScanConfig::default();
    if let Some(name) = app_name.or_else(|| section.app_name.clone()) {
        config.app_name = name;
    }
    if let Some(size) = max_file_size.or(section.max_file_size) {
        config.max_file_size = size;
    }
    if let Some(extensions) = &section.extensions {
        config.allowed_extensions = extensions.clone();
    }
    if let Some(exclude) = &section.exclude {
        config.exclude_patterns.extend(exclude.iter().cloned());
    }
    if let Some(workers) = workers.or(section.workers) {
        config.max_workers = workers;
    }
    if let Some(retries) = section.parse_retries {
        config.parse_retries = retries;
    }
    if let Some(secs) = timeout.or(section.timeout_secs) {
        config.scan_timeout = Some(Duration::from_secs(secs));
    }
    config
}

async fn scan(
    path: &Path,
    config: ScanConfig,
    format: OutputFormat,
    output: Option<&Path>,
    no_verify: bool,
) -> Result<ExitCode> {
    let maker_settings = ProviderSettings::maker_from_env()?;
    let checker_settings = if no_verify {
        None
    } else {
        ProviderSettings::checker_from_env()?
    };

    let gate = Arc::new(RateGate::new());
    let maker = Arc::new(ProviderGateway::with_shared_gate(
        build_provider(&maker_settings)?,
        maker_settings.gateway_policy(),
        Arc::clone(&gate),
    ));
    let checker = checker_settings
        .map(|settings| -> Result<Arc<ProviderGateway>> {
            // Same credential means same upstream quota, so the checker
            // shares the maker's rate gate; otherwise it paces itself.
            let gate = if settings.api_key == maker_settings.api_key {
                Arc::clone(&gate)
            } else {
                Arc::new(RateGate::new())
            };
            Ok(Arc::new(ProviderGateway::with_shared_gate(
                build_provider(&settings)?,
                settings.gateway_policy(),
                gate,
            )))
        })
        .transpose()?;

    let analyzer = Analyzer::new(maker, checker, config);
    let result = analyzer.run(path).await?;
    let report = render_report(&result, format)?;

    match output {
        Some(file) => {
            tokio::fs::write(file, &report)
                .await
                .with_context(|| format!("failed to write report to {}", file.display()))?;
            eprintln!("report written to {}", file.display());
        }
        None => print!("{report}"),
    }

    if result.has_reportable_findings() {
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn providers() -> Result<ExitCode> {
    let maker = ProviderSettings::maker_from_env()?;
    print_provider("maker", &maker);
    match ProviderSettings::checker_from_env()? {
        Some(checker) => print_provider("checker", &checker),
        None => println!("checker: not configured (findings will not be validated)"),
    }
    Ok(ExitCode::SUCCESS)
}

fn print_provider(role: &str, settings: &ProviderSettings) {
    println!("{role}:");
    println!("  provider: {}", settings.provider);
    println!(
        "  model:    {}",
        settings.model.as_deref().unwrap_or("(provider default)")
    );
    if let Some(endpoint) = &settings.endpoint {
        println!("  endpoint: {endpoint}");
    }
    println!("  api key:  {}", redact(&settings.api_key));
}

fn redact(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        "***".to_string()
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tokio=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
