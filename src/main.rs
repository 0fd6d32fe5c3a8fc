use clap::Parser;
use pageshot::{run, RunConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Build the site, serve it locally, and capture every requested page on
/// every requested device profile, writing PNG segments plus a manifest.
#[derive(Parser, Debug)]
#[command(
    name = "pageshot",
    version,
    about = "Multi-viewport site screenshot pipeline"
)]
struct Cli {
    /// Comma-separated page paths to capture (default: all registered)
    #[arg(long, value_delimiter = ',')]
    pages: Vec<String>,

    /// Comma-separated device keys to capture (default: all registered)
    #[arg(long, value_delimiter = ',')]
    devices: Vec<String>,

    /// Root directory for screenshots and the manifest
    #[arg(long, default_value = "untracked/screenshots")]
    output: PathBuf,

    /// Port the preview server binds
    #[arg(long, default_value_t = 4173)]
    port: u16,

    /// Hard wall-clock limit for the whole run, in seconds
    #[arg(long, default_value_t = 180)]
    timeout: u64,

    /// Command that builds the site
    #[arg(long, default_value = "npm run build")]
    build_command: String,

    /// Command that serves the built site (default: vite preview on --port)
    #[arg(long)]
    serve_command: Option<String>,

    /// Serve the existing build output without rebuilding
    #[arg(long)]
    skip_build: bool,

    /// Launch Chrome without its sandbox (needed in some containers)
    #[arg(long)]
    no_sandbox: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();

    let cli = Cli::parse();
    let config = RunConfig {
        pages: cli.pages,
        devices: cli.devices,
        output_root: cli.output,
        port: cli.port,
        build_command: cli.build_command,
        serve_command: cli.serve_command,
        skip_build: cli.skip_build,
        no_sandbox: cli.no_sandbox,
        global_timeout: Duration::from_secs(cli.timeout),
        ..RunConfig::default()
    };

    match run::execute(&config).await {
        Ok(report) => {
            println!(
                "\nDone in {:.1}s: {} captured, {} failed",
                report.elapsed.as_secs_f64(),
                report.captured,
                report.failed
            );
            println!("Manifest: {}", report.manifest_path.display());
            if report.failed > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            eprintln!("screenshot run failed: {}", err);
            ExitCode::FAILURE
        }
    }
}
