use notemirror::app::MirrorApp;
use notemirror::config::MirrorConfig;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CliOptions {
    mode: CliMode,
    verbose: bool,
    dry_run: bool,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliOptions>
where
    I: IntoIterator<Item = String>,
{
    let mut options = CliOptions {
        mode: CliMode::Run,
        verbose: false,
        dry_run: false,
    };
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => options.mode = CliMode::Help,
            "--verbose" | "-v" => options.verbose = true,
            "--dry-run" => options.dry_run = true,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(options)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "notemirror=debug" } else { "notemirror=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let options = parse_cli_mode(std::env::args())?;
    if options.mode == CliMode::Help {
        println!("Usage: notemirror [--verbose] [--dry-run]");
        println!("  -v, --verbose   Log every decision");
        println!("      --dry-run   Report what would change without touching disk");
        return Ok(());
    }
    init_tracing(options.verbose);

    let config = MirrorConfig::from_env()?;
    let app = MirrorApp::bootstrap(config, options.dry_run).await?;
    let summary = app.run().await?;
    println!("{summary}");
    Ok(())
}
