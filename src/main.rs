mod config;
mod lock;
mod probe;
mod restart;
mod retry;
mod runner;
mod state_store;
mod status;
mod throttle;

#[cfg(test)]
mod testing;

use clap::Parser;
use config::WatchdogConfig;
use std::path::PathBuf;

/// A cron-friendly watchdog: probe a local HTTP endpoint, restart the service
/// behind it when unhealthy, and back off between attempts.
#[derive(Parser, Debug)]
#[command(name = "service-watchdog", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "watchdog.toml")]
    config: PathBuf,

    /// URL to probe (overrides config)
    #[arg(long)]
    url: Option<String>,

    /// Service to restart (overrides config)
    #[arg(long)]
    service: Option<String>,

    /// Max attempts per run (overrides config)
    #[arg(long)]
    retries: Option<u32>,

    /// Probe timeout in seconds (overrides config)
    #[arg(long)]
    timeout: Option<u64>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Print the last recorded status and exit
    #[arg(long)]
    status: bool,

    /// Extra logging (probe details, state transitions)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded config.
    fn apply_overrides(&self, config: &mut WatchdogConfig) {
        if let Some(url) = &self.url {
            config.target.url = url.clone();
        }
        if let Some(service) = &self.service {
            config.service.name = service.clone();
        }
        if let Some(retries) = self.retries {
            config.retry.max_retries = retries;
        }
        if let Some(timeout) = self.timeout {
            config.target.timeout_secs = timeout;
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("warn,service_watchdog={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_settings(config: &WatchdogConfig) {
    println!("service-watchdog v{}", env!("CARGO_PKG_VERSION"));
    println!("Target:        {}", config.target.url);
    println!("Timeout:       {}s", config.target.timeout_secs);
    println!("Success code:  {}", config.target.success_status);
    println!("Service:       {}", config.service.name);
    println!("Restart:       {}", config.service.restart_command.join(" "));
    println!(
        "Retries:       {} (wait {}s, +{}s per attempt)",
        config.retry.max_retries, config.retry.base_wait_secs, config.retry.wait_increment_secs
    );
    println!(
        "Throttle:      1 in {} after failure",
        config.throttle.run_every_n_after_failure
    );
    println!("Status file:   {}", config.files.status.display());
    println!("Throttle file: {}", config.files.throttle.display());
    println!("Lock file:     {}", config.files.lock.display());
    println!("On lock error: {:?}", config.lock.on_error);
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match WatchdogConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };
    cli.apply_overrides(&mut config);
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid config");
        std::process::exit(1);
    }

    if cli.dry_run {
        print_settings(&config);
        println!("Dry run: config validated, not running.");
        return;
    }

    if cli.status {
        let report = status::StatusFile::new(config.files.status.clone()).load();
        let throttle_state = throttle::ThrottleFile::new(config.files.throttle.clone()).load();
        print!("{}", status::render_summary(report.as_ref(), &throttle_state));
        return;
    }

    let prober = match probe::HttpProber::new() {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "failed to build HTTP client");
            runner::record_fault(&config, &format!("failed to build HTTP client: {e}"));
            std::process::exit(1);
        }
    };
    let restarter = restart::CommandRestarter::new(config.service.restart_command.clone());

    let code = runner::run_to_exit_code(config, prober, restarter, retry::TokioSleeper).await;
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_config_values() {
        let cli = Cli::parse_from([
            "service-watchdog",
            "--url",
            "http://127.0.0.1:9000/health",
            "--service",
            "webcam",
            "--retries",
            "2",
            "--timeout",
            "10",
        ]);
        let mut config = WatchdogConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.target.url, "http://127.0.0.1:9000/health");
        assert_eq!(config.service.name, "webcam");
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.target.timeout_secs, 10);
    }

    #[test]
    fn no_overrides_keep_config() {
        let cli = Cli::parse_from(["service-watchdog"]);
        let mut config = WatchdogConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.target.url, "http://localhost:8080/snapshot");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(cli.config, PathBuf::from("watchdog.toml"));
    }

    #[test]
    fn zero_retries_override_fails_validation() {
        let cli = Cli::parse_from(["service-watchdog", "--retries", "0"]);
        let mut config = WatchdogConfig::default();
        cli.apply_overrides(&mut config);
        assert!(config.validate().is_err());
    }
}
