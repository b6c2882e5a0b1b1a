use colored::Colorize;
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_env("STEWARD_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = steward::run() {
        eprintln!("{} {e}", "error:".red().bold());
        if let Some(v) = e.violation_type() {
            eprintln!("{} {v}", "violation:".yellow());
        }
        std::process::exit(1);
    }
}
