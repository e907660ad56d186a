//! Hearth server binary.

use clap::Parser;
use server::config::Config;
use server::users::{FixedUserStore, MysqlUserStore, UserStore};
use server::{Reactor, logging, signal};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hearth-server")]
#[command(about = "Event-driven static file and login server")]
struct Args {
    /// Path to configuration file (defaults apply when omitted)
    config: Option<PathBuf>,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("Failed to load config: {}", err);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    let _level = logging::init(&config.logging);

    let result = if config.database.enabled {
        match MysqlUserStore::connect(&config.database) {
            Ok(store) => run(&config, store),
            Err(err) => {
                tracing::error!(%err, "database connection failed");
                eprintln!("Database connection failed: {}", err);
                std::process::exit(1);
            }
        }
    } else {
        // No database: login and register always land on the error page.
        run(&config, FixedUserStore::new(false))
    };

    if let Err(err) = result {
        tracing::error!(%err, "server init failed");
        eprintln!("Server error: {}", err);
        std::process::exit(1);
    }
}

fn run<U: UserStore>(config: &Config, store: U) -> std::io::Result<()> {
    let mut reactor = Reactor::new(config, store)?;
    let stop = signal::reactor_stop_flag();
    reactor.run(&stop);
    Ok(())
}

fn print_default_config() {
    let config = r#"# Hearth Server Configuration

[listener]
# Port to listen on
port = 1316

# Trigger mode: 0 level, 1 edge on connections, 2 edge on the listener,
# 3 edge on both ("level", "edge-conn", "edge-listen", "edge-both" also work)
trigger_mode = 3

# Idle connection timeout in milliseconds (0 disables)
timeout_ms = 60000

# Document root, relative to the working directory
root = "resources"

[workers]
# Number of worker threads
threads = 8

[database]
# Verify /login and /register against MySQL. When disabled, both routes
# land on the error page.
enabled = false
host = "localhost"
port = 3306
user = "root"
password = ""
name = "webserver"
pool_size = 12

[logging]
# Level filter (RUST_LOG takes precedence when set)
level = "info"

# Write to rotating files under `dir` instead of stderr
file = false
dir = "log"
suffix = ".log"

# Async log queue capacity; 0 writes synchronously
queue_capacity = 1024
"#;
    print!("{}", config);
}
