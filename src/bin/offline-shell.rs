use std::env;

fn print_usage() {
    eprintln!("Usage: offline-shell [OPTIONS] <COMMAND>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  install             Stage the core resources (worker left waiting)");
    eprintln!("  activate            Activate a waiting worker and reconcile the cache");
    eprintln!("  update              Install and activate in one step");
    eprintln!("  fetch <url>         Answer a GET request through the worker, body to stdout");
    eprintln!("  download-offline    Cache every resource not yet stored");
    eprintln!("  status              Show partitions and the stored worker state");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <FILE>     Config file");
    eprintln!("                          (default: ~/.config/offline-shell/config.toml)");
    eprintln!("  -m, --manifest <FILE>   Resource manifest JSON from the build");
    eprintln!("  -o, --origin <URL>      Origin the app is served from");
    eprintln!("  -d, --cache-dir <DIR>   Directory holding the cache partitions");
    eprintln!("  -h, --help              Show this help");
    eprintln!();
    eprintln!("Set RUST_LOG=debug for per-request decisions.");
}

#[tokio::main]
async fn main() -> offline_shell::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    #[cfg(feature = "cli")]
    {
        let args = match offline_shell::cli::parse_args(env::args().skip(1)) {
            Ok(Some(args)) => args,
            Ok(None) => {
                print_usage();
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("Error: {e}");
                eprintln!();
                print_usage();
                std::process::exit(2);
            }
        };
        offline_shell::cli::run(args).await
    }
    #[cfg(not(feature = "cli"))]
    {
        let _ = env::args();
        print_usage();
        eprintln!("CLI support not compiled in");
        std::process::exit(1);
    }
}
