use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "satsuma", version, about = "Catalog download queue daemon")]
pub struct Cli {
    #[arg(long, value_name = "DIR", default_value = "satsuma-state")]
    pub state_dir: PathBuf,

    #[arg(long, value_name = "DIR", default_value = "downloads")]
    pub download_dir: PathBuf,

    #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:6810")]
    pub listen: SocketAddr,

    #[arg(long, value_name = "URL", help = "Base URL of the catalog API")]
    pub catalog_url: String,

    #[arg(long, default_value_t = 3, help = "Maximum simultaneous file transfers")]
    pub concurrency: usize,

    #[arg(
        short,
        long,
        default_value = "info",
        help = "Log level (debug, info, warn, error)"
    )]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::try_parse_from(["satsuma", "--catalog-url", "https://catalog.example"])
            .expect("parse");
        assert_eq!(cli.state_dir, PathBuf::from("satsuma-state"));
        assert_eq!(cli.download_dir, PathBuf::from("downloads"));
        assert_eq!(cli.concurrency, 3);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn cli_requires_catalog_url() {
        assert!(Cli::try_parse_from(["satsuma"]).is_err());
    }

    #[test]
    fn cli_parses_overrides() {
        let cli = Cli::try_parse_from([
            "satsuma",
            "--catalog-url",
            "https://catalog.example",
            "--state-dir",
            "/var/lib/satsuma",
            "--listen",
            "0.0.0.0:9000",
            "--concurrency",
            "5",
            "-l",
            "debug",
        ])
        .expect("parse");
        assert_eq!(cli.state_dir, PathBuf::from("/var/lib/satsuma"));
        assert_eq!(cli.listen, "0.0.0.0:9000".parse().expect("addr"));
        assert_eq!(cli.concurrency, 5);
        assert_eq!(cli.log_level, "debug");
    }
}
