//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Download a URL into a file or to stdout.
///
/// Without `--output` the body is written to stdout; logs always go to stderr.
#[derive(Parser, Debug)]
#[command(name = "fetcher")]
#[command(author, version, about)]
pub struct Args {
    /// URL to download
    pub url: String,

    /// Write the body to this file instead of stdout
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Connect timeout in seconds (1-3600)
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout: Option<u64>,

    /// Read timeout in seconds (1-3600)
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub read_timeout: Option<u64>,

    /// Print where the URL redirects to (nothing if it does not) and exit
    #[arg(long, conflicts_with = "output")]
    pub relocation: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_url_only_parses() {
        let args = Args::try_parse_from(["fetcher", "https://example.com/a"]).unwrap();
        assert_eq!(args.url, "https://example.com/a");
        assert!(args.output.is_none());
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(!args.relocation);
        assert!(args.connect_timeout.is_none());
    }

    #[test]
    fn test_cli_missing_url_rejected() {
        let err = Args::try_parse_from(["fetcher"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn test_cli_output_short_and_long() {
        let args = Args::try_parse_from(["fetcher", "https://e.com", "-o", "out.bin"]).unwrap();
        assert_eq!(args.output, Some(PathBuf::from("out.bin")));

        let args =
            Args::try_parse_from(["fetcher", "https://e.com", "--output", "x/y.bin"]).unwrap();
        assert_eq!(args.output, Some(PathBuf::from("x/y.bin")));
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["fetcher", "https://e.com", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["fetcher", "https://e.com", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["fetcher", "https://e.com", "--quiet"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_timeouts_in_range() {
        let args = Args::try_parse_from([
            "fetcher",
            "https://e.com",
            "--connect-timeout",
            "5",
            "--read-timeout",
            "3600",
        ])
        .unwrap();
        assert_eq!(args.connect_timeout, Some(5));
        assert_eq!(args.read_timeout, Some(3600));
    }

    #[test]
    fn test_cli_timeout_zero_rejected() {
        let err =
            Args::try_parse_from(["fetcher", "https://e.com", "--connect-timeout", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_relocation_conflicts_with_output() {
        let err = Args::try_parse_from(["fetcher", "https://e.com", "--relocation", "-o", "f"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["fetcher", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["fetcher", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
