use clap::Parser;

/// Cell locator configuration
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Tower database: JSON object mapping "mcc-mnc-lac-cid" to {"lat", "lon"}.
    #[arg(long, value_name = "FILE")]
    pub cell_database: Option<String>,

    /// Read measurement records (one JSON object per line) from a file instead of stdin.
    #[arg(long, value_name = "FILE")]
    pub input: Option<String>,

    /// Write estimates in CSV format to a local file.
    #[arg(long, value_name = "FILE")]
    pub write_csv: Vec<String>,

    /// Periodically write the location report (statistics, heatmap, cell map) as JSON.
    #[arg(long, value_name = "FILE")]
    pub export_report: Option<String>,

    /// Report export interval in seconds
    #[arg(long, default_value_t = 300)]
    pub export_interval: u64,

    /// Status logging interval in seconds, 0 or less to disable
    #[arg(long, default_value_t = 60, allow_negative_numbers = true)]
    pub status_interval: i64,

    /// Drive the engine clock from record timestamps instead of the wall clock
    #[arg(long, default_value_t = false)]
    pub replay: bool,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["cell-locator"]);
        assert!(config.cell_database.is_none());
        assert!(config.input.is_none());
        assert!(config.write_csv.is_empty());
        assert_eq!(config.export_interval, 300);
        assert_eq!(config.status_interval, 60);
        assert!(!config.replay);
        assert!(!config.verbose);
    }

    #[test]
    fn test_repeatable_csv_and_flags() {
        let config = Config::parse_from([
            "cell-locator",
            "--cell-database",
            "towers.json",
            "--write-csv",
            "a.csv",
            "--write-csv",
            "b.csv",
            "--status-interval",
            "-1",
            "--replay",
            "-v",
        ]);
        assert_eq!(config.cell_database.as_deref(), Some("towers.json"));
        assert_eq!(config.write_csv, vec!["a.csv".to_string(), "b.csv".to_string()]);
        assert_eq!(config.status_interval, -1);
        assert!(config.replay);
        assert!(config.verbose);
    }
}
