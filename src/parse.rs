use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vigil::filter::TimeWindow;
use vigil::i18n::Locale;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Live map of community-reported ICE sightings")]
#[command(version)]
pub(crate) struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Display language; remembered for later runs
    #[arg(short, long, global = true, value_enum)]
    pub locale: Option<Locale>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Follow the live map in the terminal
    Watch {
        /// Time window: all, 30m, 1h or 2h
        #[arg(short, long, value_enum)]
        window: Option<TimeWindow>,

        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,

        #[arg(long, allow_hyphen_values = true)]
        lng: Option<f64>,

        #[arg(short, long)]
        zoom: Option<f64>,

        /// Canvas size in pixels, e.g. 1280x800
        #[arg(long, value_parser = parse_size)]
        size: Option<(f64, f64)>,

        /// Open the popup of this sighting once drawn
        #[arg(long)]
        popup: Option<String>,

        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Report a sighting at the given position
    Report {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// What was seen (at most 280 characters)
        #[arg(short, long, default_value = "")]
        description: String,

        /// Photo to attach
        #[arg(short, long)]
        photo: Option<PathBuf>,
    },

    /// Write the currently relevant sightings to CSV
    Export {
        /// Output CSV filename
        #[arg(short, long, default_value = "sightings.csv")]
        output: String,

        #[arg(short, long, value_enum, default_value_t = TimeWindow::All)]
        window: TimeWindow,
    },

    /// Broadcast an alert through the configured push relays
    Notify {
        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        body: Option<String>,
    },

    /// Register a browser push subscription (JSON file) with every relay
    Subscribe { file: PathBuf },
}

fn parse_size(s: &str) -> Result<(f64, f64), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s}"))?;
    let w: f64 = w.trim().parse().map_err(|_| format!("bad width in {s}"))?;
    let h: f64 = h.trim().parse().map_err(|_| format!("bad height in {s}"))?;
    if w <= 0.0 || h <= 0.0 {
        return Err(format!("size must be positive, got {s}"));
    }
    Ok((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1280x800"), Ok((1280.0, 800.0)));
        assert!(parse_size("1280").is_err());
        assert!(parse_size("0x10").is_err());
    }

    #[test]
    fn test_watch_args() {
        let args = Args::try_parse_from([
            "vigil", "watch", "--window", "1h", "--lat", "41.88", "--lng", "-87.63", "-l", "es",
        ])
        .unwrap();
        assert_eq!(args.locale, Some(Locale::Es));
        match args.command {
            Command::Watch { window, lng, .. } => {
                assert_eq!(window, Some(TimeWindow::OneHour));
                assert_eq!(lng, Some(-87.63));
            }
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn test_export_defaults() {
        let args = Args::try_parse_from(["vigil", "export"]).unwrap();
        match args.command {
            Command::Export { output, window } => {
                assert_eq!(output, "sightings.csv");
                assert_eq!(window, TimeWindow::All);
            }
            _ => panic!("expected export"),
        }
    }
}
