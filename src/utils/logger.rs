use colored::{ColoredString, Colorize};
use env_logger::Builder;
use log::Level;
use std::io::Write;

pub fn setup_logging(verbose: bool) {
    use log::LevelFilter;

    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    // try_init: tests and embedding programs may have installed a logger already.
    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn) // Default: only warnings from dependencies
        .filter_module(env!("CARGO_PKG_NAME"), level) // Our crate: use requested level
        .format(|buf, record| {
            let name = env!("CARGO_PKG_NAME");
            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = match record.level() {
                        Level::Warn => "WARN".yellow(),
                        Level::Error => "ERROR".red(),
                        _ => unreachable!(),
                    };
                    let path = record.target().to_string().white();
                    format!("[{} {} {}] {}", name.cyan(), level_str, path, record.args())
                }
                _ => format!("[{}] {}", name.cyan(), record.args()),
            };
            writeln!(buf, "{}", line)
        })
        .try_init();
}

/// Colouring for the run summary and the status listing.
pub struct Colors;

impl Colors {
    pub fn label(s: &str) -> ColoredString {
        s.cyan().bold()
    }

    pub fn good(s: &str) -> ColoredString {
        s.green()
    }

    pub fn bad(s: &str) -> ColoredString {
        s.red().bold()
    }

    pub fn warn(s: &str) -> ColoredString {
        s.yellow()
    }

    /// Status text coloured by state: complete green, in progress yellow, missing red.
    pub fn status(status: crate::IndexStatus) -> ColoredString {
        match status {
            crate::IndexStatus::Complete => Self::good(status.as_str()),
            crate::IndexStatus::Missing => Self::bad(status.as_str()),
            _ => Self::warn(status.as_str()),
        }
    }
}
