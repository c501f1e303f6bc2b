use std::io::Write;
use std::str::FromStr;

use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;

/// Accepts the usual level names case-insensitively, plus `WARNING`.
pub fn parse_level(level: Option<&str>) -> LevelFilter {
    match level.map(str::trim) {
        Some(level) if level.eq_ignore_ascii_case("warning") => LevelFilter::Warn,
        Some(level) => LevelFilter::from_str(level).unwrap_or(LevelFilter::Info),
        None => LevelFilter::Info,
    }
}

pub fn init_logger(level: Option<&str>) {
    let level = parse_level(level);

    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        // the mqtt client is chatty below warn
        .filter_module("rumqttc", level.min(LevelFilter::Warn))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_level_names() {
        assert_eq!(parse_level(None), LevelFilter::Info);
        assert_eq!(parse_level(Some("DEBUG")), LevelFilter::Debug);
        assert_eq!(parse_level(Some("warning")), LevelFilter::Warn);
        assert_eq!(parse_level(Some("error")), LevelFilter::Error);
        assert_eq!(parse_level(Some("loud")), LevelFilter::Info);
    }
}
