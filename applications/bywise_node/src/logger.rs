//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

fn should_skip(target: &str) -> bool {
    const SKIP: [&str; 4] = ["hyper::", "h2::", "tower::", "reqwest::"];
    SKIP.iter().any(|s| target.starts_with(s))
}

pub fn init_logger(verbose: bool) -> Result<(), log::SetLoggerError> {
    let colors = ColoredLevelConfig::new()
        .info(Color::Green)
        .debug(Color::Yellow)
        .error(Color::Red);
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    fern::Dispatch::new()
        .format(move |out, message, record| {
            if should_skip(record.target()) {
                return;
            }
            out.finish(format_args!(
                "{} [{}] {} {}",
                humantime::format_rfc3339_seconds(std::time::SystemTime::now()),
                record.target(),
                colors.color(record.level()),
                message
            ))
        })
        .level(level)
        .level_for("redb", LevelFilter::Warn)
        .chain(std::io::stdout())
        .apply()
}
