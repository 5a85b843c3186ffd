// Copyright Antonio Porsia 2025. Licensed under the EUPL-1.2 or later.

use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

const LOADER_TARGET: &str = "retromem_core::loader";

fn level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Off,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        3 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Installs the global logger.
///
/// `tape_verbosity` applies to the image loader (tape parsing included), `verbosity` to
/// everything else.
pub fn setup_logger(verbosity: u8, tape_verbosity: u8) -> Result<(), fern::InitError> {
    let colors_line = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Cyan)
        .debug(Color::Green)
        .trace(Color::Magenta);

    fern::Dispatch::new()
        .level(level(verbosity))
        .level_for(LOADER_TARGET, level(tape_verbosity))
        .format(move |out, message, record| {
            if cfg!(unix) {
                out.finish(format_args!(
                    "[{level}] [{target}] {message}",
                    target = record.target(),
                    level = colors_line.color(record.level()),
                    message = message
                ));
            } else {
                out.finish(format_args!(
                    "[{level}] [{target}] {message}",
                    target = record.target(),
                    level = record.level(),
                    message = message
                ));
            }
        })
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}
