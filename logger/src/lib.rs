// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

//! Syslog-style logging for the provisioning client and its tests.

const LOG_LEVEL_ENV_VAR: &str = "PROVISIONING_LOG";

/// Logs at `Info` unless `PROVISIONING_LOG` says otherwise, e.g. `PROVISIONING_LOG=debug` or
/// `PROVISIONING_LOG=provisioning_device_client=trace`.
pub fn try_init() -> Result<(), log::SetLoggerError> {
    builder().try_init()
}

/// Like [`try_init`], but routes output through the test harness so it is captured per test.
/// Safe to call from every test.
pub fn init_for_tests() {
    let _ = builder().is_test(true).try_init();
}

fn builder() -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();

    builder
        .format(|fmt, record| {
            use std::io::Write;

            let timestamp = fmt.timestamp();

            // Module paths only add noise at the default level.
            if record.level() >= log::Level::Debug {
                writeln!(
                    fmt,
                    "<{}>{} [{}] - [{}] {}",
                    to_syslog_level(record.level()),
                    timestamp,
                    level_tag(record.level()),
                    record.target(),
                    record.args()
                )
            } else {
                writeln!(
                    fmt,
                    "<{}>{} [{}] - {}",
                    to_syslog_level(record.level()),
                    timestamp,
                    level_tag(record.level()),
                    record.args()
                )
            }
        })
        .filter_level(log::LevelFilter::Info)
        .parse_env(LOG_LEVEL_ENV_VAR);

    builder
}

fn level_tag(level: log::Level) -> &'static str {
    match level {
        log::Level::Trace => "TRCE",
        log::Level::Debug => "DBUG",
        log::Level::Info => "INFO",
        log::Level::Warn => "WARN",
        log::Level::Error => "ERR!",
    }
}

fn to_syslog_level(level: log::Level) -> i8 {
    match level {
        log::Level::Error => 3,
        log::Level::Warn => 4,
        log::Level::Info => 6,
        log::Level::Debug | log::Level::Trace => 7,
    }
}
