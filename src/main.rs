use std::env::args;
use std::str::FromStr;
use std::string::ToString;

use strum::IntoEnumIterator;
use strum_macros::{self, Display, EnumIter, EnumString};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    args()
        .nth(1)
        .ok_or(format!(
            "no scenario supplied, use one of {} or see unit tests",
            Scenario::iter()
                .map(|s| s.to_string())
                .collect::<Vec<String>>()
                .join(",")
        ))
        .and_then(|selector| {
            Scenario::from_str(&selector)
                .map(|scenario| match scenario {
                    Scenario::Mutex => pgm_sync::demo::mutex(),
                    Scenario::Spinlock => pgm_sync::demo::spinlock(),
                    Scenario::Condvar => pgm_sync::demo::condvar(),
                    Scenario::Rwlock => pgm_sync::demo::rwlock(),
                    Scenario::Checksum => pgm_sync::demo::checksum(),
                })
                .map_err(|e| format!("{e} `{selector}'"))
        })
}

#[derive(EnumIter, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
enum Scenario {
    Mutex,
    Spinlock,
    Condvar,
    Rwlock,
    Checksum,
}
