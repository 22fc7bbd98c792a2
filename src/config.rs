//! # Configuration
//!
//! What the process decides once at startup:
//! - which datagram send/receive implementation the transport uses, from `PGM_SEND` ([send_mode])
//! - which condvar and rwlock backends got compiled in ([BACKEND])
//!
//! The sync layer itself never looks at the send mode, it only shares the "decided once, before any
//! transport thread runs" discipline.

use std::{
    env::{self, VarError},
    sync::OnceLock,
};

use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};
use tracing::{trace, warn};

use crate::error::ConfigError;

/// Environment variable selecting the [SendMode].
pub const SEND_MODE_VAR: &str = "PGM_SEND";

/// How datagrams are sent and received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SendMode {
    /// The platform's plain `sendto` / `recvfrom`.
    #[default]
    Default,
    /// Overlapped-capable WinSock calls.
    Wsa,
    /// Pretend every datagram went through, for benchmarking the layers above.
    None,
}

impl SendMode {
    /// Full name in any case, or just its first letter.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let value = value.trim();
        if let Ok(mode) = value.parse() {
            return Ok(mode);
        }
        match value {
            "D" | "d" => Ok(Self::Default),
            "W" | "w" => Ok(Self::Wsa),
            "N" | "n" => Ok(Self::None),
            _ => Err(ConfigError::UnknownSendMode(value.to_string())),
        }
    }
}

/// The send mode of this process. `PGM_SEND` is read on the first call only.
///
/// Unset or empty means [SendMode::Default], so does a value we don't understand (with a warning).
pub fn send_mode() -> SendMode {
    static MODE: OnceLock<SendMode> = OnceLock::new();
    *MODE.get_or_init(|| resolve(env::var(SEND_MODE_VAR)))
}

fn resolve(var: Result<String, VarError>) -> SendMode {
    let parsed = match var {
        Err(VarError::NotPresent) => Ok(SendMode::Default),
        Err(VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode(SEND_MODE_VAR)),
        Ok(value) if value.trim().is_empty() => Ok(SendMode::Default),
        Ok(value) => SendMode::parse(&value),
    };
    let mode = parsed.unwrap_or_else(|err| {
        warn!(%err, "falling back to the default send mode");
        SendMode::Default
    });
    trace!(%mode, var = SEND_MODE_VAR, "send mode resolved");
    mode
}

/// Which implementation backs [Condvar](crate::condvar::Condvar) and [RwLock](crate::rwlock::RwLock).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Backend {
    /// Futex based, Linux only.
    Native,
    /// Built from the crate's own mutex and per-thread wait handles.
    Emulated,
}

native! {
    pub const BACKEND: Backend = Backend::Native;
}
emulated! {
    pub const BACKEND: Backend = Backend::Emulated;
}

#[cfg(test)]
mod test {
    use std::ffi::OsString;

    use strum::IntoEnumIterator;

    use super::*;
    use crate::util::test::trace_init;

    #[test]
    fn parse_full_names_and_initials() {
        for mode in SendMode::iter() {
            let name: &'static str = mode.into();
            assert_eq!(SendMode::parse(name), Ok(mode));
            assert_eq!(SendMode::parse(&name.to_uppercase()), Ok(mode));
            assert_eq!(SendMode::parse(&name[..1].to_uppercase()), Ok(mode));
        }
        assert_eq!(SendMode::parse(" wsa\n"), Ok(SendMode::Wsa));
    }

    #[test]
    fn parse_rejects_the_rest() {
        assert_eq!(
            SendMode::parse("udp"),
            Err(ConfigError::UnknownSendMode("udp".to_string()))
        );
        assert!(SendMode::parse("Wx").is_err());
        assert!(SendMode::parse("").is_err());
    }

    #[test]
    fn resolve_falls_back_to_default() {
        let _trace = trace_init();
        assert_eq!(resolve(Err(VarError::NotPresent)), SendMode::Default);
        assert_eq!(resolve(Ok(String::new())), SendMode::Default);
        assert_eq!(resolve(Ok("N".to_string())), SendMode::None);
        assert_eq!(resolve(Ok("bogus".to_string())), SendMode::Default);
        assert_eq!(
            resolve(Err(VarError::NotUnicode(OsString::from("x")))),
            SendMode::Default
        );
    }

    #[test]
    fn send_mode_is_stable() {
        assert_eq!(send_mode(), send_mode());
    }

    #[test]
    fn names() {
        assert_eq!(SendMode::Wsa.to_string(), "wsa");
        assert_eq!(Backend::Emulated.to_string(), "emulated");
        if cfg!(all(target_os = "linux", not(feature = "emulated"))) {
            assert_eq!(BACKEND, Backend::Native);
        } else {
            assert_eq!(BACKEND, Backend::Emulated);
        }
    }
}
