//! UNIX signals, as reported by terminated children.

use std::convert::TryFrom;
use std::fmt;

macro_rules! signal_enum {
    (pub enum $enum_name:ident {
        $($name:ident),*
    }) => {
        /// UNIX signals.
        #[repr(i32)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum $enum_name {
            $(
                $name = libc::$name,
            )*
        }

        impl $enum_name {
            /// Returns the conventional name, e.g. `"SIGSEGV"`.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        $enum_name::$name => stringify!($name),
                    )*
                }
            }
        }

        impl TryFrom<i32> for $enum_name {
            type Error = i32;

            /// Returns `Err(raw_value)` for numbers without a variant (e.g.
            /// real-time signals).
            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $(
                        libc::$name => Ok($enum_name::$name),
                    )*
                    _ => Err(value),
                }
            }
        }
    };
}

signal_enum! {
    pub enum Signal {
        SIGABRT,
        SIGALRM,
        SIGBUS,
        SIGCHLD,
        SIGCONT,
        SIGFPE,
        SIGHUP,
        SIGILL,
        SIGINT,
        SIGIO,
        SIGKILL,
        SIGPIPE,
        SIGPROF,
        SIGPWR,
        SIGQUIT,
        SIGSEGV,
        SIGSTKFLT,
        SIGSTOP,
        SIGTSTP,
        SIGSYS,
        SIGTERM,
        SIGTRAP,
        SIGTTIN,
        SIGTTOU,
        SIGURG,
        SIGUSR1,
        SIGUSR2,
        SIGVTALRM,
        SIGXCPU,
        SIGXFSZ,
        SIGWINCH
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), *self as i32)
    }
}

/// Formats a raw signal number, by name when it is known.
pub fn describe(signal: i32) -> String {
    match Signal::try_from(signal) {
        Ok(signal) => signal.to_string(),
        Err(raw) => format!("signal {}", raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(Signal::SIGSEGV.as_str(), "SIGSEGV");
        assert_eq!(Signal::try_from(libc::SIGKILL), Ok(Signal::SIGKILL));
        assert_eq!(describe(libc::SIGABRT), format!("SIGABRT ({})", libc::SIGABRT));
        // Real-time signal.
        assert_eq!(describe(40), "signal 40");
    }
}
