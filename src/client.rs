//! The conditional GET issued against the server, through `wget`.
use dfuzz_os::process::TerminateReason;
use dfuzz_os::spawn::{Command, FdActions, SpawnOptions};
use failure::Error;
use std::ffi::OsString;

pub const DEFAULT_URL: &str = "http://127.0.0.1/index.html";

/// Lacks the day of month; cherokee-0.9.2 mis-parses it.
pub const MALFORMED_DATE: &str = "Sat Oct 1994 19:43:31 GMT";

pub const DEFAULT_PROGRAM: &str = "wget";

/// Something that issues one request per `call`.
pub trait Caller {
    fn call(&self) -> Result<TerminateReason, Error>;
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    /// Path or name of the `wget` executable.
    pub program: OsString,
    pub url: String,
    /// Value of the `If-Modified-Since` header.
    pub date: String,
    /// Let the client write to the inherited stderr.
    pub show_output: bool,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.into(),
            url: DEFAULT_URL.to_string(),
            date: MALFORMED_DATE.to_string(),
            show_output: false,
        }
    }
}

impl HttpClient {
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&["-O", "/dev/null"])
            .arg(format!("--header=If-Modified-Since: {}", self.date))
            .arg(&self.url);
        cmd
    }

    fn spawn_options(&self) -> SpawnOptions {
        // wget reports progress and errors on stderr.
        let fd_actions = if self.show_output {
            FdActions::new_with_stderr_only()
        } else {
            FdActions::new_with_suppress_all()
        };
        SpawnOptions { fd_actions }
    }
}

impl Caller for HttpClient {
    /// Runs the client to completion.
    fn call(&self) -> Result<TerminateReason, Error> {
        let process = self.command().spawn(&self.spawn_options())?;
        Ok(process.wait_exit()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command() {
        assert_eq!(
            HttpClient::default().command().argv(),
            vec![
                "wget",
                "-O",
                "/dev/null",
                "--header=If-Modified-Since: Sat Oct 1994 19:43:31 GMT",
                "http://127.0.0.1/index.html",
            ]
        );
    }

    #[test]
    fn test_call() {
        // `true` ignores the wget arguments.
        let client = HttpClient {
            program: "true".into(),
            ..Default::default()
        };
        assert!(client.call().unwrap().success());

        let client = HttpClient {
            program: "false".into(),
            ..Default::default()
        };
        assert_eq!(client.call().unwrap(), TerminateReason::Exit { status: 1 });
    }

    #[test]
    fn test_missing_program() {
        let client = HttpClient {
            program: "/nonexistent/wget".into(),
            ..Default::default()
        };
        let err = client.call().unwrap_err();
        assert_eq!(
            err.downcast::<dfuzz_os::spawn::Error>().unwrap(),
            dfuzz_os::spawn::Error::NotFound
        );
    }
}
