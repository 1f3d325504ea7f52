//! Pattern-table expect machine
//!
//! Owns the child process (ssh/telnet) under a pseudo-terminal and drives the
//! interactive dialogue: a reader thread pumps device bytes into a channel,
//! and [`ShellSession::expect`] matches a priority-ordered pattern table
//! against the accumulated output, replying, failing or accepting as each
//! pattern directs, bounded by a total deadline.

use std::io::{Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use regex::Regex;
use tracing::debug;

use crate::error::ErrorCode;
use crate::session::prompts::{self, Prompt};

/// Default time to wait for the device during authentication and other
/// engine-internal dialogues.
pub const SYSTEM_TIMEOUT: Duration = Duration::from_secs(20);

/// What to do when a pattern matches.
pub enum Reaction {
    /// Write `text` to the device and keep waiting. Each reply has a budget;
    /// matching again once the budget is spent fails with `exhausted`.
    Reply {
        text: String,
        budget: u32,
        exhausted: ErrorCode,
    },
    /// The device reported a failure; stop with the code.
    Fail(ErrorCode),
    /// The awaited output arrived.
    Accept,
}

/// One row of the pattern table.
pub struct Expectation {
    pub pattern: Regex,
    pub reaction: Reaction,
}

impl Expectation {
    pub fn reply(pattern: Regex, text: String, budget: u32, exhausted: ErrorCode) -> Self {
        Self {
            pattern,
            reaction: Reaction::Reply {
                text,
                budget,
                exhausted,
            },
        }
    }

    pub fn fail(pattern: Regex, code: ErrorCode) -> Self {
        Self {
            pattern,
            reaction: Reaction::Fail(code),
        }
    }

    pub fn accept(pattern: Regex) -> Self {
        Self {
            pattern,
            reaction: Reaction::Accept,
        }
    }
}

/// How an expect round ended.
#[derive(Debug, PartialEq, Eq)]
enum Caught {
    Accepted,
    Refused(ErrorCode),
    TimedOut,
    Eof,
}

/// An interactive child process under a PTY.
pub struct ShellSession {
    child: Box<dyn Child + Send>,
    // The PTY closes when the master side drops; keep it for the session's
    // whole lifetime.
    _master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    incoming: Receiver<Vec<u8>>,
    /// Unconsumed output still eligible for pattern matching.
    window: String,
}

impl ShellSession {
    /// Spawn `command_line` (program and whitespace-separated arguments)
    /// under a new PTY.
    pub fn spawn(command_line: &str) -> Result<Self, ErrorCode> {
        debug!("spawning session: '{}'", command_line);

        let mut parts = command_line.split_whitespace();
        let program = parts.next().ok_or(ErrorCode::SpawnExec)?;
        if !program_exists(program) {
            debug!("session program '{}' is not available", program);
            return Err(ErrorCode::SpawnExec);
        }

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| {
                debug!("cannot open pty: {}", e);
                ErrorCode::SpawnExec
            })?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(parts);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            debug!("cannot spawn session process: {}", e);
            ErrorCode::SpawnExec
        })?;
        drop(pair.slave);

        let mut reader = pair.master.try_clone_reader().map_err(|e| {
            debug!("cannot clone pty reader: {}", e);
            ErrorCode::SpawnExec
        })?;
        let writer = pair.master.take_writer().map_err(|e| {
            debug!("cannot take pty writer: {}", e);
            ErrorCode::SpawnExec
        })?;

        let (tx, incoming) = mpsc::channel();
        thread::spawn(move || {
            let mut buffer = [0u8; 8192];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buffer[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self {
            child,
            _master: pair.master,
            writer,
            incoming,
            window: String::new(),
        })
    }

    /// Write a line (text plus newline) to the device.
    fn send_line(&mut self, text: &str) -> std::io::Result<()> {
        self.writer.write_all(text.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    fn send_raw(&mut self, text: &str) -> std::io::Result<()> {
        self.writer.write_all(text.as_bytes())?;
        self.writer.flush()
    }

    /// Match the pattern table against device output until a pattern accepts
    /// or fails, the deadline passes, or the child goes away. Returns all
    /// output read during this round alongside the outcome.
    fn expect(&mut self, cases: &mut [Expectation], timeout: Duration) -> (String, Caught) {
        let deadline = Instant::now() + timeout;
        let mut output = String::new();

        loop {
            let mut matched = None;
            for (idx, case) in cases.iter().enumerate() {
                if let Some(found) = case.pattern.find(&self.window) {
                    matched = Some((idx, found.end()));
                    break;
                }
            }

            if let Some((idx, end)) = matched {
                match &mut cases[idx].reaction {
                    Reaction::Reply {
                        text,
                        budget,
                        exhausted,
                    } => {
                        if *budget == 0 {
                            return (output, Caught::Refused(*exhausted));
                        }
                        *budget -= 1;
                        let text = text.clone();
                        self.window.drain(..end);
                        if let Err(e) = self.send_raw(&text) {
                            debug!("reply write failed: {}", e);
                        }
                        continue;
                    }
                    Reaction::Fail(code) => return (output, Caught::Refused(*code)),
                    Reaction::Accept => return (output, Caught::Accepted),
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return (output, Caught::TimedOut);
            }
            match self.incoming.recv_timeout(remaining) {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    self.window.push_str(&text);
                    output.push_str(&text);
                }
                Err(RecvTimeoutError::Timeout) => return (output, Caught::TimedOut),
                Err(RecvTimeoutError::Disconnected) => return (output, Caught::Eof),
            }
        }
    }

    /// Drive the login dialogue: answer the host-key question, supply the
    /// username and password once each, recognise transport failures, and
    /// accept on the first thing that looks like a shell prompt. Returns the
    /// full login output (needed later for menu-escape discovery).
    pub fn authenticate(
        &mut self,
        username: &str,
        password: &str,
    ) -> (String, Result<(), ErrorCode>) {
        let mut cases = vec![
            Expectation::reply(
                Regex::new(r"yes.no").expect("fixed pattern"),
                "yes\n".to_string(),
                1,
                ErrorCode::HostKeyReply,
            ),
            Expectation::reply(
                Regex::new(r"[Uu]sername:").expect("fixed pattern"),
                format!("{username}\n"),
                1,
                ErrorCode::AuthFail,
            ),
            Expectation::reply(
                Regex::new(r"[Pp]assword:").expect("fixed pattern"),
                format!("{password}\n"),
                1,
                ErrorCode::AuthFail,
            ),
        ];
        for (pattern, code) in prompts::CONNECT_FAILURES {
            cases.push(Expectation::fail(
                Regex::new(pattern).expect("fixed pattern"),
                code,
            ));
        }
        cases.push(Expectation::accept(prompts::UNIVERSAL.matcher.clone()));

        let (output, caught) = self.expect(&mut cases, SYSTEM_TIMEOUT);
        debug!("login output: '{}'", output);

        let result = match caught {
            Caught::Accepted => Ok(()),
            Caught::Refused(code) => Err(code),
            Caught::TimedOut => Err(ErrorCode::ConnectionTimeout),
            Caught::Eof if output.is_empty() => Err(ErrorCode::EmptyBuffer),
            Caught::Eof => Err(ErrorCode::ConnectionTimeout),
        };
        (output, result)
    }

    /// Send a command and wait for `prompt` to come back, failing early if
    /// the prompt's error patterns appear in the response.
    pub fn send_string(
        &mut self,
        command: &str,
        timeout: Duration,
        prompt: &Prompt,
    ) -> (String, Result<(), ErrorCode>) {
        debug!("sending command: '{}' awaiting prompt '{}'", command, prompt.name);

        self.window.clear();
        if let Err(e) = self.send_line(command) {
            debug!("command write failed: {}", e);
            return (String::new(), Err(ErrorCode::CommandSend));
        }

        let mut cases = vec![
            Expectation::fail(prompt.errors.clone(), ErrorCode::CommandSend),
            Expectation::accept(prompt.matcher.clone()),
        ];
        let (output, caught) = self.expect(&mut cases, timeout);

        let result = match caught {
            Caught::Accepted => Ok(()),
            Caught::Refused(code) => Err(code),
            Caught::TimedOut => Err(ErrorCode::PromptCaptureTimeout),
            Caught::Eof if output.is_empty() => Err(ErrorCode::EmptyBuffer),
            Caught::Eof => Err(ErrorCode::PromptCaptureTimeout),
        };
        (output, result)
    }

    /// Issue `enable`, answering the password challenge once, and wait for
    /// the privileged prompt.
    pub fn send_enable(&mut self, password: &str, prompt: &Prompt) -> Result<(), ErrorCode> {
        debug!("sending command: 'enable'");

        self.window.clear();
        if let Err(e) = self.send_line("enable") {
            debug!("enable write failed: {}", e);
            return Err(ErrorCode::CiscoEnable);
        }

        let mut cases = vec![
            Expectation::reply(
                Regex::new(r"[Pp]assword:").expect("fixed pattern"),
                format!("{password}\n"),
                1,
                ErrorCode::CiscoEnable,
            ),
            Expectation::accept(prompt.matcher.clone()),
        ];
        let (_, caught) = self.expect(&mut cases, SYSTEM_TIMEOUT);
        match caught {
            Caught::Accepted => Ok(()),
            Caught::Refused(code) => Err(code),
            Caught::TimedOut | Caught::Eof => Err(ErrorCode::CiscoEnable),
        }
    }

    /// Send a single menu key (`q`, `e` or `c`) and wait for the privileged
    /// prompt to appear.
    pub fn send_menu_key(&mut self, key: &str, prompt: &Prompt) -> Result<(), ErrorCode> {
        debug!("sending menu exit key: '{}'", key);

        self.window.clear();
        if let Err(e) = self.send_line(key) {
            debug!("menu key write failed: {}", e);
            return Err(ErrorCode::CiscoMenuExit);
        }

        let mut cases = vec![Expectation::accept(prompt.matcher.clone())];
        let (_, caught) = self.expect(&mut cases, SYSTEM_TIMEOUT);
        match caught {
            Caught::Accepted => Ok(()),
            Caught::Refused(code) => Err(code),
            Caught::TimedOut | Caught::Eof => Err(ErrorCode::CiscoMenuExit),
        }
    }

    /// Tear the session down.
    pub fn close(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

/// The PTY spawn reports an exec failure only after the fork, long after we
/// need to know; resolve the program up front so a missing binary fails fast
/// and the caller can fall back to the next transport.
fn program_exists(program: &str) -> bool {
    if program.contains('/') {
        return std::path::Path::new(program).exists();
    }
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| dir.join(program).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_on_matching_output() {
        let mut session = ShellSession::spawn("echo ready-marker").unwrap();
        let mut cases = vec![Expectation::accept(
            Regex::new("ready-marker").unwrap(),
        )];
        let (output, caught) = session.expect(&mut cases, Duration::from_secs(5));
        assert_eq!(caught, Caught::Accepted);
        assert!(output.contains("ready-marker"));
        session.close();
    }

    #[test]
    fn times_out_when_nothing_matches() {
        let mut session = ShellSession::spawn("sleep 5").unwrap();
        let mut cases = vec![Expectation::accept(Regex::new("never-appears").unwrap())];
        let (_, caught) = session.expect(&mut cases, Duration::from_millis(200));
        assert_eq!(caught, Caught::TimedOut);
        session.close();
    }

    #[test]
    fn fail_pattern_wins_over_later_accept() {
        let mut session = ShellSession::spawn("echo connection refused").unwrap();
        let mut cases = vec![
            Expectation::fail(
                Regex::new(r"[Cc]onnection\srefused").unwrap(),
                ErrorCode::ConnectionRefused,
            ),
            Expectation::accept(Regex::new("refused").unwrap()),
        ];
        let (_, caught) = session.expect(&mut cases, Duration::from_secs(5));
        assert_eq!(caught, Caught::Refused(ErrorCode::ConnectionRefused));
        session.close();
    }

    #[test]
    fn spawn_failure_is_structured() {
        assert_eq!(
            ShellSession::spawn("definitely-not-a-real-binary-xyz arg").err(),
            Some(ErrorCode::SpawnExec)
        );
    }
}
