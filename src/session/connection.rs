//! Vendor-aware device connection
//!
//! Wraps the expect machine with everything protocol- and vendor-specific:
//! transport fallback (SSH1, then SSH with legacy algorithms, then Telnet),
//! prompt classification after login, recovery into the Cisco privileged
//! mode, and the send path with output scrubbing and prompt-change detection.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::ErrorCode;
use crate::session::expect::{ShellSession, SYSTEM_TIMEOUT};
use crate::session::prompts::{self, Prompt};
use crate::session::{DeviceLink, SendOutcome};

const SSH_KEX_ALGORITHMS: &str = "-o KexAlgorithms=+diffie-hellman-group1-sha1,\
diffie-hellman-group14-sha1,diffie-hellman-group14-sha256,\
diffie-hellman-group16-sha512,diffie-hellman-group-exchange-sha1,\
diffie-hellman-group-exchange-sha256,ecdh-sha2-nistp256,\
ecdh-sha2-nistp384,ecdh-sha2-nistp521,curve25519-sha256";
const SSH_HOST_KEY_ALGORITHMS: &str = "-o HostKeyAlgorithms=+ssh-dss,ssh-rsa";
const SSH_CIPHERS: &str = "-o Ciphers=+aes128-cbc,3des-cbc,aes192-cbc,aes256-cbc";

/// Menu-escape keys in probe order, each with the help-line pattern that
/// reveals the key is bound to an exit action.
static MENU_EXITS: Lazy<[(&'static str, Regex); 3]> = Lazy::new(|| {
    [
        ("q", Regex::new(r"\sq\s.*(exit|quit|close)").expect("fixed pattern")),
        ("e", Regex::new(r"\se\s.*(exit|quit|close)").expect("fixed pattern")),
        ("c", Regex::new(r"\sc\s.*(exit|quit|close)").expect("fixed pattern")),
    ]
});

/// An authenticated session to one device, tracking the last observed prompt.
pub struct Connection {
    shell: ShellSession,
    prompt: &'static Prompt,
    /// Output of the login dialogue, kept for menu-escape discovery.
    login_output: String,
    password: String,
}

impl Connection {
    /// Connect to `host`, trying SSH1, SSH (with legacy key exchange, host
    /// key and cipher options) and Telnet in that order. The first transport
    /// that authenticates wins; its prompt is classified immediately.
    ///
    /// When every transport fails, the first structured failure is returned —
    /// unless all three simply could not start, which means no usable client
    /// binary exists on this system.
    pub fn open(host: &str, username: &str, password: &str) -> Result<Connection, ErrorCode> {
        let ssh1_command =
            format!("ssh1 -o connecttimeout=20 -o StrictHostKeyChecking=no {username}@{host}");
        let ssh_command = format!(
            "ssh -o connecttimeout=20 -o StrictHostKeyChecking=no {SSH_KEX_ALGORITHMS} {SSH_HOST_KEY_ALGORITHMS} {SSH_CIPHERS} {username}@{host}"
        );
        let telnet_command = format!("telnet -l {username} {host}");

        let mut first_failure: Option<ErrorCode> = None;
        for command_line in [ssh1_command, ssh_command, telnet_command] {
            let mut shell = match ShellSession::spawn(&command_line) {
                Ok(shell) => shell,
                Err(code) => {
                    if first_failure.is_none() && code != ErrorCode::SpawnExec {
                        first_failure = Some(code);
                    }
                    continue;
                }
            };

            let (login_output, outcome) = shell.authenticate(username, password);
            match outcome {
                Ok(()) => {
                    debug!("connection established via '{}'", command_line);
                    let mut connection = Connection {
                        shell,
                        prompt: &prompts::UNIVERSAL,
                        login_output,
                        password: password.to_string(),
                    };
                    connection.prompt_define()?;
                    return Ok(connection);
                }
                Err(code) => {
                    debug!("connection attempt '{}' failed: {}", command_line, code);
                    shell.close();
                    if first_failure.is_none() && code != ErrorCode::SpawnExec {
                        first_failure = Some(code);
                    }
                }
            }
        }

        Err(first_failure.unwrap_or(ErrorCode::NoAvailableMethod))
    }

    /// Determine the device's current prompt.
    ///
    /// Sends an empty line so the device repaints its prompt, classifies the
    /// response, and — for Cisco — recovers into the privileged mode when the
    /// session landed in user mode or an auto-started menu.
    fn prompt_define(&mut self) -> Result<(), ErrorCode> {
        let (mut output, outcome) =
            self.shell
                .send_string("", SYSTEM_TIMEOUT, &prompts::UNIVERSAL);
        outcome?;

        // Some devices repaint the prompt without the leading line break the
        // classifier patterns anchor on.
        if !output.starts_with("\r\n") {
            output = format!("\r\n{output}");
        }

        debug!("classifying prompt from: '{}'", output);
        let prompt = prompts::classify(&output)?;
        debug!("prompt changed to: '{}'", prompt.name);
        self.prompt = prompt;

        match self.prompt.name {
            // User mode cannot run the interesting commands; go privileged.
            name if name == prompts::CISCO_USER.name => {
                let _ = self.shell.send_enable(&self.password, &prompts::CISCO_PRIV);
                let _ = self.prompt_define();
                if self.prompt.name != prompts::CISCO_PRIV.name {
                    return Err(ErrorCode::CiscoEnable);
                }
            }
            // A VTY line configured to auto-start a menu; find its exit key.
            name if name == prompts::CISCO_MENU.name => {
                let _ = self.escape_menu();
                let _ = self.prompt_define();
                if self.prompt.name != prompts::CISCO_PRIV.name {
                    return Err(ErrorCode::CiscoMenuExit);
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Leave an auto-started Cisco menu using whichever exit key the menu's
    /// own help text advertises.
    fn escape_menu(&mut self) -> Result<(), ErrorCode> {
        for (key, pattern) in MENU_EXITS.iter() {
            if pattern.is_match(&self.login_output) {
                return self.shell.send_menu_key(key, &prompts::CISCO_PRIV);
            }
        }
        Err(ErrorCode::CiscoMenuExit)
    }
}

impl DeviceLink for Connection {
    fn send(&mut self, command: &str, timeout: Duration, prompt_change_allowed: bool) -> SendOutcome {
        let previous = self.prompt;

        // A command that is allowed to change the prompt cannot be awaited on
        // the current one; fall back to the universal pattern.
        let expected: &Prompt = if prompt_change_allowed {
            &prompts::UNIVERSAL
        } else {
            previous
        };

        let (raw, outcome) = self.shell.send_string(command, timeout, expected);
        let output = scrub_output(&raw);

        if let Err(code) = outcome {
            debug!("command '{}' failed: {}", command, code);
            return SendOutcome {
                output,
                error: Some(code),
            };
        }

        if let Err(code) = self.prompt_define() {
            debug!("prompt undefined after command '{}': {}", command, code);
            return SendOutcome {
                output,
                error: Some(code),
            };
        }

        if self.prompt.name != previous.name && !prompt_change_allowed {
            debug!(
                "prompt changed from '{}' to '{}' without permission",
                previous.name, self.prompt.name
            );
            return SendOutcome {
                output,
                error: Some(ErrorCode::PromptChanged),
            };
        }

        SendOutcome {
            output,
            error: None,
        }
    }

    fn prompt_name(&self) -> &str {
        self.prompt.name
    }

    fn vendor(&self) -> &str {
        self.prompt.vendor
    }

    fn close(&mut self) {
        self.shell.close();
    }
}

/// Clean a raw command response for the caller: trim surrounding line breaks
/// and spaces, drop the DC4/backspace and space/backspace pairs some F5
/// firmware interleaves, and cut the final line — the repainted prompt.
fn scrub_output(raw: &str) -> String {
    let trimmed = raw.trim_matches(|c: char| matches!(c, '\r' | '\n' | ' '));
    let cleaned = trimmed
        .replace("\u{14}\u{8}", "")
        .replace(" \u{8}", "");
    match cleaned.rfind('\n') {
        Some(last) => cleaned[..=last].to_string(),
        None => String::new(),
    }
}
