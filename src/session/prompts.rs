//! Vendor prompt catalog
//!
//! Every supported device family is described by a prompt record: the regex
//! that recognises its shell prompt in raw session output, and the error
//! patterns the device prints when a command is rejected. Classification is
//! first-match over a fixed priority list — configuration-mode prompts are
//! tried before the plainer prompts they would otherwise shadow.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::ErrorCode;

/// A device shell prompt and the error chatter associated with it.
#[derive(Debug)]
pub struct Prompt {
    pub vendor: &'static str,
    pub name: &'static str,
    /// Recognises the prompt in session output.
    pub matcher: Regex,
    /// Union of the vendor's command-rejection messages.
    pub errors: Regex,
}

impl PartialEq for Prompt {
    fn eq(&self, other: &Self) -> bool {
        self.vendor == other.vendor && self.name == other.name
    }
}

/// Session-level failure messages printed by ssh/telnet themselves, paired
/// with the code each one maps to.
pub const CONNECT_FAILURES: [(&str, ErrorCode); 7] = [
    (r"[Cc]onnection\sclosed", ErrorCode::ConnectionClosed),
    (r"[Aa]uthentication\sfailed", ErrorCode::AuthFail),
    (r"[Cc]onnection\srefused", ErrorCode::ConnectionRefused),
    (r"[Cc]onnection\stimed\sout", ErrorCode::ConnectionTimeout),
    (r"[Pp]ermission\sdenied", ErrorCode::AccessDenied),
    (
        r"[Tt]he\sremote\ssystem\srefused\sthe\sconnection",
        ErrorCode::ConnectionRefused,
    ),
    (r"[Uu]nable\sto\snegotiate\swith", ErrorCode::UnableToNegotiate),
];

const CISCO_ERRORS: &[&str] = &[
    r"(\n\r?[Tt]ranslating.*domain server)",
    r"(\n\r?%\s[Bb]ad\sIP\saddress)",
    r"(\n\r?%\s[Uu]nknown\scommand)",
    r"(\n\r?%\s[Ii]ncomplete\scommand)",
    r"(\n\r?%\s[Aa]mbiguous\scommand)",
    r"(\n\r?%\s[Ii]nvalid\sinput)",
    r"(\n\r?%\s[Ii]nvalid\s[Cc]ommand)",
    r"(\n\r?%\s[Aa]ccess\sdenied)",
    r"(\n\r?%\s[Ee]rror\sin\sauthentication)",
    r"(\n\r?[Uu]nrecognized\shost)",
    r"(\n\r?[Cc]ommand\sauthorization\sfailed)",
    r"(\n\r?[Cc]ommand\srejected:)",
    r"(\n\r?ERROR:\s%\s[Ii]nvalid\s[Ii]nput)",
    r"(\n\r?ERROR:\s%\s[Ii]nvalid\s[Hh]ostname)",
    r"(\n\r?ERROR:\s%\s[Ii]ncomplete\s[Cc]ommand)",
    r"(\n\r?%[Ee]rror\sparsing\sfilename)",
    r"(\n\r?%[Ee]rror\sopening)",
];

const HUAWEI_ERRORS: &[&str] = &[r"(\r\n\r?[Ee]rror:\s)"];

const F5_BASH_ERRORS: &[&str] = &[r"(-bash:\s.*:\scommand\snot\sfound)"];

const F5_TMOS_ERRORS: &[&str] = &[
    r"([Ss]yntax\s[Ee]rror:)",
    r"([Uu]nexpected\s[Ee]rror:)",
    r#"([Uu]se\s"quit"\sto\send\sthe\scurrent\ssession)"#,
];

const RADWARE_ERRORS: &[&str] = &[r"(\r\n\r?[Ee]rror:\s)"];

fn joined(patterns: &[&str]) -> Regex {
    Regex::new(&patterns.join("|")).expect("prompt error patterns are fixed literals")
}

fn connect_failure_patterns() -> Vec<&'static str> {
    CONNECT_FAILURES.iter().map(|(pattern, _)| *pattern).collect()
}

/// Fallback prompt matching any line ending in `>`, `#`, `:` or `]`, used
/// whenever the concrete vendor prompt is unknown or allowed to change. Its
/// error patterns are the connection-level failures.
pub static UNIVERSAL: Lazy<Prompt> = Lazy::new(|| Prompt {
    vendor: "unknown",
    name: "universal",
    matcher: Regex::new(r"[^>#:]([>#:\]]\s?)$").expect("fixed pattern"),
    errors: joined(&connect_failure_patterns()),
});

pub static CISCO_USER: Lazy<Prompt> = Lazy::new(|| Prompt {
    vendor: "cisco",
    name: "cisco-user",
    matcher: Regex::new(r"\r\n\r?[^<\s]+>").expect("fixed pattern"),
    errors: joined(CISCO_ERRORS),
});

pub static CISCO_PRIV: Lazy<Prompt> = Lazy::new(|| Prompt {
    vendor: "cisco",
    name: "cisco-priv",
    matcher: Regex::new(r"\r?\n\r?[^#\s]+#").expect("fixed pattern"),
    errors: joined(CISCO_ERRORS),
});

pub static CISCO_CONF: Lazy<Prompt> = Lazy::new(|| Prompt {
    vendor: "cisco",
    name: "cisco-conf",
    matcher: Regex::new(r"\r?\n\r?[^#\s]+\(conf[^#\s]+?\)#").expect("fixed pattern"),
    errors: joined(CISCO_ERRORS),
});

pub static CISCO_MENU: Lazy<Prompt> = Lazy::new(|| Prompt {
    vendor: "cisco",
    name: "cisco-menu",
    matcher: Regex::new(r".*([Ss]elect\s[Aa]ction|[Yy]our\s[Ss]election).*:")
        .expect("fixed pattern"),
    errors: joined(CISCO_ERRORS),
});

pub static HUAWEI_USER: Lazy<Prompt> = Lazy::new(|| Prompt {
    vendor: "huawei",
    name: "huawei-user",
    matcher: Regex::new(r"\r?\n\r?(.+)?<.+>").expect("fixed pattern"),
    errors: joined(HUAWEI_ERRORS),
});

pub static HUAWEI_SYS: Lazy<Prompt> = Lazy::new(|| Prompt {
    vendor: "huawei",
    name: "huawei-sys",
    matcher: Regex::new(r"\r?\n\r?(.+)?\[.+\]").expect("fixed pattern"),
    errors: joined(HUAWEI_ERRORS),
});

// [<login user>@<device hostname>:<device state>:<device group sync status>]
pub static F5_BASH: Lazy<Prompt> = Lazy::new(|| Prompt {
    vendor: "f5",
    name: "f5-bash",
    matcher: Regex::new(r"\[[a-zA-Z0-9_-]+?@[a-zA-Z0-9_-]+?:[a-zA-Z\s]+?:[a-zA-Z\s]+?\]")
        .expect("fixed pattern"),
    errors: joined(F5_BASH_ERRORS),
});

// <login user>@(<device hostname>)(cfg-sync <sync status>)(<state>)(<partition>)(tmos)
pub static F5_TMOS: Lazy<Prompt> = Lazy::new(|| Prompt {
    vendor: "f5",
    name: "f5-tmos",
    matcher: Regex::new(
        r"[a-zA-Z0-9_-]+?@\([a-zA-Z0-9_-]+?\)\([a-zA-Z0-9_\s-]+?\)\([a-zA-Z0-9_\s-]+?\)\([a-zA-Z0-9_\s/-]+?\)\(tmos\)",
    )
    .expect("fixed pattern"),
    errors: joined(F5_TMOS_ERRORS),
});

// >> Main#  /  >> Operations#
pub static RADWARE_ALTEON: Lazy<Prompt> = Lazy::new(|| Prompt {
    vendor: "radware",
    name: "radware-alteon",
    matcher: Regex::new(r"\r?\n\r?>>\s[^#]+#").expect("fixed pattern"),
    errors: joined(RADWARE_ERRORS),
});

/// Classify raw session output into a catalog prompt.
///
/// The order is load-bearing: `cisco-conf` shadows `cisco-priv` (a config
/// prompt also ends in `#`), and the menu prompt must be recognised before
/// the generic vendors get a chance.
pub fn classify(output: &str) -> Result<&'static Prompt, ErrorCode> {
    let catalog: [&'static Prompt; 9] = [
        &CISCO_CONF,
        &CISCO_USER,
        &CISCO_PRIV,
        &CISCO_MENU,
        &HUAWEI_USER,
        &HUAWEI_SYS,
        &F5_BASH,
        &F5_TMOS,
        &RADWARE_ALTEON,
    ];

    for prompt in catalog {
        if prompt.matcher.is_match(output) {
            return Ok(prompt);
        }
    }

    debug!("cannot classify prompt from output: '{}'", output);
    debug!("cannot classify prompt, bytes: '{}'", spell_control(output));
    Err(ErrorCode::PromptUndefined)
}

/// Spell out CR, LF and space so unprintable prompt buffers can be read in
/// debug logs.
pub fn spell_control(text: &str) -> String {
    let mut spelled = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\n' => spelled.push_str("\\n"),
            '\r' => spelled.push_str("\\r"),
            ' ' => spelled.push_str("\\s"),
            other => spelled.push(other),
        }
    }
    spelled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_cisco_modes() {
        assert_eq!(classify("\r\nrouter>").unwrap().name, "cisco-user");
        assert_eq!(classify("\r\nrouter#").unwrap().name, "cisco-priv");
        assert_eq!(classify("\r\nrouter(config-if)#").unwrap().name, "cisco-conf");
        assert_eq!(
            classify("\r\nPlease Select Action from menu below:").unwrap().name,
            "cisco-menu"
        );
    }

    #[test]
    fn config_mode_wins_over_priv() {
        // A config prompt matches the priv regex too; priority must pick conf.
        let output = "\r\nswitch(config)#";
        assert!(CISCO_PRIV.matcher.is_match(output));
        assert_eq!(classify(output).unwrap().name, "cisco-conf");
    }

    #[test]
    fn classifies_other_vendors() {
        assert_eq!(classify("\r\n<HUAWEI-CORE>").unwrap().name, "huawei-user");
        assert_eq!(classify("\r\n[HUAWEI-CORE]").unwrap().name, "huawei-sys");
        assert_eq!(
            classify("[admin@lb-01:Active:In Sync]").unwrap().name,
            "f5-bash"
        );
        assert_eq!(
            classify("admin@(lb-01)(cfg-sync In Sync)(Active)(/Common)(tmos)")
                .unwrap()
                .name,
            "f5-tmos"
        );
        assert_eq!(classify("\r\n>> Main#").unwrap().name, "radware-alteon");
    }

    #[test]
    fn unknown_output_is_an_error() {
        assert_eq!(
            classify("nothing that looks like a shell"),
            Err(ErrorCode::PromptUndefined)
        );
    }

    #[test]
    fn universal_prompt_matches_common_endings() {
        for output in ["host# ", "host#", "login:", "box> ", "[edit]"] {
            assert!(UNIVERSAL.matcher.is_match(output), "no match for {output:?}");
        }
    }

    #[test]
    fn universal_errors_catch_transport_failures() {
        for line in [
            "ssh: connect to host 10.0.0.1 port 22: Connection refused",
            "Connection closed by remote host",
            "Permission denied (publickey,password).",
            "Unable to negotiate with 10.0.0.1: no matching key exchange method",
        ] {
            assert!(UNIVERSAL.errors.is_match(line), "no match for {line:?}");
        }
    }

    #[test]
    fn cisco_errors_catch_rejections() {
        let output = "show verison\r\n% Invalid input detected at '^' marker.\r\n";
        assert!(CISCO_PRIV.errors.is_match(output));
    }

    #[test]
    fn spell_control_makes_whitespace_visible() {
        assert_eq!(spell_control("\r\nab c"), "\\r\\nab\\sc");
    }
}
