//! `{{name}}` substitution
//!
//! Commands and output filenames may reference artefacts as `{{name}}`.
//! Every occurrence is replaced with the artefact's value; a reference to a
//! missing or empty artefact aborts the run.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::error::ErrorCode;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(?P<variable>[^\s\t]+?)\}\}").expect("fixed pattern"));

/// Replace every `{{name}}` token in `text` with the artefact value.
///
/// Example: `show ip route vrf {{vrfname}}` with `vrfname = big-data` becomes
/// `show ip route vrf big-data`.
pub fn substitute(text: &str, artefacts: &HashMap<String, String>) -> Result<String, ErrorCode> {
    let mut result = text.to_string();

    for capture in PLACEHOLDER.captures_iter(text) {
        let token = &capture[0];
        let key = &capture["variable"];
        match artefacts.get(key) {
            Some(value) if !value.is_empty() => {
                result = result.replace(token, value);
            }
            _ => {
                warn!("text references variable '{}' which does not exist", token);
                return Err(ErrorCode::VariableMissing);
            }
        }
    }

    Ok(result)
}
