//! `{NAME}` placeholder substitution.
//!
//! A placeholder is `{` + `[A-Za-z_][A-Za-z0-9_.]*` + `}`. Anything else in
//! braces is literal text. Substituted values are never re-scanned.

use crate::ContractError;
use std::collections::BTreeMap;

pub const MAX_PLACEHOLDERS: usize = 128;
pub const MAX_EXPANDED_LEN: usize = 64 * 1024;

pub fn is_placeholder_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

pub fn expand(
    template: &str,
    vars: &BTreeMap<String, String>,
    location: &str,
) -> Result<String, ContractError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut count = 0usize;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let name = after.find('}').map(|close| &after[..close]);
        match name {
            Some(name) if is_placeholder_name(name) => {
                count += 1;
                if count > MAX_PLACEHOLDERS {
                    return Err(ContractError::ExpansionLimit {
                        location: location.to_owned(),
                        reason: format!("more than {MAX_PLACEHOLDERS} placeholders"),
                    });
                }
                let value = vars.get(name).ok_or_else(|| ContractError::UnresolvedVariable {
                    name: name.to_owned(),
                    location: location.to_owned(),
                })?;
                out.push_str(value);
                rest = &after[name.len() + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
        check_len(&out, location)?;
    }
    out.push_str(rest);
    check_len(&out, location)?;
    Ok(out)
}

fn check_len(out: &str, location: &str) -> Result<(), ContractError> {
    if out.len() > MAX_EXPANDED_LEN {
        return Err(ContractError::ExpansionLimit {
            location: location.to_owned(),
            reason: format!("expansion exceeds {MAX_EXPANDED_LEN} bytes"),
        });
    }
    Ok(())
}
