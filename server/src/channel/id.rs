//! Channel identifiers
//!
//! A channel is addressed as `group/id`. Composite channels fan several
//! component channels into one subscriber stream and are encoded
//! `m/<SEP><group/id><SEP><group/id>…<SEP>` with the reserved separator
//! byte, which validation keeps out of ordinary ids.

use std::fmt;

use crate::core::constants::{MULTI_SEP_CHR, MULTITAG_LIMIT};

/// A resolved channel id, single or composite
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelId {
    /// `group/id`
    Single(String),
    /// Component `group/id` strings, in subscriber tag order
    Multi(Vec<String>),
}

impl ChannelId {
    /// Build from already-validated bare ids, prefixing each with the group
    pub fn from_parts(group: &str, ids: &[String]) -> Self {
        let qualified: Vec<String> = ids.iter().map(|id| format!("{group}/{id}")).collect();
        if qualified.len() == 1 {
            Self::Single(qualified.into_iter().next().unwrap_or_default())
        } else {
            Self::Multi(qualified)
        }
    }

    /// Parse the wire encoding back into a channel id
    pub fn parse(s: &str) -> Self {
        let multi_prefix: String = format!("m/{MULTI_SEP_CHR}");
        if let Some(rest) = s.strip_prefix(&multi_prefix) {
            let parts: Vec<String> = rest
                .split(MULTI_SEP_CHR)
                .filter(|p| !p.is_empty())
                .map(str::to_owned)
                .collect();
            if parts.len() > 1 {
                return Self::Multi(parts);
            }
            if let Some(only) = parts.into_iter().next() {
                return Self::Single(only);
            }
        }
        Self::Single(s.to_owned())
    }

    /// Component channels, in tag order
    pub fn components(&self) -> &[String] {
        match self {
            Self::Single(id) => std::slice::from_ref(id),
            Self::Multi(ids) => ids,
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, Self::Multi(_))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(id) => f.write_str(id),
            Self::Multi(ids) => {
                write!(f, "m/{MULTI_SEP_CHR}")?;
                for id in ids {
                    write!(f, "{id}{MULTI_SEP_CHR}")?;
                }
                Ok(())
            }
        }
    }
}

/// Why an evaluated channel id was refused
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdRejection {
    /// Longer than `max_channel_id_length`
    TooLong,
    /// Contains the reserved separator byte
    ReservedByte,
    /// Splitting produced more components than a tag vector can address
    TooManyParts,
}

/// Validate one evaluated id value (pre-split) against configuration
pub fn validate_id(id: &str, max_len: usize) -> Result<(), IdRejection> {
    if id.len() > max_len {
        return Err(IdRejection::TooLong);
    }
    if id.contains(MULTI_SEP_CHR) {
        return Err(IdRejection::ReservedByte);
    }
    Ok(())
}

/// Evaluate ordered id values into a channel id: validate each, optionally
/// split on the configured delimiter, qualify with the group prefix.
pub fn resolve_channel_id(
    values: &[String],
    group: &str,
    max_len: usize,
    split_delimiter: Option<&str>,
) -> Result<ChannelId, IdRejection> {
    let mut ids: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        validate_id(value, max_len)?;
        match split_delimiter {
            Some(delim) if !delim.is_empty() => {
                ids.extend(value.split(delim).map(str::to_owned));
            }
            _ => ids.push(value.clone()),
        }
        if ids.len() > MULTITAG_LIMIT {
            return Err(IdRejection::TooManyParts);
        }
    }
    Ok(ChannelId::from_parts(group, &ids))
}
