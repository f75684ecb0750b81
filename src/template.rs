//! Content-derived identifiers for parameterized templates.
//!
//! A [`Template`] is an immutable code image containing named fixed-width
//! placeholders.  [`Template::specialize`] substitutes some of them and
//! returns a new template, which can be specialized again with the remaining
//! parameters; the identifier of any stage is the RIPEMD-160 of its code.
//! This is how a booth's address is known before the booth exists: shared
//! deployment parameters are bound once, then each motion binds its own index
//! and direction flag.

use crate::address::Address;
use crate::error::{BallotError, Result};
use blake2::digest::{consts::U32, Digest as _};
use blake2::Blake2b;
use std::collections::BTreeMap;
use tracing::debug;

/// Ordered parameter substitutions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, Vec<u8>)>,
}

impl Params {
    /// Empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to raw bytes.
    pub fn bytes(mut self, name: &str, value: impl Into<Vec<u8>>) -> Self {
        self.entries.push((name.to_string(), value.into()));
        self
    }

    /// Binds `name` to an address.
    pub fn address(self, name: &str, value: &Address) -> Self {
        self.bytes(name, value.as_bytes().to_vec())
    }

    /// Binds `name` to the low `width` bytes of `value`, big-endian.
    pub fn uint(self, name: &str, width: usize, value: u64) -> Result<Self> {
        let full = value.to_be_bytes();
        if width < full.len() && value >> (8 * width) != 0 {
            return Err(BallotError::Template(format!(
                "{name}={value} does not fit in {width} bytes"
            )));
        }
        let mut out = vec![0u8; width.saturating_sub(full.len())];
        out.extend_from_slice(&full[full.len().saturating_sub(width)..]);
        Ok(self.bytes(name, out))
    }

    /// Binds `name` to hex text, with or without `0x`.
    pub fn hex(self, name: &str, value: &str) -> Result<Self> {
        let body = value.trim().trim_start_matches("0x");
        let bytes = hex::decode(body)
            .map_err(|err| BallotError::Template(format!("{name}: invalid hex: {err}")))?;
        Ok(self.bytes(name, bytes))
    }

    /// Substitutions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_slice()))
    }
}

/// Immutable code image with named placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    code: Vec<u8>,
    placeholders: BTreeMap<String, Vec<u8>>,
}

impl Template {
    /// Wraps `code` and the byte patterns its placeholders occupy.
    pub fn new(code: Vec<u8>, placeholders: BTreeMap<String, Vec<u8>>) -> Result<Self> {
        for (name, pattern) in &placeholders {
            if pattern.is_empty() {
                return Err(BallotError::Template(format!("placeholder {name} is empty")));
            }
        }
        Ok(Self { code, placeholders })
    }

    /// Builds a template from hex code and hex placeholder patterns.
    pub fn from_hex<'a, I>(code: &str, placeholders: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let decode = |text: &str| {
            hex::decode(text.trim().trim_start_matches("0x"))
                .map_err(|err| BallotError::Template(format!("invalid hex: {err}")))
        };
        let code = decode(code)?;
        let placeholders = placeholders
            .into_iter()
            .map(|(name, pattern)| -> Result<(String, Vec<u8>)> {
                Ok((name.to_string(), decode(pattern)?))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        Self::new(code, placeholders)
    }

    /// Synthesizes a template whose code is `tag` followed by one placeholder
    /// per `(name, width)` slot.
    ///
    /// Placeholder patterns are derived from the slot name so they are
    /// distinct and reproducible.
    pub fn descriptor(tag: &[u8], slots: &[(&str, usize)]) -> Result<Self> {
        let mut code = tag.to_vec();
        let mut placeholders = BTreeMap::new();
        for (name, width) in slots {
            let pattern = placeholder_pattern(tag, name, *width);
            code.extend_from_slice(&pattern);
            if placeholders.insert(name.to_string(), pattern).is_some() {
                return Err(BallotError::Template(format!("duplicate slot {name}")));
            }
        }
        Self::new(code, placeholders)
    }

    /// Current code image.
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Placeholder names known to this template.
    pub fn placeholder_names(&self) -> impl Iterator<Item = &str> {
        self.placeholders.keys().map(String::as_str)
    }

    /// Returns a new template with every occurrence of each named placeholder
    /// replaced by its value.
    ///
    /// Values must match the placeholder width.  A placeholder that no longer
    /// occurs (already bound by an earlier pass) is left alone.
    pub fn specialize(&self, params: &Params) -> Result<Self> {
        let mut code = self.code.clone();
        for (name, value) in params.iter() {
            let pattern = self
                .placeholders
                .get(name)
                .ok_or_else(|| BallotError::Template(format!("unknown placeholder {name}")))?;
            if pattern.len() != value.len() {
                return Err(BallotError::Template(format!(
                    "{name} expects {} bytes, got {}",
                    pattern.len(),
                    value.len()
                )));
            }
            let replaced = replace_all(&mut code, pattern, value);
            if replaced == 0 {
                debug!(component = "TEMPLATE", evt = "UNBOUND", placeholder = name);
            }
        }
        Ok(Self {
            code,
            placeholders: self.placeholders.clone(),
        })
    }

    /// Content-derived identifier of this stage.
    pub fn address(&self) -> Address {
        Address::ripemd160(&self.code)
    }
}

/// Identifier of `template` specialized with `params`.
pub fn derive_identifier(template: &Template, params: &Params) -> Result<Address> {
    Ok(template.specialize(params)?.address())
}

fn placeholder_pattern(tag: &[u8], name: &str, width: usize) -> Vec<u8> {
    let mut pattern = Vec::with_capacity(width);
    let mut counter = 0u32;
    while pattern.len() < width {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(tag);
        hasher.update(name.as_bytes());
        hasher.update(counter.to_be_bytes());
        pattern.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    pattern.truncate(width);
    pattern
}

fn replace_all(code: &mut [u8], pattern: &[u8], value: &[u8]) -> usize {
    let mut count = 0;
    let mut start = 0;
    while start + pattern.len() <= code.len() {
        if &code[start..start + pattern.len()] == pattern {
            code[start..start + pattern.len()].copy_from_slice(value);
            count += 1;
            start += pattern.len();
        } else {
            start += 1;
        }
    }
    count
}
