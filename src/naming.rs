//! Qualified names for compiled units
//!
//! Human-readable script, record type and expression names are mapped onto a
//! hierarchical namespace:
//!
//! ```text
//! Billing::Monthly Run      -> script.billing.monthly_x20_run.Monthly_x20_Run
//! Contract                  -> record.default_group.Contract
//! "Var1 - Var2" in a script -> script.default_group.calc.Calc$$Var1_Mns_Var2
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Separator between group levels in human-readable names
pub const GROUP_SEPARATOR: &str = "::";

const DEFAULT_GROUP: &str = "default_group";
const SCRIPT_ROOT: &str = "script";
const RECORD_ROOT: &str = "record";
const DISCRIMINATOR_SEPARATOR: &str = "$$";

/// Fixed replacements for symbols that may appear in names and expressions
const SYMBOL_TOKENS: &[(&str, &str)] = &[
    ("&&", "_And_"),
    ("||", "_Or_"),
    ("-", "_Mns_"),
    ("+", "_Pls_"),
    ("*", "_Mlt_"),
    ("/", "_Div_"),
    (".", "_dt_"),
    ("[", "_Lb_"),
    ("]", "_Rb_"),
];

/// What kind of unit a qualified name addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Script,
    Expression,
    RecordType,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::Script => write!(f, "script"),
            UnitKind::Expression => write!(f, "expression"),
            UnitKind::RecordType => write!(f, "record type"),
        }
    }
}

/* ===================== Qualified Name ===================== */

/// Hierarchical identifier of one compiled unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct QualifiedName {
    segments: Vec<String>,
    discriminator: Option<String>,
}

impl QualifiedName {
    /// Qualified name of a script. Every script gets a package of its own.
    pub fn script(name: &str) -> Self {
        let (group, simple) = split_group(name.trim());
        let simple = sanitize_name(simple);

        let mut segments = vec![SCRIPT_ROOT.to_string()];
        segments.extend(group_segments(group));
        segments.push(simple.to_lowercase());
        segments.push(simple);

        Self {
            segments,
            discriminator: None,
        }
    }

    /// Qualified name of a record type
    pub fn record(name: &str) -> Self {
        let (group, simple) = split_group(name.trim());

        let mut segments = vec![RECORD_ROOT.to_string()];
        segments.extend(group_segments(group));
        segments.push(sanitize_name(simple));

        Self {
            segments,
            discriminator: None,
        }
    }

    /// Name of an expression unit owned by this script
    pub fn expression(&self, discriminator: impl Into<String>) -> Self {
        Self {
            segments: self.segments.clone(),
            discriminator: Some(discriminator.into()),
        }
    }

    /// Parse the rendered form produced by `Display`
    pub fn parse(text: &str) -> Option<Self> {
        let (path, discriminator) = match text.split_once(DISCRIMINATOR_SEPARATOR) {
            Some((path, discriminator)) if !discriminator.is_empty() => {
                (path, Some(discriminator.to_string()))
            }
            Some(_) => return None,
            None => (text, None),
        };

        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.len() < 2 || segments.iter().any(String::is_empty) {
            return None;
        }
        if segments[0] != SCRIPT_ROOT && segments[0] != RECORD_ROOT {
            return None;
        }

        Some(Self {
            segments,
            discriminator,
        })
    }

    pub fn kind(&self) -> UnitKind {
        if self.discriminator.is_some() {
            UnitKind::Expression
        } else if self.segments.first().map(String::as_str) == Some(RECORD_ROOT) {
            UnitKind::RecordType
        } else {
            UnitKind::Script
        }
    }

    /// No empty segment or discriminator, so the rendered form parses back.
    /// Blank names and empty group levels (`Billing::`, `A::::B`) are not.
    pub fn is_well_formed(&self) -> bool {
        self.segments.iter().all(|segment| !segment.is_empty())
            && self.discriminator.as_ref().map_or(true, |d| !d.is_empty())
    }

    /// Sanitized simple name (last path segment)
    pub fn simple_name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    pub fn discriminator(&self) -> Option<&str> {
        self.discriminator.as_deref()
    }

    /// Simple name with the sanitizing transform reversed
    pub fn human_name(&self) -> String {
        desanitize(self.simple_name())
    }

    /// Prefix covering this unit and every expression unit it owns
    pub fn prefix(&self) -> NamePrefix {
        NamePrefix {
            segments: self.segments.clone(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))?;
        if let Some(discriminator) = &self.discriminator {
            write!(f, "{}{}", DISCRIMINATOR_SEPARATOR, discriminator)?;
        }
        Ok(())
    }
}

impl From<QualifiedName> for String {
    fn from(name: QualifiedName) -> Self {
        name.to_string()
    }
}

impl TryFrom<String> for QualifiedName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        QualifiedName::parse(&value).ok_or_else(|| format!("invalid qualified name [{}]", value))
    }
}

/// Path prefix used to delete a unit together with everything it owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePrefix {
    segments: Vec<String>,
}

impl NamePrefix {
    /// Segment-wise match, so `record.default_group.Contract` does not cover `ContractLine`
    pub fn matches(&self, name: &QualifiedName) -> bool {
        name.segments.starts_with(&self.segments)
    }
}

impl fmt::Display for NamePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/* ===================== Expression Discriminators ===================== */

/// Hands out expression discriminators within one script.
///
/// The sanitized expression text is used when it is an identifier not yet
/// taken by a different expression; otherwise the next `$<n>` suffix is used.
#[derive(Debug, Default)]
pub struct DiscriminatorAllocator {
    owners: HashMap<String, String>,
    counter: u32,
}

impl DiscriminatorAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, expression: &str) -> String {
        let candidate = expression_discriminator(expression);
        let taken = self
            .owners
            .get(&candidate)
            .is_some_and(|owner| owner != expression);

        let discriminator = if is_identifier(&candidate) && !taken {
            candidate
        } else {
            self.counter += 1;
            format!("${}", self.counter)
        };

        self.owners
            .insert(discriminator.clone(), expression.to_string());
        discriminator
    }
}

/// Sanitized rendering of expression text: whitespace removed, symbols replaced
pub fn expression_discriminator(expression: &str) -> String {
    let compact: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
    sanitize_name(&compact)
}

/* ===================== Helpers ===================== */

/// Split `Group::Sub::Name` into (`Group::Sub`, `Name`) on the last separator
pub fn split_group(name: &str) -> (Option<&str>, &str) {
    match name.rfind(GROUP_SEPARATOR) {
        Some(index) => (
            Some(&name[..index]),
            &name[index + GROUP_SEPARATOR.len()..],
        ),
        None => (None, name),
    }
}

fn group_segments(group: Option<&str>) -> Vec<String> {
    match group.map(str::trim).filter(|group| !group.is_empty()) {
        None => vec![DEFAULT_GROUP.to_string()],
        Some(group) => group
            .split(GROUP_SEPARATOR)
            .map(|part| sanitize_name(part.trim()).to_lowercase())
            .collect(),
    }
}

/// Map a name onto `[A-Za-z0-9_]`: known symbols get fixed tokens, anything
/// else (blanks included) becomes `_x<hex>_`.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;

    while let Some(c) = rest.chars().next() {
        if let Some((symbol, token)) = SYMBOL_TOKENS
            .iter()
            .find(|(symbol, _)| rest.starts_with(symbol))
        {
            out.push_str(token);
            rest = &rest[symbol.len()..];
            continue;
        }

        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push_str(&format!("_x{:02x}_", c as u32));
        }
        rest = &rest[c.len_utf8()..];
    }

    out
}

fn desanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;

    'scan: while let Some(c) = rest.chars().next() {
        if c == '_' {
            if let Some((symbol, token)) = SYMBOL_TOKENS
                .iter()
                .find(|(_, token)| rest.starts_with(token))
            {
                out.push_str(symbol);
                rest = &rest[token.len()..];
                continue 'scan;
            }

            if let Some(hex) = rest.strip_prefix("_x") {
                if let Some(end) = hex.find('_') {
                    let decoded = u32::from_str_radix(&hex[..end], 16)
                        .ok()
                        .and_then(char::from_u32);
                    if let Some(decoded) = decoded {
                        out.push(decoded);
                        rest = &hex[end + 1..];
                        continue 'scan;
                    }
                }
            }
        }

        out.push(c);
        rest = &rest[c.len_utf8()..];
    }

    out
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
