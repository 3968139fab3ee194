// SPDX-License-Identifier: MIT

//! Parsing of dcd-client responses.
//!
//! The wire format is line oriented: a completion response starts with a
//! discriminator line (`identifiers` or `calltips`) followed by one entry
//! per line, and a symbol-location response is a single `path\tbyteOffset`
//! line. Parsing is tolerant: lines that do not match the expected shape
//! are dropped without failing the surrounding response.

use std::path::PathBuf;

pub(crate) const IDENTIFIERS_HEADER: &str = "identifiers";
pub(crate) const CALLTIPS_HEADER: &str = "calltips";

/// Sentinel path the server reports when a symbol lives in the buffer
/// that was sent on stdin rather than in a file on disk.
pub(crate) const STDIN_SENTINEL: &str = "stdin";

// ─── Symbol kinds ─────────────────────────────────────────────────────────────

/// Completion kind, decoded from the one-character code in an
/// `identifiers` response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Class,
    Interface,
    Struct,
    Union,
    Variable,
    MemberVariable,
    Keyword,
    Function,
    Enum,
    EnumMember,
    Package,
    Module,
    Array,
    AssociativeArray,
    Alias,
    Template,
    MixinTemplate,
    /// Code not in the published table. Kept rather than dropped so new
    /// server versions degrade gracefully.
    Unknown,
}

impl SymbolKind {
    pub fn from_code(code: &str) -> Self {
        match code {
            "c" => SymbolKind::Class,
            "i" => SymbolKind::Interface,
            "s" => SymbolKind::Struct,
            "u" => SymbolKind::Union,
            "v" => SymbolKind::Variable,
            "m" => SymbolKind::MemberVariable,
            "k" => SymbolKind::Keyword,
            "f" => SymbolKind::Function,
            "g" => SymbolKind::Enum,
            "e" => SymbolKind::EnumMember,
            "P" => SymbolKind::Package,
            "M" => SymbolKind::Module,
            "a" => SymbolKind::Array,
            "A" => SymbolKind::AssociativeArray,
            "l" => SymbolKind::Alias,
            "t" => SymbolKind::Template,
            "T" => SymbolKind::MixinTemplate,
            _ => SymbolKind::Unknown,
        }
    }

    /// Human-readable label for completion lists.
    pub fn label(self) -> &'static str {
        match self {
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Struct => "struct",
            SymbolKind::Union => "union",
            SymbolKind::Variable => "variable",
            SymbolKind::MemberVariable => "member variable",
            SymbolKind::Keyword => "keyword",
            SymbolKind::Function => "function",
            SymbolKind::Enum => "enum",
            SymbolKind::EnumMember => "enum member",
            SymbolKind::Package => "package",
            SymbolKind::Module => "module",
            SymbolKind::Array => "array",
            SymbolKind::AssociativeArray => "associative array",
            SymbolKind::Alias => "alias",
            SymbolKind::Template => "template",
            SymbolKind::MixinTemplate => "mixin template",
            SymbolKind::Unknown => "",
        }
    }
}

// ─── Completions ──────────────────────────────────────────────────────────────

/// One identifier completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEntry {
    pub text: String,
    pub kind: SymbolKind,
}

/// A parsed completion response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionResult {
    /// No response, or a response with an unrecognized discriminator.
    Empty,
    /// Identifier completions at a member-access or prefix position.
    Identifiers(Vec<CompletionEntry>),
    /// Call tips for a function call position, one signature per entry.
    CallTips(Vec<String>),
}

/// Parse a raw completion response.
///
/// The first line discriminates the response shape. Identifier lines are
/// `text\tkindCode`; anything with a different field count is dropped.
pub fn parse_completions(raw: &str) -> CompletionResult {
    let mut lines = raw.lines();
    match lines.next() {
        Some(IDENTIFIERS_HEADER) => {
            let entries = lines.filter_map(parse_identifier_line).collect();
            CompletionResult::Identifiers(entries)
        }
        Some(CALLTIPS_HEADER) => {
            let tips = lines
                .filter(|l| !l.is_empty())
                .map(str::to_owned)
                .collect();
            CompletionResult::CallTips(tips)
        }
        _ => CompletionResult::Empty,
    }
}

fn parse_identifier_line(line: &str) -> Option<CompletionEntry> {
    let mut fields = line.split('\t');
    let text = fields.next()?;
    let code = fields.next()?;
    if text.is_empty() || fields.next().is_some() {
        return None;
    }
    Some(CompletionEntry {
        text: text.to_owned(),
        kind: SymbolKind::from_code(code),
    })
}

// ─── Symbol location ──────────────────────────────────────────────────────────

/// Where a symbol's declaration lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolLocation {
    /// The server could not resolve the symbol.
    NotFound,
    /// Declared inside the buffer that was sent with the query.
    Buffer { byte_offset: usize },
    /// Declared in a file on disk.
    File { path: PathBuf, byte_offset: usize },
}

/// Parse a symbol-location response (`path\tbyteOffset`).
///
/// An empty response, a literal `Not found`, or any line that does not
/// split into a path and a numeric offset maps to [`SymbolLocation::NotFound`].
pub fn parse_symbol_location(raw: &str) -> SymbolLocation {
    let line = match raw.lines().next() {
        Some(line) => line,
        None => return SymbolLocation::NotFound,
    };
    if line.is_empty() || line == "Not found" {
        return SymbolLocation::NotFound;
    }

    let mut fields = line.split('\t');
    let path = match fields.next() {
        Some(path) if !path.is_empty() => path,
        _ => return SymbolLocation::NotFound,
    };
    let byte_offset = match fields.next().and_then(|f| f.parse::<usize>().ok()) {
        Some(offset) => offset,
        None => return SymbolLocation::NotFound,
    };
    if fields.next().is_some() {
        return SymbolLocation::NotFound;
    }

    if path == STDIN_SENTINEL {
        SymbolLocation::Buffer { byte_offset }
    } else {
        SymbolLocation::File {
            path: PathBuf::from(path),
            byte_offset,
        }
    }
}
