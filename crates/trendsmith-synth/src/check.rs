//! Static allow-list check for candidate Lua.
//!
//! Conservative by construction: every free name and every member of a
//! sandbox library must be recognized by [`allowlist::access`], anything else
//! is a rejection reason. Bindings (locals, parameters, loop variables and the
//! candidate's own globals) are collected for the whole chunk, so a name
//! bound anywhere counts as bound everywhere; names the sandbox controls can
//! never be rebound.

use std::collections::{BTreeSet, HashSet};

use trendsmith_config::SandboxPolicy;
use trendsmith_sandbox::allowlist::{self, Access};

/// Largest candidate accepted.
pub const MAX_SOURCE_BYTES: usize = 64 * 1024;

/// Members refused on any value, since strings share the `string` table.
const FORBIDDEN_MEMBERS: &[&str] = &["dump"];

const KEYWORDS: &[&str] = &[
  "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
  "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

#[derive(Debug, Clone, PartialEq)]
enum Token {
  Name(String),
  Punct(&'static str),
  Literal,
}

impl Token {
  fn is_punct(&self, p: &str) -> bool {
    matches!(self, Token::Punct(q) if *q == p)
  }

  fn name(&self) -> Option<&str> {
    match self {
      Token::Name(n) if !KEYWORDS.contains(&n.as_str()) => Some(n),
      _ => None,
    }
  }

  fn is_keyword(&self, kw: &str) -> bool {
    matches!(self, Token::Name(n) if n == kw)
  }
}

/// Check `source` against the allow-list for `policy`.
///
/// Returns every distinct reason for rejection, in order of appearance.
pub fn check(source: &str, policy: &SandboxPolicy) -> Result<(), Vec<String>> {
  if source.trim().is_empty() {
    return Err(vec!["candidate is empty".to_string()]);
  }
  if source.len() > MAX_SOURCE_BYTES {
    return Err(vec![format!(
      "candidate is larger than {} bytes",
      MAX_SOURCE_BYTES
    )]);
  }

  let tokens = tokenize(source).map_err(|e| vec![e])?;
  let mut reasons = Reasons::default();
  let bound = collect_bindings(&tokens, &mut reasons);

  let keys = table_keys(&tokens);
  for (i, token) in tokens.iter().enumerate() {
    let Some(name) = token.name() else {
      continue;
    };
    let prev = i.checked_sub(1).map(|p| &tokens[p]);

    // Member names: `x.name`, `x:name`
    if prev.is_some_and(|p| p.is_punct(".") || p.is_punct(":")) {
      if FORBIDDEN_MEMBERS.contains(&name) {
        reasons.push(format!("`{}` is not permitted", name));
      }
      continue;
    }
    // Labels and goto targets
    if prev.is_some_and(|p| p.is_punct("::") || p.is_keyword("goto")) {
      continue;
    }
    if keys.contains(&i) || bound.contains(name) {
      continue;
    }

    if allowlist::is_library(name) {
      match (tokens.get(i + 1), tokens.get(i + 2)) {
        (Some(sep), Some(member)) if sep.is_punct(".") || sep.is_punct(":") => {
          if let Some(member) = member.name() {
            let path = format!("{}.{}", name, member);
            if let Some(reason) = describe(&path, allowlist::access(&path, policy)) {
              reasons.push(reason);
            }
          } else {
            reasons.push(format!("malformed access to `{}`", name));
          }
        }
        _ => {
          // A bare library reference could be aliased and indexed dynamically.
          let access = allowlist::access(name, policy);
          match describe(name, access) {
            Some(reason) => reasons.push(reason),
            None => reasons.push(format!(
              "`{}` may only be used as `{}.member`",
              name, name
            )),
          }
        }
      }
      continue;
    }

    if let Some(reason) = describe(name, allowlist::access(name, policy)) {
      reasons.push(reason);
    }
  }

  reasons.finish()
}

#[derive(Default)]
struct Reasons {
  seen: HashSet<String>,
  ordered: Vec<String>,
}

impl Reasons {
  fn push(&mut self, reason: String) {
    if self.seen.insert(reason.clone()) {
      self.ordered.push(reason);
    }
  }

  fn finish(self) -> Result<(), Vec<String>> {
    if self.ordered.is_empty() {
      Ok(())
    } else {
      Err(self.ordered)
    }
  }
}

fn describe(name: &str, access: Access) -> Option<String> {
  match access {
    Access::Allowed => None,
    Access::Ungranted(capability) => Some(format!(
      "`{}` requires the {} capability",
      name,
      capability.as_str()
    )),
    Access::Forbidden => Some(format!("`{}` is not permitted", name)),
    Access::Unknown => Some(format!("unknown name `{}`", name)),
  }
}

/// Names the candidate binds itself. Rebinding a sandbox name is a reason.
fn collect_bindings(tokens: &[Token], reasons: &mut Reasons) -> BTreeSet<String> {
  let mut bound = BTreeSet::new();
  let keys = table_keys(tokens);

  let mut bind = |name: &str, bound: &mut BTreeSet<String>, reasons: &mut Reasons| {
    if is_sandbox_name(name) {
      reasons.push(format!("`{}` may not be redefined", name));
    } else {
      bound.insert(name.to_string());
    }
  };

  let mut i = 0;
  while i < tokens.len() {
    let token = &tokens[i];

    if token.is_keyword("local") {
      if tokens.get(i + 1).is_some_and(|t| t.is_keyword("function")) {
        if let Some(name) = tokens.get(i + 2).and_then(Token::name) {
          bind(name, &mut bound, reasons);
        }
      } else {
        // local a <const>, b = ...
        let mut j = i + 1;
        while let Some(name) = tokens.get(j).and_then(Token::name) {
          bind(name, &mut bound, reasons);
          j += 1;
          if tokens.get(j).is_some_and(|t| t.is_punct("<")) {
            j += 3;
          }
          if tokens.get(j).is_some_and(|t| t.is_punct(",")) {
            j += 1;
          } else {
            break;
          }
        }
      }
    } else if token.is_keyword("function") {
      // function name.field:method(params)
      let mut j = i + 1;
      let mut method = false;
      if let Some(first) = tokens.get(j).and_then(Token::name) {
        let simple = !tokens
          .get(j + 1)
          .is_some_and(|t| t.is_punct(".") || t.is_punct(":"));
        let local_fn = i > 0 && tokens[i - 1].is_keyword("local");
        if simple && !local_fn {
          bind(first, &mut bound, reasons);
        }
        j += 1;
        while tokens.get(j).is_some_and(|t| t.is_punct(".") || t.is_punct(":")) {
          method |= tokens[j].is_punct(":");
          j += 2;
        }
      }
      if method {
        bound.insert("self".to_string());
      }
      if tokens.get(j).is_some_and(|t| t.is_punct("(")) {
        j += 1;
        while let Some(t) = tokens.get(j) {
          if t.is_punct(")") {
            break;
          }
          if let Some(name) = t.name() {
            bind(name, &mut bound, reasons);
          }
          j += 1;
        }
      }
    } else if token.is_keyword("for") {
      let mut j = i + 1;
      while let Some(t) = tokens.get(j) {
        if t.is_punct("=") || t.is_keyword("in") {
          break;
        }
        if let Some(name) = t.name() {
          bind(name, &mut bound, reasons);
        }
        j += 1;
      }
    } else if let Some(name) = token.name() {
      // Global assignment: `name = ...` at statement level
      let assigned = tokens.get(i + 1).is_some_and(|t| t.is_punct("="));
      let member = i > 0 && (tokens[i - 1].is_punct(".") || tokens[i - 1].is_punct(":"));
      if assigned && !member && !keys.contains(&i) {
        bind(name, &mut bound, reasons);
      }
    }

    i += 1;
  }

  bound
}

/// Excludes `doc`, which `function extract(doc)` rebinds.
fn is_sandbox_name(name: &str) -> bool {
  allowlist::FORBIDDEN.contains(&name)
    || allowlist::BASE_FUNCTIONS.contains(&name)
    || allowlist::is_library(name)
    || allowlist::GATED.iter().any(|(gated, _)| *gated == name)
}

/// Token positions that are table constructor keys (`{ key = value }`).
fn table_keys(tokens: &[Token]) -> HashSet<usize> {
  #[derive(PartialEq)]
  enum Frame {
    Brace,
    Other,
  }

  let mut keys = HashSet::new();
  let mut stack: Vec<Frame> = Vec::new();

  for (i, token) in tokens.iter().enumerate() {
    match token {
      Token::Punct("{") => stack.push(Frame::Brace),
      Token::Punct("(") | Token::Punct("[") => stack.push(Frame::Other),
      Token::Punct("}") | Token::Punct(")") | Token::Punct("]") => {
        stack.pop();
      }
      Token::Name(n) if n == "function" || n == "do" || n == "if" || n == "repeat" => {
        stack.push(Frame::Other);
      }
      Token::Name(n) if n == "end" || n == "until" => {
        stack.pop();
      }
      Token::Name(_) => {
        let in_brace = stack.last() == Some(&Frame::Brace);
        let after_separator = i > 0
          && (tokens[i - 1].is_punct("{")
            || tokens[i - 1].is_punct(",")
            || tokens[i - 1].is_punct(";"));
        let before_assign = tokens.get(i + 1).is_some_and(|t| t.is_punct("="));
        if in_brace && after_separator && before_assign {
          keys.insert(i);
        }
      }
      _ => {}
    }
  }
  keys
}

const PUNCTUATION: &[&str] = &[
  "...", "..", "::", "==", "~=", "<=", ">=", "<<", ">>", "//", "+", "-", "*", "/", "%", "^", "#",
  "&", "~", "|", "<", ">", "=", "(", ")", "{", "}", "[", "]", ";", ":", ",", ".",
];

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
  let bytes = source.as_bytes();
  let mut tokens = Vec::new();
  let mut i = 0;

  while i < bytes.len() {
    let c = bytes[i];

    if c.is_ascii_whitespace() {
      i += 1;
      continue;
    }

    // Comments
    if source[i..].starts_with("--") {
      i += 2;
      if let Some(level) = long_bracket_level(&bytes[i..]) {
        i = skip_long_bracket(source, i, level).ok_or("unterminated comment")?;
      } else {
        while i < bytes.len() && bytes[i] != b'\n' {
          i += 1;
        }
      }
      continue;
    }

    // Long strings
    if c == b'[' {
      if let Some(level) = long_bracket_level(&bytes[i..]) {
        i = skip_long_bracket(source, i, level).ok_or("unterminated long string")?;
        tokens.push(Token::Literal);
        continue;
      }
    }

    // Quoted strings
    if c == b'"' || c == b'\'' {
      i += 1;
      loop {
        match bytes.get(i) {
          None | Some(b'\n') => return Err("unterminated string".to_string()),
          Some(b'\\') => i += 2,
          Some(q) if *q == c => {
            i += 1;
            break;
          }
          Some(_) => i += 1,
        }
      }
      tokens.push(Token::Literal);
      continue;
    }

    // Numbers
    if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
      while i < bytes.len() {
        let d = bytes[i];
        let exponent_sign = (d == b'+' || d == b'-')
          && i > 0
          && matches!(bytes[i - 1], b'e' | b'E' | b'p' | b'P');
        if d.is_ascii_alphanumeric() || d == b'.' || exponent_sign {
          i += 1;
        } else {
          break;
        }
      }
      tokens.push(Token::Literal);
      continue;
    }

    // Names
    if c.is_ascii_alphabetic() || c == b'_' {
      let start = i;
      while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
      }
      tokens.push(Token::Name(source[start..i].to_string()));
      continue;
    }

    match PUNCTUATION.iter().find(|p| source[i..].starts_with(**p)) {
      Some(p) => {
        tokens.push(Token::Punct(p));
        i += p.len();
      }
      None => {
        let ch = source[i..].chars().next().unwrap_or('?');
        return Err(format!("unexpected character '{}'", ch));
      }
    }
  }

  Ok(tokens)
}

/// `[[`, `[=[`, `[==[` ... returns the number of `=` signs.
fn long_bracket_level(bytes: &[u8]) -> Option<usize> {
  if bytes.first() != Some(&b'[') {
    return None;
  }
  let level = bytes[1..].iter().take_while(|b| **b == b'=').count();
  (bytes.get(level + 1) == Some(&b'[')).then_some(level)
}

/// Position just past the closing bracket of a long bracket opened at `start`.
fn skip_long_bracket(source: &str, start: usize, level: usize) -> Option<usize> {
  let close = format!("]{}]", "=".repeat(level));
  let body = start + level + 2;
  source[body..].find(&close).map(|end| body + end + close.len())
}
