//! The surface candidates may touch.
//!
//! The static checker in the synthesizer and the VM environment are both built
//! from these tables, so a name is either usable in both places or neither.

use trendsmith_config::{Capability, SandboxPolicy};

/// Base functions available to every candidate.
pub const BASE_FUNCTIONS: &[&str] = &[
  "assert",
  "error",
  "ipairs",
  "next",
  "pairs",
  "pcall",
  "rawequal",
  "rawget",
  "rawlen",
  "select",
  "setmetatable",
  "tonumber",
  "tostring",
  "type",
  "xpcall",
];

/// Library tables and the members each one exposes unconditionally.
pub const LIBRARIES: &[(&str, &[&str])] = &[
  (
    "string",
    &[
      "byte", "char", "find", "format", "gmatch", "gsub", "len", "lower", "match", "rep",
      "reverse", "sub", "upper",
    ],
  ),
  (
    "table",
    &["concat", "insert", "move", "pack", "remove", "sort", "unpack"],
  ),
  (
    "math",
    &[
      "abs",
      "ceil",
      "exp",
      "floor",
      "fmod",
      "huge",
      "log",
      "max",
      "maxinteger",
      "min",
      "mininteger",
      "modf",
      "pi",
      "sqrt",
      "tointeger",
      "type",
      "ult",
    ],
  ),
  (
    "utf8",
    &["char", "charpattern", "codepoint", "codes", "len", "offset"],
  ),
];

/// Globals the executor defines for the candidate.
pub const PROVIDED_GLOBALS: &[&str] = &["doc"];

/// Names that exist only when a capability is granted.
pub const GATED: &[(&str, Capability)] = &[
  ("print", Capability::Stdout),
  ("http.get", Capability::NetworkRead),
  ("math.random", Capability::Random),
  ("math.randomseed", Capability::Random),
];

/// Names that are always refused, whatever the policy says.
pub const FORBIDDEN: &[&str] = &[
  "_ENV",
  "_G",
  "collectgarbage",
  "coroutine",
  "debug",
  "dofile",
  // Reaches the string metatable, which would alias the `string` table.
  "getmetatable",
  "io",
  "load",
  "loadfile",
  "loadstring",
  "os",
  "package",
  "require",
  "string.dump",
  "warn",
];

/// Outcome of looking a name up against a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
  Allowed,
  /// Known name whose capability is not granted.
  Ungranted(Capability),
  Forbidden,
  Unknown,
}

/// Classify a global name or a `lib.member` path.
pub fn access(name: &str, policy: &SandboxPolicy) -> Access {
  if FORBIDDEN.contains(&name) {
    return Access::Forbidden;
  }

  if let Some((_, capability)) = GATED.iter().find(|(gated, _)| *gated == name) {
    return if policy.allows(*capability) {
      Access::Allowed
    } else {
      Access::Ungranted(*capability)
    };
  }

  match name.split_once('.') {
    None => {
      if BASE_FUNCTIONS.contains(&name)
        || PROVIDED_GLOBALS.contains(&name)
        || LIBRARIES.iter().any(|(lib, _)| *lib == name)
      {
        Access::Allowed
      } else if name == "http" {
        // The table itself; individual members are checked separately.
        if policy.allows(Capability::NetworkRead) {
          Access::Allowed
        } else {
          Access::Ungranted(Capability::NetworkRead)
        }
      } else {
        Access::Unknown
      }
    }
    Some((lib, member)) => match LIBRARIES.iter().find(|(l, _)| *l == lib) {
      Some((_, members)) if members.contains(&member) => Access::Allowed,
      _ => Access::Unknown,
    },
  }
}

/// Whether `name` is a library table whose members are checked individually.
pub fn is_library(name: &str) -> bool {
  name == "http" || LIBRARIES.iter().any(|(lib, _)| *lib == name)
}
