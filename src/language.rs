use std::path::Path;

/// Languages the core knows how to detect from a file extension.
///
/// Detection is broader than compilation: JavaScript and TypeScript are
/// recognized so callers can surface a clean "unsupported" diagnostic
/// instead of a spawn failure later on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Language {
    C,
    Cpp,
    Python,
    Java,
    JavaScript,
    TypeScript,
}

impl Language {
    /// Detect a language from a file path's extension. Unknown or missing
    /// extensions yield `None`, never an error.
    pub fn detect(path: impl AsRef<Path>) -> Option<Language> {
        let ext = path.as_ref().extension()?.to_str()?;
        match ext.to_ascii_lowercase().as_str() {
            "cpp" | "cc" | "cxx" => Some(Language::Cpp),
            "c" => Some(Language::C),
            "py" => Some(Language::Python),
            "java" => Some(Language::Java),
            "js" => Some(Language::JavaScript),
            "ts" => Some(Language::TypeScript),
            _ => None,
        }
    }

    /// Whether the core can actually compile and run this language.
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            Language::C | Language::Cpp | Language::Python | Language::Java
        )
    }

    /// All languages with a working compiler implementation.
    pub fn supported() -> &'static [Language] {
        &[Language::Cpp, Language::C, Language::Python, Language::Java]
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Python => "python",
            Language::Java => "java",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}
