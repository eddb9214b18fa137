#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{fmt::Display, path::Path, str::FromStr};

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Programming languages a submission may be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Language {
    /// C, built with a C compiler.
    C,
    /// C++, built with a C++ compiler.
    Cpp,
    /// Java, built with `javac` and run on the JVM.
    Java,
    /// C#, built to a CLI assembly and run on a managed runtime.
    CSharp,
    /// Python 3, interpreted.
    Python,
    /// JavaScript, run with Node.js.
    JavaScript,
    /// Go, built and run by `go run`.
    Go,
}

impl Language {
    /// Every supported language, in the order extensions are searched.
    pub const ALL: [Language; 7] = [
        Language::Python,
        Language::Java,
        Language::C,
        Language::Cpp,
        Language::CSharp,
        Language::JavaScript,
        Language::Go,
    ];

    /// Canonical file extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::CSharp => "cs",
            Language::Python => "py",
            Language::JavaScript => "js",
            Language::Go => "go",
        }
    }

    /// Every extension recognised for this language, canonical first.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::Cpp => &["cpp", "cc", "cxx"],
            Language::C => &["c"],
            Language::Java => &["java"],
            Language::CSharp => &["cs"],
            Language::Python => &["py"],
            Language::JavaScript => &["js"],
            Language::Go => &["go"],
        }
    }

    /// Display name, e.g. `C++`.
    pub fn name(&self) -> &'static str {
        match self {
            Language::C => "C",
            Language::Cpp => "C++",
            Language::Java => "Java",
            Language::CSharp => "C#",
            Language::Python => "Python",
            Language::JavaScript => "JavaScript",
            Language::Go => "Go",
        }
    }

    /// Looks a language up by file extension, ignoring case and a leading dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|lang| lang.extensions().contains(&ext.as_str()))
    }
}

impl Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lang = match s.trim().to_ascii_lowercase().as_str() {
            "c" => Language::C,
            "cpp" | "c++" | "cxx" | "cc" => Language::Cpp,
            "java" => Language::Java,
            "csharp" | "c#" | "cs" => Language::CSharp,
            "python" | "py" | "python3" => Language::Python,
            "javascript" | "js" | "node" => Language::JavaScript,
            "go" | "golang" => Language::Go,
            other => bail!("Unsupported language: {other}"),
        };
        Ok(lang)
    }
}

/// Detects a source file's language from its extension.
pub fn detect_language(path: &Path) -> Option<Language> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(Language::from_extension)
}
