//! Code-block language normalization and source-file classification

/// Language used when nothing better is known
pub const PLAIN_TEXT: &str = "plain text";

/// Languages the remote service accepts for code blocks
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "abap", "abc", "agda", "arduino", "ascii art", "assembly", "bash", "basic", "bnf", "c",
    "c#", "c++", "clojure", "coffeescript", "coq", "css", "dart", "dhall", "diff", "docker",
    "ebnf", "elixir", "elm", "erlang", "f#", "flow", "fortran", "gherkin", "glsl", "go",
    "graphql", "groovy", "haskell", "hcl", "html", "idris", "java", "javascript", "json",
    "julia", "kotlin", "latex", "less", "lisp", "livescript", "llvm ir", "lua", "makefile",
    "markdown", "markup", "matlab", "mathematica", "mermaid", "nix", "notion formula",
    "objective-c", "ocaml", "pascal", "perl", "php", "plain text", "powershell", "prolog",
    "protobuf", "purescript", "python", "r", "racket", "reason", "ruby", "rust", "sass",
    "scala", "scheme", "scss", "shell", "smalltalk", "solidity", "sql", "swift", "toml",
    "typescript", "vb.net", "verilog", "vhdl", "visual basic", "webassembly", "xml", "yaml",
    "java/c/c++/c#",
];

/// Extensions pushed as text documents or source files
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "md", "txt", "py", "js", "ts", "html", "css", "json", "yaml", "yml", "xml", "csv", "log",
    "ini", "cfg", "conf", "sh", "bash", "zsh", "sql", "r", "rb", "php", "java", "cpp", "c",
    "h", "hpp", "go", "rs", "swift", "kt", "scala", "clj", "hs", "ml", "fs", "toml",
];

/// Normalize a fence tag into a supported language
///
/// The tag is lower-cased and mapped through the alias table. Anything that is
/// still not a supported language becomes `plain text`.
pub fn normalize_language(tag: &str) -> String {
    let tag = tag.trim().to_lowercase();
    let aliased = match tag.as_str() {
        "" | "txt" | "text" | "plain_text" => PLAIN_TEXT,
        "sh" | "zsh" => "bash",
        "py" => "python",
        "js" => "javascript",
        "ts" => "typescript",
        "yml" => "yaml",
        "md" => "markdown",
        "json5" => "json",
        other => other,
    };

    if SUPPORTED_LANGUAGES.contains(&aliased) {
        aliased.to_string()
    } else {
        PLAIN_TEXT.to_string()
    }
}

/// Language of a source file, `None` for documents that go through the text converter
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    let language = match ext.trim_start_matches('.').to_lowercase().as_str() {
        "py" => "python",
        "js" => "javascript",
        "ts" => "typescript",
        "json" => "json",
        "sh" | "bash" | "zsh" => "bash",
        "yaml" | "yml" => "yaml",
        "html" => "html",
        "css" => "css",
        "java" => "java",
        "cpp" | "hpp" => "c++",
        "c" | "h" => "c",
        "go" => "go",
        "rs" => "rust",
        "rb" => "ruby",
        "php" => "php",
        "sql" => "sql",
        "xml" => "xml",
        "toml" => "toml",
        "swift" => "swift",
        "kt" => "kotlin",
        "scala" => "scala",
        "clj" => "clojure",
        "hs" => "haskell",
        "ml" => "ocaml",
        "fs" => "f#",
        "r" => "r",
        _ => return None,
    };
    Some(language)
}

/// Whether a file with this extension is synced at all
pub fn is_supported_extension(ext: &str) -> bool {
    let ext = ext.trim_start_matches('.').to_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

/// Languages whose chunks must end on a line boundary whenever possible
pub fn is_line_structured(language: &str) -> bool {
    language == "yaml"
}
