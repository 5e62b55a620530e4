//! Workspace scan output parsing
//!
//! The executor's scan tool prints one entry per line in one of three
//! shapes:
//!
//! ```text
//! big.bin  file  2.5 MiB  2025-01-01
//! [FILE] src/main.rs (1.2 KB, 40 lines)
//! src/lib.rs
//! ```
//!
//! Headers, totals and truncation markers are skipped; totals are kept as
//! counts.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One file or directory read from scan output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub path: String,
    pub is_dir: bool,
    pub size_bytes: Option<u64>,
    pub line_count: Option<u64>,
}

/// Size and line count known for a file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub size_bytes: Option<u64>,
    pub size_human: Option<String>,
    pub line_count: Option<u64>,
}

impl FileMetadata {
    pub fn new(size_bytes: Option<u64>, line_count: Option<u64>) -> Self {
        Self {
            size_bytes,
            size_human: size_bytes.map(size_human),
            line_count,
        }
    }
}

/// Everything one scan output yielded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub entries: Vec<ScanEntry>,
    pub total_files: Option<usize>,
    pub total_dirs: Option<usize>,
}

/// Project markers found among scanned files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectMarkers {
    pub project_types: BTreeSet<String>,
    pub frameworks: BTreeSet<String>,
    pub package_managers: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy)]
enum Marker {
    Project(&'static str),
    Framework(&'static str),
    PackageManager(&'static str),
}

/// File name → what it tells us about the project
const MARKER_FILES: &[(&str, &[Marker])] = &[
    ("Cargo.toml", &[Marker::Project("rust"), Marker::PackageManager("cargo")]),
    ("package.json", &[Marker::Project("node"), Marker::PackageManager("npm")]),
    ("package-lock.json", &[Marker::PackageManager("npm")]),
    ("yarn.lock", &[Marker::PackageManager("yarn")]),
    ("pnpm-lock.yaml", &[Marker::PackageManager("pnpm")]),
    ("tsconfig.json", &[Marker::Framework("typescript")]),
    ("next.config.js", &[Marker::Framework("nextjs")]),
    ("angular.json", &[Marker::Framework("angular")]),
    ("vite.config.ts", &[Marker::Framework("vite")]),
    ("vite.config.js", &[Marker::Framework("vite")]),
    ("pyproject.toml", &[Marker::Project("python"), Marker::PackageManager("pip")]),
    ("requirements.txt", &[Marker::Project("python"), Marker::PackageManager("pip")]),
    ("setup.py", &[Marker::Project("python")]),
    ("poetry.lock", &[Marker::PackageManager("poetry")]),
    ("Pipfile", &[Marker::Project("python"), Marker::PackageManager("pipenv")]),
    ("manage.py", &[Marker::Framework("django")]),
    ("go.mod", &[Marker::Project("go"), Marker::PackageManager("go")]),
    ("pom.xml", &[Marker::Project("java"), Marker::PackageManager("maven")]),
    ("build.gradle", &[Marker::Project("java"), Marker::PackageManager("gradle")]),
    ("Gemfile", &[Marker::Project("ruby"), Marker::PackageManager("bundler")]),
    ("composer.json", &[Marker::Project("php"), Marker::PackageManager("composer")]),
    ("Dockerfile", &[Marker::Framework("docker")]),
    ("docker-compose.yml", &[Marker::Framework("docker-compose")]),
];

static TOTAL: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?i)^\s*(total|summary)\b\s*[:\s]").ok());
static TOTAL_FILES: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?i)(\d+)\s+files?\b").ok());
static TOTAL_DIRS: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s+(dirs?|directories|folders?)\b").ok());
static ELLIPSIS: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\.{3}|…)|^\s*(and\s+)?\d+\s+more\b|\(truncated\)").ok()
});
static HEADER: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(name|path)\s+(type|kind)\b|^\s*[-=_\s]{3,}$|:\s*$").ok()
});
static BRACKETED: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*\[(dir|file|d|f)\]\s+(.+?)\s*(?:\(([^)]*)\))?\s*$").ok()
});
static LINES: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?i)(\d+)\s+lines?\b").ok());
static SIZE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d+(?:\.\d+)?)\s*(b|bytes?|k|kb|kib|m|mb|mib|g|gb|gib|t|tb|tib)?$").ok()
});
static BARE_PATH: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[\w.\-~/\\]+$").ok());

fn matches(re: &Lazy<Option<Regex>>, text: &str) -> bool {
    re.as_ref().map(|re| re.is_match(text)).unwrap_or(false)
}

fn capture_number(re: &Lazy<Option<Regex>>, text: &str) -> Option<usize> {
    re.as_ref()?.captures(text)?.get(1)?.as_str().parse().ok()
}

/// Parse a size such as `2.5 MiB`, `12KB` or `512 bytes` into bytes.
///
/// `KB`/`MB`/`GB` are decimal, `KiB`/`MiB`/`GiB` and bare `K`/`M`/`G` are
/// binary.
pub fn parse_size(text: &str) -> Option<u64> {
    let caps = SIZE.as_ref()?.captures(text.trim())?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_lowercase())
        .unwrap_or_default();
    let multiplier: f64 = match unit.as_str() {
        "" | "b" | "byte" | "bytes" => 1.0,
        "kb" => 1e3,
        "mb" => 1e6,
        "gb" => 1e9,
        "tb" => 1e12,
        "k" | "kib" => 1024.0,
        "m" | "mib" => 1024f64.powi(2),
        "g" | "gib" => 1024f64.powi(3),
        "t" | "tib" => 1024f64.powi(4),
        _ => return None,
    };
    Some((value * multiplier).round() as u64)
}

/// Human-readable binary size (`1.5 KiB`).
pub fn size_human(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{:.1} {}", value, unit)
}

/// Normalize a path for comparison: forward slashes, no leading `./`, no
/// trailing separator.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    while let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_string();
    }
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

/// Parse full scan output.
pub fn parse_scan_output(output: &str) -> ScanResult {
    let mut result = ScanResult::default();

    for raw in output.lines() {
        let line = raw.trim_end();
        if line.trim().is_empty() || matches(&ELLIPSIS, line) {
            continue;
        }
        if matches(&TOTAL, line) {
            result.total_files = capture_number(&TOTAL_FILES, line).or(result.total_files);
            result.total_dirs = capture_number(&TOTAL_DIRS, line).or(result.total_dirs);
            continue;
        }
        if matches(&HEADER, line) {
            continue;
        }
        if let Some(entry) = parse_line(line) {
            result.entries.push(entry);
        }
    }
    result
}

fn parse_line(line: &str) -> Option<ScanEntry> {
    let line = line.trim_start_matches(|c: char| "│├└─|`+* \t".contains(c));
    if line.is_empty() {
        return None;
    }
    parse_bracketed(line)
        .or_else(|| parse_columnar(line))
        .or_else(|| parse_bare(line))
}

fn parse_bracketed(line: &str) -> Option<ScanEntry> {
    let caps = BRACKETED.as_ref()?.captures(line)?;
    let kind = caps.get(1)?.as_str().to_lowercase();
    let detail = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
    let size_bytes = detail.split(',').find_map(parse_size);
    let line_count = capture_number(&LINES, detail).map(|n| n as u64);
    Some(ScanEntry {
        path: normalize_path(caps.get(2)?.as_str()),
        is_dir: kind.starts_with('d'),
        size_bytes,
        line_count,
    })
}

fn parse_columnar(line: &str) -> Option<ScanEntry> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let kind_at = tokens.iter().position(|t| {
        matches!(
            t.to_lowercase().as_str(),
            "file" | "dir" | "directory" | "folder" | "<dir>"
        )
    })?;
    if kind_at == 0 {
        return None;
    }

    let path = tokens[..kind_at].join(" ");
    let is_dir = !tokens[kind_at].eq_ignore_ascii_case("file");
    let rest = &tokens[kind_at + 1..];

    // Size is either one token (`12KB`) or a number followed by a unit.
    let size_bytes = rest.iter().enumerate().find_map(|(i, token)| {
        let pair = rest.get(i + 1).map(|unit| format!("{} {}", token, unit));
        pair.as_deref()
            .and_then(parse_size)
            .filter(|_| token.parse::<f64>().is_ok())
            .or_else(|| parse_size(token).filter(|_| !looks_like_count(rest, i)))
    });
    let line_count = capture_number(&LINES, &rest.join(" ")).map(|n| n as u64);

    Some(ScanEntry {
        path: normalize_path(&path),
        is_dir,
        size_bytes: if is_dir { None } else { size_bytes },
        line_count,
    })
}

/// `40 lines` must not be mistaken for a 40-byte size.
fn looks_like_count(tokens: &[&str], i: usize) -> bool {
    tokens
        .get(i + 1)
        .map(|next| next.to_lowercase().starts_with("line"))
        .unwrap_or(false)
}

fn parse_bare(line: &str) -> Option<ScanEntry> {
    let token = line.trim();
    if !matches(&BARE_PATH, token) || token.chars().all(|c| c == '.') {
        return None;
    }
    Some(ScanEntry {
        path: normalize_path(token),
        is_dir: token.ends_with('/') || token.ends_with('\\'),
        size_bytes: None,
        line_count: None,
    })
}

/// Detect project types from the file names in `paths`.
pub fn detect_project<'a>(paths: impl IntoIterator<Item = &'a str>) -> ProjectMarkers {
    let mut markers = ProjectMarkers::default();
    for path in paths {
        let name = path.rsplit(&['/', '\\'][..]).next().unwrap_or(path);
        if name.ends_with(".csproj") || name.ends_with(".sln") {
            markers.project_types.insert("dotnet".to_string());
            markers.package_managers.insert("nuget".to_string());
            continue;
        }
        let Some((_, found)) = MARKER_FILES.iter().find(|(file, _)| *file == name) else {
            continue;
        };
        for marker in found.iter() {
            match marker {
                Marker::Project(p) => markers.project_types.insert(p.to_string()),
                Marker::Framework(f) => markers.frameworks.insert(f.to_string()),
                Marker::PackageManager(m) => markers.package_managers.insert(m.to_string()),
            };
        }
    }
    markers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columnar_binary_size() {
        let result = parse_scan_output("big.bin  file  2.5 MiB  2025-01-01");
        assert_eq!(result.entries.len(), 1);
        let entry = &result.entries[0];
        assert_eq!(entry.path, "big.bin");
        assert!(!entry.is_dir);
        assert_eq!(entry.size_bytes, Some((2.5f64 * 1024.0 * 1024.0).round() as u64));
    }

    #[test]
    fn test_bracketed_lines() {
        let output = "[DIR] src/\n[FILE] src/main.rs (1.2 KB, 40 lines)";
        let result = parse_scan_output(output);
        assert_eq!(result.entries[0].path, "src");
        assert!(result.entries[0].is_dir);
        assert_eq!(result.entries[1].path, "src/main.rs");
        assert_eq!(result.entries[1].size_bytes, Some(1200));
        assert_eq!(result.entries[1].line_count, Some(40));
    }

    #[test]
    fn test_skips_headers_totals_and_ellipsis() {
        let output = "Workspace contents:\nName  Type  Size\n----------------\n\
                      a.py  file  10 B\n...\n... and 12 more\nTotal: 14 files, 3 directories";
        let result = parse_scan_output(output);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].size_bytes, Some(10));
        assert_eq!(result.total_files, Some(14));
        assert_eq!(result.total_dirs, Some(3));
    }

    #[test]
    fn test_bare_paths_and_tree_prefixes() {
        let result = parse_scan_output("./README.md\n├── docs/\n└── Makefile");
        let paths: Vec<_> = result.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "docs", "Makefile"]);
        assert!(result.entries[1].is_dir);
    }

    #[test]
    fn test_line_count_is_not_size() {
        let result = parse_scan_output("notes.txt  file  40 lines");
        assert_eq!(result.entries[0].size_bytes, None);
        assert_eq!(result.entries[0].line_count, Some(40));
    }

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("512"), Some(512));
        assert_eq!(parse_size("12KB"), Some(12_000));
        assert_eq!(parse_size("1 KiB"), Some(1024));
        assert_eq!(parse_size("1.5 GB"), Some(1_500_000_000));
        assert_eq!(parse_size("2 bytes"), Some(2));
        assert_eq!(parse_size("huge"), None);
    }

    #[test]
    fn test_size_human() {
        assert_eq!(size_human(10), "10 B");
        assert_eq!(size_human(1536), "1.5 KiB");
        assert_eq!(size_human(2_621_440), "2.5 MiB");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./src\\lib.rs"), "src/lib.rs");
        assert_eq!(normalize_path("docs/"), "docs");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn test_detect_project() {
        let markers = detect_project(["Cargo.toml", "web/package.json", "web/yarn.lock", "App.csproj"]);
        assert!(markers.project_types.contains("rust"));
        assert!(markers.project_types.contains("node"));
        assert!(markers.project_types.contains("dotnet"));
        assert!(markers.package_managers.contains("yarn"));
        assert!(markers.package_managers.contains("cargo"));
    }
}
