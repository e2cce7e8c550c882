//! Content search across document collections
//!
//! Full-text search is delegated to an external `rga` process. Its output is
//! `path:line:content` per match; for PDFs the content starts with a
//! `Page N:` marker naming the matching page.
//!
//! Filename mode needs no external process: PDFs under the file roots are
//! listed with [`scan_pdfs`] and narrowed by name with [`filter_files`].

use crate::error::SearchError;
use pdf_viewer_scheduler::CancellationToken;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use walkdir::{DirEntry, WalkDir};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One search run
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub roots: Vec<PathBuf>,
    pub max_count: usize,
    pub timeout: Duration,
}

/// A match in some file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub path: PathBuf,
    pub line: u64,
    /// 1-based page number, 1 when the output carried no page marker
    pub page: usize,
    pub content: String,
}

impl SearchHit {
    /// `file.pdf:3 - context...` with the context cut to `preview_chars`
    pub fn display(&self, preview_chars: usize) -> String {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());
        let mut preview: String = self.content.chars().take(preview_chars).collect();
        if self.content.chars().count() > preview_chars {
            preview.push_str("...");
        }
        format!("{name}:{} - {preview}", self.page)
    }
}

/// Parse one output line. Lines without two colons are not matches.
pub fn parse_line(line: &str) -> Option<SearchHit> {
    let (path, rest) = line.split_once(':')?;
    let (line_number, content) = rest.split_once(':')?;

    let mut page = 1;
    let mut content = content;
    if let Some(marked) = content.strip_prefix("Page ") {
        page = leading_number(marked);
        if let Some((_, after)) = marked.split_once(':') {
            content = after.trim_start_matches(' ');
        }
    }

    Some(SearchHit {
        path: PathBuf::from(path),
        line: line_number.trim().parse().unwrap_or(0),
        page,
        content: content.to_string(),
    })
}

/// Digits at the start of `text`; 0 if there are none
fn leading_number(text: &str) -> usize {
    let digits: String = text
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().unwrap_or(0)
}

pub fn parse_output(stdout: &str) -> Vec<SearchHit> {
    stdout
        .lines()
        .take_while(|line| !line.is_empty())
        .filter_map(parse_line)
        .collect()
}

/// Runs a search and returns its matches
pub trait ContentSearcher: Send + Sync {
    fn search(
        &self,
        request: &SearchRequest,
        token: &CancellationToken,
    ) -> Result<Vec<SearchHit>, SearchError>;
}

/// [`ContentSearcher`] backed by ripgrep-all
#[derive(Debug, Clone)]
pub struct RipgrepAll {
    program: PathBuf,
}

impl Default for RipgrepAll {
    fn default() -> Self {
        Self::new("rga")
    }
}

impl RipgrepAll {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn command(&self, request: &SearchRequest) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--color=never")
            .arg("--no-heading")
            .arg("--line-number")
            .arg(format!("--max-count={}", request.max_count))
            .arg("--type=pdf")
            .arg(&request.query)
            .args(&request.roots)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl ContentSearcher for RipgrepAll {
    fn search(
        &self,
        request: &SearchRequest,
        token: &CancellationToken,
    ) -> Result<Vec<SearchHit>, SearchError> {
        debug!(query = %request.query, roots = request.roots.len(), "starting content search");
        let mut child = self
            .command(request)
            .spawn()
            .map_err(|source| SearchError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + request.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if token.is_cancelled() {
                kill(&mut child);
                return Err(SearchError::Cancelled);
            }
            if Instant::now() >= deadline {
                kill(&mut child);
                warn!(timeout = ?request.timeout, "content search timed out");
                return Err(SearchError::Timeout(request.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stdout = collect(stdout)?;
        let stderr = collect(stderr)?;
        let hits = parse_output(&stdout);

        // rg exits 1 when nothing matched
        match status.code() {
            Some(0) | Some(1) => Ok(hits),
            _ if !hits.is_empty() => {
                debug!(?status, "search exited abnormally but produced matches");
                Ok(hits)
            }
            code => Err(SearchError::Failed {
                status: code,
                stderr: stderr.trim().to_string(),
            }),
        }
    }
}

type Drain = Option<thread::JoinHandle<std::io::Result<String>>>;

/// Read a pipe to the end on a helper thread so the child never blocks
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Drain {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut bytes = Vec::new();
            pipe.read_to_end(&mut bytes)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        })
    })
}

fn collect(handle: Drain) -> Result<String, SearchError> {
    match handle {
        Some(handle) => handle
            .join()
            .unwrap_or_else(|_| Ok(String::new()))
            .map_err(SearchError::from),
        None => Ok(String::new()),
    }
}

fn kill(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!(error = %err, "search process already exited");
    }
    let _ = child.wait();
}

/// How a filter query is matched against list entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryMode {
    #[default]
    Exact,
    Fuzzy,
}

impl QueryMode {
    pub fn toggled(self) -> Self {
        match self {
            QueryMode::Exact => QueryMode::Fuzzy,
            QueryMode::Fuzzy => QueryMode::Exact,
        }
    }

    /// Case-insensitive substring (exact) or subsequence (fuzzy) match
    pub fn matches(self, query: &str, text: &str) -> bool {
        let query = query.to_lowercase();
        let text = text.to_lowercase();
        match self {
            QueryMode::Exact => text.contains(&query),
            QueryMode::Fuzzy => {
                let mut remaining = text.chars();
                query
                    .chars()
                    .all(|wanted| remaining.any(|candidate| candidate == wanted))
            }
        }
    }
}

/// PDF files under `roots`, at most `max_depth` directory levels down
///
/// Hidden directories and unreadable entries are skipped. Files are sorted
/// within each root; roots keep their order and repeated paths are dropped.
pub fn scan_pdfs(roots: &[PathBuf], max_depth: usize) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();
    for root in roots {
        let mut found: Vec<PathBuf> = WalkDir::new(root)
            .max_depth(max_depth + 1)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    trace!(error = %err, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && is_pdf(entry.path()))
            .map(DirEntry::into_path)
            .collect();
        found.sort();
        files.extend(found.into_iter().filter(|path| seen.insert(path.clone())));
    }
    debug!(count = files.len(), roots = roots.len(), "pdf files scanned");
    files
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("pdf"))
}

/// Files whose name matches `query`; a blank query keeps everything
pub fn filter_files<'a>(files: &'a [PathBuf], query: &str, mode: QueryMode) -> Vec<&'a Path> {
    let query = query.trim();
    files
        .iter()
        .filter(|path| {
            query.is_empty()
                || path
                    .file_name()
                    .is_some_and(|name| mode.matches(query, &name.to_string_lossy()))
        })
        .map(PathBuf::as_path)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_with_page_marker() {
        let hit = parse_line("/home/u/Documents/paper.pdf:12:Page 4:   neural networks").unwrap();
        assert_eq!(hit.path, PathBuf::from("/home/u/Documents/paper.pdf"));
        assert_eq!(hit.line, 12);
        assert_eq!(hit.page, 4);
        assert_eq!(hit.content, "neural networks");
    }

    #[test]
    fn test_parse_line_without_marker_defaults_to_page_one() {
        let hit = parse_line("notes.pdf:3:plain text: with colon").unwrap();
        assert_eq!(hit.page, 1);
        assert_eq!(hit.content, "plain text: with colon");
    }

    #[test]
    fn test_lines_with_fewer_than_two_colons_are_skipped() {
        assert!(parse_line("no colons here").is_none());
        assert!(parse_line("one:colon").is_none());
        let hits = parse_output("a.pdf:1:Page 2: x\nbroken\nb.pdf:5:y\n");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].path, PathBuf::from("b.pdf"));
    }

    #[test]
    fn test_display_truncates_long_context() {
        let hit = SearchHit {
            path: PathBuf::from("/x/y/book.pdf"),
            line: 1,
            page: 7,
            content: "a".repeat(80),
        };
        assert_eq!(hit.display(60), format!("book.pdf:7 - {}...", "a".repeat(60)));

        let short = SearchHit {
            content: "short".into(),
            ..hit
        };
        assert_eq!(short.display(60), "book.pdf:7 - short");
    }

    #[test]
    fn test_display_is_char_boundary_safe() {
        let hit = SearchHit {
            path: PathBuf::from("é.pdf"),
            line: 1,
            page: 1,
            content: "ééé".into(),
        };
        assert_eq!(hit.display(2), "é.pdf:1 - éé...");
    }

    #[test]
    fn test_command_arguments() {
        let request = SearchRequest {
            query: "foo".into(),
            roots: vec![PathBuf::from("/a"), PathBuf::from("/b")],
            max_count: 50,
            timeout: Duration::from_secs(1),
        };
        let command = RipgrepAll::default().command(&request);
        let args: Vec<String> = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "--color=never",
                "--no-heading",
                "--line-number",
                "--max-count=50",
                "--type=pdf",
                "foo",
                "/a",
                "/b"
            ]
        );
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let searcher = RipgrepAll::new("/nonexistent/definitely-not-rga");
        let request = SearchRequest {
            query: "x".into(),
            roots: vec![],
            max_count: 1,
            timeout: Duration::from_secs(1),
        };
        let result = searcher.search(&request, &CancellationToken::new());
        assert!(matches!(result, Err(SearchError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_script_output_is_parsed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("fake-rga");
        std::fs::write(
            &script,
            "#!/bin/sh\necho \"/docs/a.pdf:1:Page 3: found it\"\nexit 0\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let request = SearchRequest {
            query: "found".into(),
            roots: vec![],
            max_count: 5,
            timeout: Duration::from_secs(5),
        };
        let hits = RipgrepAll::new(&script)
            .search(&request, &CancellationToken::new())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].page, 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_slow_search_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("slow-rga");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let request = SearchRequest {
            query: "x".into(),
            roots: vec![],
            max_count: 5,
            timeout: Duration::from_millis(100),
        };
        let result = RipgrepAll::new(&script).search(&request, &CancellationToken::new());
        assert!(matches!(result, Err(SearchError::Timeout(_))));
    }

    #[test]
    fn test_query_modes() {
        assert!(QueryMode::Exact.matches("Neural", "deep neural nets"));
        assert!(!QueryMode::Exact.matches("nnt", "deep neural nets"));
        assert!(QueryMode::Fuzzy.matches("nnt", "deep neural nets"));
        assert!(!QueryMode::Fuzzy.matches("zz", "deep neural nets"));
        assert_eq!(QueryMode::Exact.toggled(), QueryMode::Fuzzy);
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"%PDF-1.7").unwrap();
    }

    #[test]
    fn test_scan_finds_pdfs_within_depth() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("b.pdf"));
        touch(&root.join("A.PDF"));
        touch(&root.join("notes.txt"));
        touch(&root.join(".cache/hidden.pdf"));
        touch(&root.join("papers/2024/survey.pdf"));
        touch(&root.join("papers/2024/deep/too-deep.pdf"));

        let files = scan_pdfs(&[root.to_path_buf(), root.join("missing")], 2);
        assert_eq!(
            files,
            vec![
                root.join("A.PDF"),
                root.join("b.pdf"),
                root.join("papers/2024/survey.pdf"),
            ]
        );

        let shallow = scan_pdfs(&[root.to_path_buf()], 0);
        assert_eq!(shallow.len(), 2);
    }

    #[test]
    fn test_overlapping_roots_list_each_file_once() {
        let dir = tempfile::TempDir::new().unwrap();
        touch(&dir.path().join("sub/one.pdf"));

        let roots = [dir.path().to_path_buf(), dir.path().join("sub")];
        assert_eq!(scan_pdfs(&roots, 3), vec![dir.path().join("sub/one.pdf")]);
    }

    #[test]
    fn test_filter_files_matches_file_name_only() {
        let files = vec![
            PathBuf::from("/home/ada/Documents/neural-nets.pdf"),
            PathBuf::from("/home/ada/Downloads/invoice.pdf"),
        ];
        assert_eq!(filter_files(&files, "  ", QueryMode::Exact).len(), 2);
        assert_eq!(
            filter_files(&files, "NEURAL", QueryMode::Exact),
            vec![Path::new("/home/ada/Documents/neural-nets.pdf")]
        );
        assert!(filter_files(&files, "ada", QueryMode::Exact).is_empty());
        assert!(filter_files(&files, "nnets", QueryMode::Exact).is_empty());
        assert_eq!(filter_files(&files, "nnets", QueryMode::Fuzzy).len(), 1);
    }
}
