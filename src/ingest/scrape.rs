//! Fetch a web page and reduce it to markdown.
use crate::error::IngestError;
use regex::Regex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Default time budget for one page fetch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP scraper. Non-200 responses are errors; redirects are followed.
pub struct Scraper {
    agent: ureq::Agent,
}

impl Scraper {
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { agent }
    }

    /// GET `url` and convert the body to markdown.
    pub fn scrape(&self, url: &str) -> Result<String, IngestError> {
        let fetch_err = |reason: String| IngestError::Fetch {
            url: url.to_string(),
            reason,
        };
        let start = Instant::now();
        let mut response = self
            .agent
            .get(url)
            .header("user-agent", concat!("detforge/", env!("CARGO_PKG_VERSION")))
            .call()
            .map_err(|err| fetch_err(err.to_string()))?;
        let status = response.status().as_u16();
        tracing::info!(
            url,
            status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "scrape complete"
        );
        if status != 200 {
            return Err(IngestError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|err| fetch_err(format!("read body: {err}")))?;
        Ok(html_to_markdown(&body))
    }
}

impl Default for Scraper {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

struct Rules {
    comments: Regex,
    invisible: Regex,
    headings: Vec<(Regex, String)>,
    pre: Regex,
    code: Regex,
    strong: Regex,
    emphasis: Regex,
    links: Regex,
    list_items: Regex,
    line_breaks: Regex,
    blocks: Regex,
    cells: Regex,
    tags: Regex,
    trailing_space: Regex,
    blank_runs: Regex,
}

fn rules() -> &'static Rules {
    static RULES: OnceLock<Rules> = OnceLock::new();
    RULES.get_or_init(|| {
        let re = |pattern: &str| Regex::new(pattern).expect("static pattern");
        Rules {
            comments: re(r"(?s)<!--.*?-->"),
            invisible: re(
                r"(?is)<(script|style|noscript|head|svg|template)\b[^>]*>.*?</(script|style|noscript|head|svg|template)\s*>",
            ),
            headings: (1..=6)
                .map(|level| {
                    (
                        re(&format!(r"(?is)<h{level}\b[^>]*>(.*?)</h{level}\s*>")),
                        format!("\n\n{} ${{1}}\n\n", "#".repeat(level)),
                    )
                })
                .collect(),
            pre: re(r"(?is)<pre\b[^>]*>(.*?)</pre\s*>"),
            code: re(r"(?is)<code\b[^>]*>(.*?)</code\s*>"),
            strong: re(r"(?is)<(strong|b)\b[^>]*>(.*?)</(strong|b)\s*>"),
            emphasis: re(r"(?is)<(em|i)\b[^>]*>(.*?)</(em|i)\s*>"),
            links: re(r#"(?is)<a\b[^>]*?href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a\s*>"#),
            list_items: re(r"(?i)<li\b[^>]*>"),
            line_breaks: re(r"(?i)<br\s*/?>"),
            blocks: re(
                r"(?i)</?(p|div|section|article|ul|ol|table|tr|blockquote|header|footer|nav|main|figure|aside)\b[^>]*>",
            ),
            cells: re(r"(?i)<(td|th)\b[^>]*>"),
            tags: re(r"<[^>]+>"),
            trailing_space: re(r"[ \t]+\n"),
            blank_runs: re(r"(\n\s*){3,}"),
        }
    })
}

/// Convert an HTML page to readable markdown. Markup that carries no text
/// (scripts, styles, head) is dropped.
pub fn html_to_markdown(html: &str) -> String {
    let rules = rules();
    let mut text = rules.comments.replace_all(html, "").into_owned();
    text = rules.invisible.replace_all(&text, "").into_owned();
    for (pattern, replacement) in &rules.headings {
        text = pattern.replace_all(&text, replacement.as_str()).into_owned();
    }
    text = rules.pre.replace_all(&text, "\n\n```\n${1}\n```\n\n").into_owned();
    text = rules.code.replace_all(&text, "`${1}`").into_owned();
    text = rules.strong.replace_all(&text, "**${2}**").into_owned();
    text = rules.emphasis.replace_all(&text, "*${2}*").into_owned();
    text = rules.links.replace_all(&text, "[${2}](${1})").into_owned();
    text = rules.list_items.replace_all(&text, "\n- ").into_owned();
    text = rules.line_breaks.replace_all(&text, "\n").into_owned();
    text = rules.blocks.replace_all(&text, "\n\n").into_owned();
    text = rules.cells.replace_all(&text, " ").into_owned();
    text = rules.tags.replace_all(&text, "").into_owned();
    text = decode_entities(&text);
    text = rules.trailing_space.replace_all(&text, "\n").into_owned();
    collapse_empty_lines(text.trim())
}

/// Reduce any run of three or more line breaks (with whitespace between)
/// to a single blank line.
pub fn collapse_empty_lines(text: &str) -> String {
    rules().blank_runs.replace_all(text, "\n\n").into_owned()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
