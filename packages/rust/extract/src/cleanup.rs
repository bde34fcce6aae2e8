//! Post-conversion cleanup passes.
//!
//! Each pass is a function `&str -> String` applied in sequence. The goal is
//! density, not fidelity: the output feeds a prompt, not a renderer.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on converted Markdown.
pub(crate) fn run_pipeline(md: &str, keep_links: bool) -> String {
    let mut result = drop_images(md);
    if !keep_links {
        result = unlink(&result);
    }
    result = strip_leftover_html(&result);
    result = collapse_inline_whitespace(&result);
    result = collapse_blank_lines(&result);
    result.trim().to_string()
}

// ---------------------------------------------------------------------------
// Pass 1: Drop images
// ---------------------------------------------------------------------------

fn drop_images(md: &str) -> String {
    static IMG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));

    IMG_RE.replace_all(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 2: Collapse links to their text
// ---------------------------------------------------------------------------

fn unlink(md: &str) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));

    LINK_RE.replace_all(md, "$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Strip leftover HTML tags
// ---------------------------------------------------------------------------

/// Remove any tag that survived conversion, keeping its inner text.
fn strip_leftover_html(md: &str) -> String {
    static TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"</?[a-zA-Z][a-zA-Z0-9-]*(?:\s[^>]*)?/?>").expect("valid regex"));

    TAG_RE.replace_all(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 4: Whitespace
// ---------------------------------------------------------------------------

/// Trim each line and squeeze runs of spaces/tabs to one space.
fn collapse_inline_whitespace(md: &str) -> String {
    static SPACES_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ \t\u{a0}]{2,}").expect("valid regex"));

    md.lines()
        .map(|line| SPACES_RE.replace_all(line.trim(), " ").to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// At most one blank line between blocks.
fn collapse_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_images_removes_image_syntax() {
        assert_eq!(drop_images("before ![chart](/c.png) after"), "before  after");
    }

    #[test]
    fn unlink_keeps_text() {
        assert_eq!(
            unlink("* [Stocks rally](https://x.test/a) today"),
            "* Stocks rally today"
        );
    }

    #[test]
    fn strip_leftover_html_keeps_inner_text() {
        assert_eq!(
            strip_leftover_html(r#"<span class="tag">Markets</span> update<br/>"#),
            "Markets update"
        );
    }

    #[test]
    fn whitespace_passes() {
        assert_eq!(collapse_inline_whitespace("  a    b \t c  "), "a b c");
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn full_pipeline() {
        let input = "# Title\n\n\n\n![x](y.png)\n\n<div>[Headline](/h)</div>   tail\n\n";
        assert_eq!(run_pipeline(input, false), "# Title\n\nHeadline tail");
        assert_eq!(run_pipeline(input, true), "# Title\n\n[Headline](/h) tail");
    }
}
