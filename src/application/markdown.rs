//! Markdown to HTML conversion for post bodies.

use comrak::{Options, markdown_to_html};

fn default_options() -> Options<'static> {
    let mut options = Options::default();

    let ext = &mut options.extension;
    ext.strikethrough = true;
    ext.table = true;
    ext.autolink = true;
    ext.tasklist = true;
    ext.footnotes = true;
    ext.tagfilter = true;

    let render = &mut options.render;
    render.github_pre_lang = true;
    // Raw HTML in posts is escaped, never passed through.
    render.r#unsafe = false;

    options
}

/// Render a markdown body to an HTML fragment.
pub fn render_markdown(markdown: &str) -> String {
    markdown_to_html(markdown, &default_options())
}

/// Plain-text excerpt of a markdown body, cut at a word boundary.
pub fn excerpt(markdown: &str, max_chars: usize) -> String {
    let mut text = String::with_capacity(max_chars);
    for word in markdown
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(str::split_whitespace)
    {
        let cleaned = word.trim_matches(|c: char| matches!(c, '*' | '_' | '`' | '>'));
        if cleaned.is_empty() {
            continue;
        }
        if text.chars().count() + cleaned.chars().count() + 1 > max_chars {
            text.push('…');
            break;
        }
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(cleaned);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_gfm_tables_and_strikethrough() {
        let html = render_markdown("~~old~~\n\n| a |\n|---|\n| b |\n");
        assert!(html.contains("<del>old</del>"));
        assert!(html.contains("<table>"));
    }

    #[test]
    fn raw_html_is_not_passed_through() {
        let html = render_markdown("<script>alert(1)</script>");
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn excerpt_skips_headings_and_truncates() {
        let text = excerpt("# Title\n\nThe quick **brown** fox jumps over", 15);
        assert_eq!(text, "The quick brown…");
    }
}
