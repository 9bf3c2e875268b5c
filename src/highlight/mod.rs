use crate::Hunk;
use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};
use syntect::{
    easy::HighlightLines,
    highlighting::{Color as SyntectColor, Theme, ThemeSet},
    parsing::SyntaxSet,
};

/// Lines longer than this are shown with diff colouring only.
const MAX_LINE_LENGTH: usize = 10_000;

/// Environment variable naming a bundled syntect theme.
pub const THEME_ENV: &str = "RMR_THEME";
const DEFAULT_THEME: &str = "base16-ocean.dark";

/// Syntax highlighter for hunks shown during review.
///
/// Loading the bundled syntaxes and themes is slow, so build one of these per
/// session and reuse it for every hunk.
pub struct Highlighter {
    syntax_set: SyntaxSet,
    theme: Theme,
}

impl Highlighter {
    /// Use the theme named by `RMR_THEME`, falling back to the default.
    pub fn new() -> Self {
        let requested = std::env::var(THEME_ENV).ok();
        Self::with_theme(requested.as_deref().unwrap_or(DEFAULT_THEME))
    }

    pub fn with_theme(name: &str) -> Self {
        let syntax_set = SyntaxSet::load_defaults_newlines();
        let mut theme_set = ThemeSet::load_defaults();
        let theme = theme_set
            .themes
            .remove(name)
            .or_else(|| theme_set.themes.remove(DEFAULT_THEME))
            .or_else(|| theme_set.themes.into_values().next())
            .unwrap_or_default();

        Self { syntax_set, theme }
    }

    /// Render a hunk as coloured lines: header, removed lines, added lines.
    pub fn hunk_lines(&self, hunk: &Hunk) -> Vec<Line<'static>> {
        let ext = hunk
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        let mut lines = vec![Line::from(Span::styled(
            hunk.header(),
            Style::default().fg(Color::Cyan),
        ))];

        // Each side gets its own parse state; they are separate texts
        let mut removed = self.for_file(ext);
        let mut added = self.for_file(ext);
        for line in hunk.diff_lines() {
            let spans = if line.starts_with('+') {
                added.highlight_diff_line(&line)
            } else {
                removed.highlight_diff_line(&line)
            };
            lines.push(Line::from(spans));
        }
        lines
    }

    fn for_file(&self, file_ext: &str) -> FileHighlighter<'_> {
        FileHighlighter::new(&self.syntax_set, &self.theme, file_ext)
    }

    fn syntect_to_ratatui(color: SyntectColor) -> Color {
        Color::Rgb(color.r, color.g, color.b)
    }
}

impl Default for Highlighter {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps syntect's parse state across consecutive lines of one file.
struct FileHighlighter<'a> {
    highlighter: Option<HighlightLines<'a>>,
    syntax_set: &'a SyntaxSet,
}

impl<'a> FileHighlighter<'a> {
    fn new(syntax_set: &'a SyntaxSet, theme: &'a Theme, file_ext: &str) -> Self {
        let highlighter = syntax_set
            .find_syntax_by_extension(file_ext)
            .map(|syntax| HighlightLines::new(syntax, theme));

        Self {
            highlighter,
            syntax_set,
        }
    }

    /// Highlight one `+`/`-` line. Anything else (the no-newline marker) is
    /// dimmed. Unknown file types get plain diff colours.
    fn highlight_diff_line(&mut self, line: &str) -> Vec<Span<'static>> {
        let line = line.trim_end_matches('\r');
        let prefix_color = match line.chars().next() {
            Some('+') => Color::Green,
            Some('-') => Color::Red,
            _ => {
                return vec![Span::styled(
                    line.to_string(),
                    Style::default().add_modifier(Modifier::DIM),
                )];
            }
        };
        let plain = || vec![Span::styled(line.to_string(), Style::default().fg(prefix_color))];

        if line.len() > MAX_LINE_LENGTH {
            return plain();
        }
        let Some(highlighter) = self.highlighter.as_mut() else {
            return plain();
        };

        // syntect's newline syntaxes expect the terminator
        let content = format!("{}\n", &line[1..]);
        match highlighter.highlight_line(&content, self.syntax_set) {
            Ok(regions) => {
                let mut spans = Vec::with_capacity(regions.len() + 1);
                spans.push(Span::styled(
                    line[..1].to_string(),
                    Style::default().fg(prefix_color),
                ));
                for (style, text) in regions {
                    let text = text.trim_end_matches('\n');
                    if text.is_empty() {
                        continue;
                    }
                    spans.push(Span::styled(
                        text.to_string(),
                        Style::default().fg(Highlighter::syntect_to_ratatui(style.foreground)),
                    ));
                }
                spans
            }
            Err(_) => plain(),
        }
    }
}
