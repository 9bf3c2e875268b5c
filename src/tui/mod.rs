use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};
use std::io;

use crate::Hunk;
use crate::highlight::Highlighter;
use crate::review::{Decision, Prompt, Result, Reviewer};

/// What a key press means while a hunk is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Decide(Decision),
    ScrollDown(u16),
    ScrollUp(u16),
    ToggleHelp,
    None,
}

fn action_for(key: KeyEvent) -> Action {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Action::Decide(Decision::Quit)
        }
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Action::ScrollDown(10)
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Action::ScrollUp(10)
        }
        KeyCode::Char('y') => Action::Decide(Decision::Accept),
        KeyCode::Char('n') => Action::Decide(Decision::Reject),
        KeyCode::Char('a') => Action::Decide(Decision::AcceptRest),
        KeyCode::Char('d') => Action::Decide(Decision::RejectRest),
        KeyCode::Char('q') | KeyCode::Esc => Action::Decide(Decision::Quit),
        KeyCode::Char('?') => Action::ToggleHelp,
        KeyCode::Char('j') | KeyCode::Down => Action::ScrollDown(1),
        KeyCode::Char('k') | KeyCode::Up => Action::ScrollUp(1),
        KeyCode::PageDown => Action::ScrollDown(20),
        KeyCode::PageUp => Action::ScrollUp(20),
        _ => Action::None,
    }
}

/// View state for the hunk currently on screen.
struct HunkView<'a> {
    prompt: &'a Prompt<'a>,
    lines: Vec<Line<'static>>,
    scroll_offset: u16,
    show_help: bool,
}

impl HunkView<'_> {
    fn render(&self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)].as_ref())
            .split(frame.area());

        self.render_hunk(frame, chunks[0]);
        self.render_status_bar(frame, chunks[1]);

        if self.show_help {
            render_help(frame);
        }
    }

    fn render_hunk(&self, frame: &mut Frame, area: Rect) {
        let hunk: &Hunk = self.prompt.hunk;
        let title = format!(
            " {} ({}/{}) ",
            hunk.path.display(),
            self.prompt.index + 1,
            self.prompt.total
        );

        let paragraph = Paragraph::new(Text::from(self.lines.clone()))
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: false })
            .scroll((self.scroll_offset, 0));

        frame.render_widget(paragraph, area);
    }

    fn render_status_bar(&self, frame: &mut Frame, area: Rect) {
        let key = |k: &'static str| Span::styled(k, Style::default().add_modifier(Modifier::BOLD));
        let status = Line::from(vec![
            Span::raw("Keep this change? "),
            key("y"),
            Span::raw(" keep  "),
            key("n"),
            Span::raw(" discard  "),
            key("a"),
            Span::raw(" keep rest  "),
            key("d"),
            Span::raw(" discard rest  "),
            key("q"),
            Span::raw(" quit  "),
            key("?"),
            Span::raw(" help"),
        ]);

        let paragraph = Paragraph::new(status)
            .block(Block::default().borders(Borders::ALL))
            .wrap(Wrap { trim: false });

        frame.render_widget(paragraph, area);
    }

    fn scroll_down(&mut self, by: u16) {
        let max = u16::try_from(self.lines.len().saturating_sub(1)).unwrap_or(u16::MAX);
        self.scroll_offset = self.scroll_offset.saturating_add(by).min(max);
    }
}

fn render_help(frame: &mut Frame) {
    let help_text = [
        "rmr - Keyboard Shortcuts",
        "",
        "Decisions:",
        "  y             - Keep this change",
        "  n             - Discard it and remember the rejection",
        "  a             - Keep this and every remaining change",
        "  d             - Discard this and every remaining change",
        "",
        "Scrolling:",
        "  j / Down      - Scroll down",
        "  k / Up        - Scroll up",
        "  Ctrl+d/PgDn   - Scroll down a page",
        "  Ctrl+u/PgUp   - Scroll up a page",
        "",
        "Other:",
        "  ?             - Show this help",
        "  q / Esc       - Quit (remaining changes stay applied)",
        "",
        "Press any key to close this help",
    ];

    let text = Text::from(help_text.iter().map(|&s| Line::from(s)).collect::<Vec<_>>());
    let paragraph = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("Help"))
        .style(Style::default().fg(Color::Yellow))
        .wrap(Wrap { trim: false });

    let area = centered_rect(60, 70, frame.area());
    frame.render_widget(Clear, area);
    frame.render_widget(paragraph, area);
}

/// Create a centered rectangle.
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

type Term = Terminal<CrosstermBackend<io::Stdout>>;

/// Full-screen reviewer drawn with ratatui.
///
/// The terminal is switched to the alternate screen on the first hunk and
/// restored in `finish` (or on drop, or on panic).
pub struct TerminalReviewer {
    highlighter: Highlighter,
    terminal: Option<Term>,
}

impl TerminalReviewer {
    pub fn new() -> Self {
        Self {
            highlighter: Highlighter::new(),
            terminal: None,
        }
    }

    fn terminal(&mut self) -> io::Result<&mut Term> {
        if self.terminal.is_none() {
            install_panic_hook();
            self.terminal = Some(setup_terminal()?);
        }
        self.terminal
            .as_mut()
            .ok_or_else(|| io::Error::other("terminal not initialised"))
    }
}

impl Default for TerminalReviewer {
    fn default() -> Self {
        Self::new()
    }
}

impl Reviewer for TerminalReviewer {
    fn decide(&mut self, prompt: &Prompt<'_>) -> Result<Decision> {
        let mut view = HunkView {
            prompt,
            lines: self.highlighter.hunk_lines(prompt.hunk),
            scroll_offset: 0,
            show_help: false,
        };
        let terminal = self.terminal()?;

        loop {
            terminal.draw(|f| view.render(f))?;

            let Event::Key(key) = event::read()? else {
                continue;
            };
            // Ignore key release events
            if key.kind != KeyEventKind::Press {
                continue;
            }
            if view.show_help {
                // Any key closes help
                view.show_help = false;
                continue;
            }

            match action_for(key) {
                Action::Decide(decision) => return Ok(decision),
                Action::ScrollDown(by) => view.scroll_down(by),
                Action::ScrollUp(by) => view.scroll_offset = view.scroll_offset.saturating_sub(by),
                Action::ToggleHelp => view.show_help = true,
                Action::None => {}
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut terminal) = self.terminal.take() {
            restore_terminal(&mut terminal)?;
        }
        Ok(())
    }
}

impl Drop for TerminalReviewer {
    fn drop(&mut self) {
        if let Some(mut terminal) = self.terminal.take() {
            let _ = restore_terminal(&mut terminal);
        }
    }
}

fn install_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic_info);
    }));
}

fn setup_terminal() -> io::Result<Term> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    Terminal::new(CrosstermBackend::new(stdout))
}

fn restore_terminal(terminal: &mut Term) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()
}
