mod app;
mod render;

use anyhow::{Context, Result};
use app::{App, transformer_options};
use crossterm::{
    event::{self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use markdown_typewriter_config::Config;
use markdown_typewriter_engine::AnimationEffect;
use ratatui::{
    DefaultTerminal, Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use std::{
    env,
    io::stdout,
    path::PathBuf,
    process,
    time::{Duration, Instant},
};

const IDLE_WAIT: Duration = Duration::from_millis(250);

struct Args {
    file: PathBuf,
    config: Option<PathBuf>,
    skip: bool,
}

fn usage(program: &str) -> ! {
    eprintln!("Usage: {program} <file.md> [--config <path>] [--skip]");
    process::exit(1);
}

fn parse_args() -> Args {
    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("markdown-typewriter");

    let mut file = None;
    let mut config = None;
    let mut skip = false;
    let mut rest = args.iter().skip(1);
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--skip" => skip = true,
            "--config" => match rest.next() {
                Some(path) => config = Some(PathBuf::from(path)),
                None => usage(program),
            },
            "-h" | "--help" => usage(program),
            _ if file.is_none() && !arg.starts_with("--") => file = Some(PathBuf::from(arg)),
            _ => usage(program),
        }
    }

    match file {
        Some(file) => Args { file, config, skip },
        None => usage(program),
    }
}

fn load_config(path: Option<&PathBuf>) -> Config {
    let loaded = match path {
        Some(path) => {
            let expanded = Config::expand_path(path).unwrap_or_else(|| path.clone());
            Config::load_from_path(&expanded)
        }
        None => Config::load(),
    };
    match loaded {
        Ok(Some(config)) => config,
        Ok(None) => Config::default(),
        Err(e) => {
            eprintln!("Error: Failed to load config file: {e}");
            process::exit(1);
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = parse_args();
    let config = load_config(args.config.as_ref());

    let source = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read '{}'", args.file.display()))?;

    let mut options = match transformer_options(&config) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: Invalid configuration: {e}");
            process::exit(1);
        }
    };
    if args.skip {
        options.effect = AnimationEffect::None;
    }

    let mut app = App::new(source, &config, options)?;

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, EnableFocusChange)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableFocusChange
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("{err:?}");
    }

    Ok(())
}

fn run_app(terminal: &mut DefaultTerminal, app: &mut App) -> Result<()> {
    loop {
        let now = Instant::now();
        app.feed_due(now);
        app.transformer.poll(now);

        if app.take_dirty() {
            terminal.draw(|f| ui(f, app))?;
        }

        let wait = app
            .next_wakeup()
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_WAIT)
            .min(IDLE_WAIT);
        if !event::poll(wait)? {
            continue;
        }

        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Char(' ') => app.toggle_pause(),
                KeyCode::Char('s') => app.skip(),
                KeyCode::Char('r') => app.restart(),
                _ => {}
            },
            Event::FocusLost => app.transformer.set_visibility(false),
            Event::FocusGained => app.transformer.set_visibility(true),
            Event::Resize(..) => app.mark_dirty(),
            _ => {}
        }
    }
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(f.area());

    let transformer = &app.transformer;
    let cursor = if transformer.options().effect == AnimationEffect::Typing {
        transformer.current_block_id()
    } else {
        None
    };
    let blocks = transformer.display_blocks();
    let lines = render::render_blocks(&blocks, cursor);

    // Keep the newest text in view
    let height = usize::from(chunks[0].height.saturating_sub(2));
    let scroll = u16::try_from(lines.len().saturating_sub(height)).unwrap_or(u16::MAX);

    let content = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Preview"))
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));
    f.render_widget(content, chunks[0]);

    let (fed, total) = app.progress();
    let state = if transformer.is_paused_state() {
        "paused"
    } else if transformer.is_processing() {
        "revealing"
    } else {
        "idle"
    };
    let help = Line::from(vec![
        Span::styled(
            format!("{state} {fed}/{total} bytes | "),
            Style::default().add_modifier(Modifier::DIM),
        ),
        Span::raw("Space: Pause | s: Skip | r: Restart | q: Quit"),
    ]);
    f.render_widget(Paragraph::new(help), chunks[1]);
}
