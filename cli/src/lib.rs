mod cli;

use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use anyhow::Context;
use notes_sync::ChatSession;
use notes_sync::FetchOutcome;
use notes_sync::Note;
use notes_sync::Role;
use notes_sync::Scope;
use notes_sync::SearchOverlay;
use notes_sync::SyncConfig;
use notes_sync::SyncContext;
use notes_sync::SyncErr;
use notes_sync::TurnOutcome;
use tracing::debug;
use tracing_subscriber::EnvFilter;

pub use cli::Cli;
pub use cli::Command;

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    let default_level = "error";
    let _ = tracing_subscriber::fmt()
        // Fallback to the `default_level` log filter if the environment
        // variable is not set _or_ contains an invalid value
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let config = load_config(&cli)?;
    debug!(base_url = %config.base_url, page_size = config.page_size, "loaded config");
    let ctx = SyncContext::connect(config)?;

    match cli.command {
        Command::List { pages } => {
            let loaded = load_pages(&ctx, &Scope::All, pages).await?;
            print_notes(&loaded);
        }
        Command::Search { query, pages } => {
            let overlay = SearchOverlay::new(Arc::clone(&ctx));
            overlay.show();
            overlay.activate(query).await.map_err(explain)?;
            for _ in 1..pages {
                if is_final(overlay.fetch_more().await.map_err(explain)?) {
                    break;
                }
            }
            print_notes(&overlay.displayed().items);
        }
        Command::Chat { message } => {
            let session = Arc::new(ChatSession::new(ctx));
            let outcome = tokio::select! {
                outcome = stream_to_stdout(&session, message.join(" ")) => outcome?,
                _ = tokio::signal::ctrl_c() => anyhow::bail!("interrupted"),
            };
            if outcome == TurnOutcome::Failed {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<SyncConfig> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => SyncConfig::default(),
    };
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url.as_str())?;
    }
    if let Some(token) = &cli.token {
        config = config.with_bearer_token(token.as_str());
    }
    Ok(config)
}

async fn load_pages(ctx: &SyncContext, scope: &Scope, pages: usize) -> anyhow::Result<Vec<Note>> {
    for _ in 0..pages {
        if is_final(ctx.cache.fetch_next(scope).await.map_err(explain)?) {
            break;
        }
    }
    Ok(ctx.cache.snapshot(scope).items)
}

fn is_final(outcome: FetchOutcome) -> bool {
    !matches!(
        outcome,
        FetchOutcome::Merged {
            exhausted: false,
            ..
        }
    )
}

fn explain(err: SyncErr) -> anyhow::Error {
    if err.is_transient() {
        anyhow::Error::new(err).context("request failed; it is safe to retry")
    } else {
        anyhow::Error::new(err)
    }
}

/// Prints the growing assistant reply. Frames carry the full text so far, so
/// only the unseen suffix is written; a reply that was replaced outright (the
/// failure notice) is printed on a fresh line.
async fn stream_to_stdout(session: &Arc<ChatSession>, text: String) -> anyhow::Result<TurnOutcome> {
    let printed = Arc::new(Mutex::new(String::new()));
    let mut changes = session.subscribe();
    let printer = {
        let session = Arc::clone(session);
        let printed = Arc::clone(&printed);
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                print_reply_delta(&session, &printed);
            }
        })
    };

    let outcome = session.send(text).await;
    printer.abort();
    let _ = printer.await;
    print_reply_delta(session, &printed);
    println!();
    outcome.map_err(anyhow::Error::from)
}

fn print_reply_delta(session: &ChatSession, printed: &Mutex<String>) {
    let Some(reply) = session
        .messages()
        .into_iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
    else {
        return;
    };
    let mut printed = printed.lock().unwrap_or_else(PoisonError::into_inner);
    let mut stdout = std::io::stdout().lock();
    if let Some(suffix) = reply.text.strip_prefix(printed.as_str()) {
        let _ = write!(stdout, "{suffix}");
    } else {
        let _ = write!(stdout, "\n{}", reply.text);
    }
    let _ = stdout.flush();
    *printed = reply.text;
}

fn print_notes(notes: &[Note]) {
    for note in notes {
        println!("{}", format_note(note));
    }
}

fn format_note(note: &Note) -> String {
    let title = note.title.as_deref().unwrap_or("(untitled)");
    let mut line = format!(
        "{}  {}  {title}",
        note.created_at.format("%Y-%m-%d %H:%M"),
        note.note_id
    );
    if !note.tags.is_empty() {
        line.push_str("  #");
        line.push_str(&note.tags.join(" #"));
    }
    line
}
