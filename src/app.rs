use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tracing_subscriber::EnvFilter;

use crate::backend;
use crate::config::{self, InteractionConfig};
use crate::data::{self, InteractionService, PostService, RemoteCall, ViewerService};
use crate::interaction::{LikeIcon, PostInteractions, PostStatsView, SaveIcon, Toggle};
use crate::model::{Post, ViewerQuery};
use crate::time::relative_time;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Show,
    Like,
    Save,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: Command,
    pub post_id: String,
    pub offline: bool,
    pub config_file: Option<PathBuf>,
}

pub fn parse_args<I>(args: I) -> Result<Invocation>
where
    I: IntoIterator<Item = String>,
{
    let mut offline = false;
    let mut config_file = None;
    let mut positional = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--offline" => offline = true,
            "--config" => {
                let path = args.next().context("--config requires a path")?;
                config_file = Some(PathBuf::from(path));
            }
            flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("show") => Command::Show,
        Some("like") => Command::Like,
        Some("save") => Command::Save,
        Some(other) => bail!("unknown command {other:?}"),
        None => bail!("missing command (show, like or save)"),
    };
    let post_id = positional.next().context("missing post id")?;
    if let Some(extra) = positional.next() {
        bail!("unexpected argument {extra:?}");
    }

    Ok(Invocation {
        command,
        post_id,
        offline,
        config_file,
    })
}

pub struct Services {
    pub posts: Arc<dyn PostService + Send + Sync>,
    pub viewers: Arc<dyn ViewerService + Send + Sync>,
    pub interactions: Arc<dyn InteractionService + Send + Sync>,
}

impl Services {
    pub fn connect(cfg: &config::BackendConfig) -> Result<Self> {
        let client = Arc::new(
            backend::Client::new(cfg.client_config()).context("initialize backend client")?,
        );
        Ok(Self {
            posts: Arc::new(data::BackendPostService::new(client.clone())),
            viewers: Arc::new(data::BackendViewerService::new(client.clone())),
            interactions: Arc::new(data::BackendInteractionService::new(client)),
        })
    }

    pub fn offline() -> Self {
        let mock = Arc::new(data::MockBackend::default());
        Self {
            posts: mock.clone(),
            viewers: mock.clone(),
            interactions: mock,
        }
    }
}

pub fn run(invocation: Invocation) -> Result<()> {
    init_logging();

    let cfg = config::load(config::LoadOptions {
        config_file: invocation.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;

    let services = if invocation.offline {
        Services::offline()
    } else {
        Services::connect(&cfg.backend)?
    };

    let output = execute(
        &services,
        &cfg.interaction,
        invocation.command,
        &invocation.post_id,
        Utc::now(),
    )?;
    print!("{output}");
    Ok(())
}

/// Loads the post and viewer, applies `command`, waits for the remote call and
/// renders the resulting state.
pub fn execute(
    services: &Services,
    settings: &InteractionConfig,
    command: Command,
    post_id: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    let post = services.posts.get_post(post_id)?;
    let viewer = ViewerQuery::from_result(services.viewers.current_viewer());
    if let ViewerQuery::Failed(err) = &viewer {
        tracing::warn!("current user unavailable: {err}");
    }
    let viewer_id = viewer
        .viewer()
        .map(|viewer| viewer.id.clone())
        .unwrap_or_default();

    let mut state = PostInteractions::new(&post, &viewer, services.interactions.clone())
        .with_policy(settings.failure_policy);

    let toggle = match command {
        Command::Show => None,
        Command::Like => Some(state.toggle_like(&viewer_id)),
        Command::Save => Some(state.toggle_save(&viewer_id)),
    };

    let mut notes = Vec::new();
    if let Some(Toggle::Skipped(missing)) = &toggle {
        notes.push(format!("nothing sent: {missing}"));
    }
    if toggle.as_ref().and_then(Toggle::dispatched).is_some() {
        let settled = state.settle(settings.settle_timeout);
        let mut refresh_viewer = false;
        for result in &settled {
            if let Some(err) = &result.error {
                notes.push(format!("failed to {}: {}", result.call.label(), err));
            }
            if !matches!(result.call, RemoteCall::UpdateLikes { .. }) {
                refresh_viewer = true;
            }
        }
        if state.in_flight() > 0 {
            notes.push("still waiting on the backend".to_string());
        }
        if refresh_viewer {
            state.sync_viewer(&ViewerQuery::from_result(
                services.viewers.current_viewer(),
            ));
        }
    }

    let mut output = render_post(&post, &state.view(&viewer_id), now);
    for note in notes {
        let _ = writeln!(output, "note: {note}");
    }
    Ok(output)
}

pub fn render_post(post: &Post, stats: &PostStatsView, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "post {}", post.id);
    if !post.caption.is_empty() {
        let _ = writeln!(out, "{}", post.caption);
    }

    let mut byline = Vec::new();
    if let Some(creator) = &post.creator {
        if !creator.username.is_empty() {
            byline.push(format!("@{}", creator.username));
        } else if !creator.name.is_empty() {
            byline.push(creator.name.clone());
        }
    }
    if let Some(created_at) = post.created_at {
        byline.push(relative_time(created_at, now));
    }
    if !post.location.is_empty() {
        byline.push(post.location.clone());
    }
    if !byline.is_empty() {
        let _ = writeln!(out, "{}", byline.join(" · "));
    }
    if !post.tags.is_empty() {
        let tags: Vec<String> = post.tags.iter().map(|tag| format!("#{tag}")).collect();
        let _ = writeln!(out, "{}", tags.join(" "));
    }

    let liked = match stats.like_icon {
        LikeIcon::Liked => "liked",
        LikeIcon::Unliked => "not liked",
    };
    let saved = match stats.save_icon {
        SaveIcon::Saved => "saved",
        SaveIcon::Unsaved => "not saved",
    };
    let _ = writeln!(out, "likes: {} ({}) · {}", stats.like_count, liked, saved);
    out
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("SNAPGRAM_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
