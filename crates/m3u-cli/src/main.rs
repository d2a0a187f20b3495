mod config;

use std::collections::HashMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use console::{style, StyledObject};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use m3u_core::{
    read_local, Blacklist, Channel, HttpLoader, LinkSource, LinkSourceManager, MatchMode,
    Playlist, PlaylistEditor, ProbeConfig, RepairSummary, Resolution, ResolveSettings, SortKey,
    UrlStatus, WorkerPool,
};

use crate::config::AppConfig;

type CliResult = Result<(), Box<dyn Error>>;

const BLACKLIST_FILE: &str = "blacklist.json";

fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");

    if GIT_HASH.is_empty() {
        VERSION
    } else {
        // Called once; lives for the program's lifetime.
        Box::leak(format!("{VERSION} ({GIT_HASH})").into_boxed_str())
    }
}

/// Check IPTV playlists for dead links and repair them from donor playlists.
#[derive(Parser)]
#[command(name = "m3u-doctor", version = version_string(), about)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the source registry, donor cache and blacklist.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe every link in a playlist and print a report.
    Check {
        playlist: PathBuf,

        /// Concurrent probes. Overrides config file.
        #[arg(long)]
        workers: Option<usize>,

        /// Per-request timeout in milliseconds. Overrides config file.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Only list channels with a missing or dead link.
        #[arg(long, default_value_t = false)]
        only_broken: bool,

        /// Print the report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Also list links shared by more than one channel.
        #[arg(long, default_value_t = false, conflicts_with = "json")]
        duplicates: bool,
    },
    /// Probe a playlist, then replace broken links from the link sources.
    Repair {
        playlist: PathBuf,

        /// Write the result here instead of overwriting the input.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Name matching mode: exact, similar or fuzzy.
        #[arg(long)]
        mode: Option<MatchMode>,

        /// Match threshold between 0 and 1 for the selected mode.
        #[arg(long)]
        threshold: Option<f64>,

        /// Show what would change without saving.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Only repair channels whose name contains this text.
        #[arg(long)]
        channel: Option<String>,
    },
    /// Normalise a playlist by reading and rewriting it.
    Fmt {
        playlist: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, value_enum)]
        sort: Option<SortArg>,
    },
    /// Manage donor playlists used for repairs.
    Sources {
        #[command(subcommand)]
        action: SourcesAction,
    },
    /// Manage channels that are dropped whenever a playlist is loaded.
    Blacklist {
        #[command(subcommand)]
        action: BlacklistAction,
    },
}

#[derive(Subcommand)]
enum SourcesAction {
    List,
    Add {
        name: String,

        /// File path or http(s) URL of the donor playlist.
        location: String,

        #[arg(long, default_value_t = 0)]
        priority: i32,

        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Refresh interval in hours; 0 disables automatic refresh.
        #[arg(long, default_value_t = 0)]
        auto_update_hours: u32,

        #[arg(long, default_value = "")]
        description: String,
    },
    Remove {
        name: String,
    },
    Enable {
        name: String,
    },
    Disable {
        name: String,
    },
    /// Reload one source, or every enabled source.
    Refresh {
        name: Option<String>,
    },
}

#[derive(Subcommand)]
enum BlacklistAction {
    List,
    Add {
        /// Case-insensitive substring of the channel name.
        #[arg(long)]
        name: Option<String>,

        /// Exact EPG id.
        #[arg(long)]
        tvg_id: Option<String>,
    },
    Remove {
        /// Entry number as shown by `blacklist list`.
        number: usize,
    },
    /// Drop blacklisted channels from a playlist.
    Apply {
        playlist: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Name,
    Group,
    Status,
}

impl From<SortArg> for SortKey {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Name => SortKey::Name,
            SortArg::Group => SortKey::Group,
            SortArg::Status => SortKey::Status,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let app = match AppConfig::load_or_default(cli.config.as_deref()) {
        Ok(c) => {
            init_tracing(&c.storage.log_format);
            c
        }
        Err(e) => {
            init_tracing("pretty");
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };
    let data_dir = cli.data_dir.clone().unwrap_or_else(|| app.data_dir());
    tracing::debug!(data_dir = %data_dir.display(), "Using data directory");

    let token = CancellationToken::new();
    tokio::spawn(shutdown_signal(token.clone()));

    let result = match cli.command {
        Commands::Check {
            playlist,
            workers,
            timeout_ms,
            only_broken,
            json,
            duplicates,
        } => {
            run_check(
                &app,
                &data_dir,
                &playlist,
                CheckOptions {
                    workers,
                    timeout_ms,
                    only_broken,
                    json,
                    duplicates,
                },
                token,
            )
            .await
        }
        Commands::Repair {
            playlist,
            output,
            mode,
            threshold,
            dry_run,
            channel,
        } => {
            let settings = resolve_settings(&app, mode, threshold);
            let opts = RepairOptions {
                output,
                dry_run,
                channel,
            };
            run_repair(&app, &data_dir, &playlist, opts, settings, token).await
        }
        Commands::Fmt {
            playlist,
            output,
            sort,
        } => run_fmt(&playlist, output, sort).await,
        Commands::Sources { action } => run_sources(&app, &data_dir, action, token).await,
        Commands::Blacklist { action } => run_blacklist(&app, &data_dir, action).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(1);
    }
}

struct CheckOptions {
    workers: Option<usize>,
    timeout_ms: Option<u64>,
    only_broken: bool,
    json: bool,
    duplicates: bool,
}

struct RepairOptions {
    output: Option<PathBuf>,
    dry_run: bool,
    channel: Option<String>,
}

#[derive(Serialize)]
struct ChannelLine<'a> {
    index: usize,
    name: &'a str,
    group: &'a str,
    url: &'a str,
    status: UrlStatus,
}

async fn run_check(
    app: &AppConfig,
    data_dir: &Path,
    playlist: &Path,
    opts: CheckOptions,
    token: CancellationToken,
) -> CliResult {
    let mut probe = app.probe.to_probe_config();
    if let Some(w) = opts.workers {
        probe = probe.with_workers(w);
    }
    if let Some(t) = opts.timeout_ms {
        probe = probe.with_request_timeout(t);
    }

    let mut editor = open_editor(app, data_dir, probe);
    let removed = editor.load_playlist(playlist).await?;
    if !opts.json {
        print_loaded(&editor, playlist, removed);
    }

    let targets = editor.playlist().probe_plan().len() as u64;
    let bar = progress_bar(targets, "Checking", opts.json);
    let summary = editor
        .check_all(token, |report, _| bar.set_position(report.completed as u64))
        .await;
    bar.finish_and_clear();

    let channels = editor.playlist().channels();
    let shown = channels
        .iter()
        .enumerate()
        .filter(|(_, c)| !opts.only_broken || c.is_broken());

    if opts.json {
        let lines: Vec<ChannelLine<'_>> = shown
            .map(|(index, c)| ChannelLine {
                index,
                name: &c.name,
                group: c.group(),
                url: c.primary_url(),
                status: c.url_status,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&lines)?);
        return Ok(());
    }

    for (index, channel) in shown {
        println!(
            "  {:>4}  {}  {:<32} {}",
            index + 1,
            status_badge(channel),
            channel.name,
            style(channel.primary_url()).dim()
        );
    }

    let counts = editor.playlist().status_counts();
    println!();
    println!(
        "{} reachable, {} unreachable, {} unknown, {} without link",
        style(counts.reachable).green().bold(),
        style(counts.unreachable).red().bold(),
        style(counts.unknown).yellow(),
        style(counts.missing_url).red()
    );
    if summary.cancelled {
        println!("{}", style("Check cancelled; unchecked links stay unknown.").yellow());
    }

    if opts.duplicates {
        let groups = duplicate_groups(editor.playlist());
        println!();
        if groups.is_empty() {
            println!("{}", style("No shared links.").dim());
        }
        for (url, names) in groups {
            println!("  {} {}", style(url).bold(), style(format!("({} channels)", names.len())).dim());
            for name in names {
                println!("      {name}");
            }
        }
    }
    Ok(())
}

/// Links used by more than one channel, with the names of those channels.
fn duplicate_groups(playlist: &Playlist) -> Vec<(String, Vec<&str>)> {
    playlist
        .duplicate_urls()
        .into_iter()
        .map(|target| {
            let names = target
                .owners
                .iter()
                .filter_map(|&i| playlist.get(i).map(|c| c.name.as_str()))
                .collect();
            (target.url, names)
        })
        .collect()
}

/// Broken channels to repair, narrowed to names containing `filter`.
fn repair_targets(playlist: &Playlist, filter: Option<&str>) -> Result<Vec<usize>, String> {
    let mut broken = playlist.broken_indices();
    if let Some(filter) = filter {
        let wanted = playlist.find_by_name(filter);
        if wanted.is_empty() {
            return Err(format!("No channel name contains \"{filter}\""));
        }
        broken.retain(|i| wanted.contains(i));
    }
    Ok(broken)
}

fn repair_line(name: &str, resolution: &Resolution) -> String {
    match resolution {
        Resolution::Resolved { candidate, .. } => format!(
            "  {} {:<32} {} {}",
            style("fixed").green().bold(),
            name,
            candidate.url,
            style(format!("({})", candidate.source_name)).dim()
        ),
        Resolution::NotResolved { reason, tried } => format!(
            "  {} {:<32} {}",
            style("miss ").red(),
            name,
            style(format!("{reason}, {tried} tried")).dim()
        ),
    }
}

async fn run_repair(
    app: &AppConfig,
    data_dir: &Path,
    playlist: &Path,
    opts: RepairOptions,
    settings: ResolveSettings,
    token: CancellationToken,
) -> CliResult {
    let mut editor = open_editor(app, data_dir, app.probe.to_probe_config());
    if editor.sources().registry().enabled().next().is_none() {
        return Err("No enabled link sources; add one with `m3u-doctor sources add`".into());
    }
    let removed = editor.load_playlist(playlist).await?;
    print_loaded(&editor, playlist, removed);

    let targets = editor.playlist().probe_plan().len() as u64;
    let bar = progress_bar(targets, "Checking", false);
    editor
        .check_all(token.clone(), |report, _| bar.set_position(report.completed as u64))
        .await;
    bar.finish_and_clear();
    if token.is_cancelled() {
        return Err("Cancelled".into());
    }

    let broken = repair_targets(editor.playlist(), opts.channel.as_deref())?;
    if broken.is_empty() {
        let scope = if opts.channel.is_some() { "Matching links" } else { "All links" };
        println!("{}", style(format!("{scope} are reachable, nothing to repair.")).green());
        return Ok(());
    }
    let names: HashMap<usize, String> = broken
        .iter()
        .filter_map(|&i| editor.playlist().get(i).map(|c| (i, c.name.clone())))
        .collect();
    println!(
        "{} broken links, searching {} ({} mode)",
        style(broken.len()).red().bold(),
        style("link sources").bold(),
        settings.match_mode
    );

    let bar = progress_bar(broken.len() as u64, "Repairing", false);
    let summary = if opts.channel.is_some() {
        // a handful of named channels, resolved one after another
        let mut summary = RepairSummary {
            attempted: broken.len(),
            ..RepairSummary::default()
        };
        for (done, &index) in broken.iter().enumerate() {
            if token.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let resolution = editor.resolve_link(index, &settings).await?;
            if resolution.is_resolved() {
                summary.repaired += 1;
            } else {
                summary.unresolved += 1;
            }
            let name = names.get(&index).map(String::as_str).unwrap_or("?");
            bar.println(repair_line(name, &resolution));
            bar.set_position(done as u64 + 1);
        }
        summary
    } else {
        editor
            .repair_broken(&settings, token, |index, resolution, completed, _| {
                bar.set_position(completed as u64);
                let name = names.get(&index).map(String::as_str).unwrap_or("?");
                bar.println(repair_line(name, resolution));
            })
            .await
    };
    bar.finish_and_clear();

    println!();
    println!(
        "{} repaired, {} unresolved",
        style(summary.repaired).green().bold(),
        style(summary.unresolved).red().bold()
    );
    if summary.cancelled {
        println!("{}", style("Repair cancelled before every link was tried.").yellow());
    }

    if opts.dry_run {
        println!("{}", style("Dry run, playlist not written.").dim());
        return Ok(());
    }
    if summary.repaired == 0 && opts.output.is_none() {
        return Ok(());
    }
    let target = opts.output.unwrap_or_else(|| playlist.to_path_buf());
    editor.save_playlist(&target).await?;
    println!("Saved {}", style(target.display()).bold());
    Ok(())
}

async fn run_fmt(playlist: &Path, output: Option<PathBuf>, sort: Option<SortArg>) -> CliResult {
    let text = read_local(playlist).await?;
    let mut parsed = Playlist::parse(&text);
    if let Some(key) = sort {
        parsed.sort_by(key.into());
    }
    let target = output.unwrap_or_else(|| playlist.to_path_buf());
    tokio::fs::write(&target, parsed.to_text()).await?;
    println!(
        "Wrote {} channels to {}",
        parsed.len(),
        style(target.display()).bold()
    );
    Ok(())
}

async fn run_sources(
    app: &AppConfig,
    data_dir: &Path,
    action: SourcesAction,
    token: CancellationToken,
) -> CliResult {
    let mut manager = open_sources(data_dir, &app.probe.to_probe_config());
    app.seed_sources(&mut manager);

    match action {
        SourcesAction::List => {
            if manager.sources().is_empty() {
                println!("{}", style("No link sources registered.").dim());
            }
            for source in manager.sources() {
                let state = if source.enabled {
                    style("enabled ").green()
                } else {
                    style("disabled").dim()
                };
                let updated = source
                    .last_updated
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".into());
                println!(
                    "  {:<20} {} {:<6} prio={:<4} updated={:<16} {}",
                    style(&source.name).bold(),
                    state,
                    source.kind,
                    source.priority,
                    updated,
                    style(&source.location).dim()
                );
            }
        }
        SourcesAction::Add {
            name,
            location,
            priority,
            tags,
            auto_update_hours,
            description,
        } => {
            let mut source = LinkSource::new(name, location)
                .with_priority(priority)
                .with_tags(tags)
                .with_auto_update_hours(auto_update_hours);
            source.description = description;
            let name = source.name.clone();
            manager.register(source)?;
            println!("Added link source {}", style(name).bold());
        }
        SourcesAction::Remove { name } => {
            let removed = manager.remove(&name)?;
            println!("Removed link source {}", style(removed.name).bold());
        }
        SourcesAction::Enable { name } => {
            manager.set_enabled(&name, true)?;
            println!("Enabled {}", style(name).bold());
        }
        SourcesAction::Disable { name } => {
            manager.set_enabled(&name, false)?;
            println!("Disabled {}", style(name).bold());
        }
        SourcesAction::Refresh { name: Some(name) } => {
            let count = manager.refresh(&name).await?;
            println!("{} cached {} channels", style(name).bold(), count);
        }
        SourcesAction::Refresh { name: None } => {
            let settings = app.resolve.to_settings();
            let pool = WorkerPool::new(settings.workers, token);
            let spinner = ProgressBar::new_spinner().with_message("Refreshing link sources");
            spinner.enable_steady_tick(std::time::Duration::from_millis(120));
            let reports = manager.refresh_all(&pool).await;
            spinner.finish_and_clear();
            for report in reports {
                match report.result {
                    Ok(count) => println!(
                        "  {} {:<20} {} channels",
                        style("ok  ").green(),
                        report.source_name,
                        count
                    ),
                    Err(e) => println!(
                        "  {} {:<20} {}",
                        style("fail").red().bold(),
                        report.source_name,
                        style(e).dim()
                    ),
                }
            }
        }
    }
    Ok(())
}

async fn run_blacklist(app: &AppConfig, data_dir: &Path, action: BlacklistAction) -> CliResult {
    let path = data_dir.join(BLACKLIST_FILE);
    let mut blacklist = Blacklist::load(&path);

    match action {
        BlacklistAction::List => {
            if blacklist.is_empty() {
                println!("{}", style("Blacklist is empty.").dim());
            }
            for (i, entry) in blacklist.entries().iter().enumerate() {
                println!(
                    "  {:>3}  name={:<24} tvg-id={:<20} {}",
                    i + 1,
                    entry.name,
                    entry.tvg_id,
                    style(entry.added_date.format("%Y-%m-%d")).dim()
                );
            }
        }
        BlacklistAction::Add { name, tvg_id } => {
            let name = name.unwrap_or_default();
            let tvg_id = tvg_id.unwrap_or_default();
            if !blacklist.add(&name, &tvg_id) {
                return Err(
                    "Nothing added: give a --name or --tvg-id that is not already listed".into(),
                );
            }
            blacklist.save(&path)?;
            println!("Blacklist now has {} entries", blacklist.len());
        }
        BlacklistAction::Remove { number } => {
            let removed = number
                .checked_sub(1)
                .and_then(|i| blacklist.remove(i))
                .ok_or_else(|| format!("No blacklist entry {number}"))?;
            blacklist.save(&path)?;
            let label = display_entry(&removed.name, &removed.tvg_id);
            println!("Removed entry for {}", style(label).bold());
        }
        BlacklistAction::Apply { playlist, output } => {
            let mut editor = open_editor(app, data_dir, app.probe.to_probe_config());
            let removed = editor.load_playlist(&playlist).await?;
            let target = output.unwrap_or_else(|| playlist.clone());
            if removed > 0 || target != playlist {
                editor.save_playlist(&target).await?;
            }
            println!(
                "Removed {} channels, {} left in {}",
                style(removed).red().bold(),
                editor.playlist().len(),
                style(target.display()).bold()
            );
        }
    }
    Ok(())
}

fn display_entry(name: &str, tvg_id: &str) -> String {
    match (name.is_empty(), tvg_id.is_empty()) {
        (false, true) => name.to_string(),
        (true, false) => format!("tvg-id {tvg_id}"),
        _ => format!("{name} / tvg-id {tvg_id}"),
    }
}

/// Donor downloads identify themselves like the prober does.
fn open_sources(data_dir: &Path, probe: &ProbeConfig) -> LinkSourceManager {
    LinkSourceManager::open_with_loader(data_dir, Arc::new(HttpLoader::for_probe(probe)))
}

fn open_editor(app: &AppConfig, data_dir: &Path, probe: ProbeConfig) -> PlaylistEditor {
    let mut sources = open_sources(data_dir, &probe);
    app.seed_sources(&mut sources);
    let blacklist = Blacklist::load(&data_dir.join(BLACKLIST_FILE));
    PlaylistEditor::with_http_prober(probe, sources).with_blacklist(blacklist)
}

fn resolve_settings(
    app: &AppConfig,
    mode: Option<MatchMode>,
    threshold: Option<f64>,
) -> ResolveSettings {
    let mut settings = app.resolve.to_settings();
    if let Some(mode) = mode {
        settings = settings.with_match_mode(mode);
    }
    if let Some(t) = threshold {
        settings = match settings.match_mode {
            MatchMode::Similar => settings.with_similarity_threshold(t),
            MatchMode::Fuzzy => settings.with_fuzzy_threshold(t),
            MatchMode::Exact => settings,
        };
    }
    settings
}

fn print_loaded(editor: &PlaylistEditor, path: &Path, removed: usize) {
    let mut line = format!(
        "{} {} ({} channels",
        style("Loaded").bold(),
        path.display(),
        editor.playlist().len()
    );
    if removed > 0 {
        line.push_str(&format!(", {removed} blacklisted"));
    }
    line.push(')');
    println!("{line}");
}

fn status_badge(channel: &Channel) -> StyledObject<&'static str> {
    if !channel.has_url() {
        return style("MISSING").red().bold();
    }
    match channel.url_status {
        UrlStatus::Reachable => style("OK     ").green(),
        UrlStatus::Unreachable => style("DEAD   ").red().bold(),
        UrlStatus::Unknown => style("UNKNOWN").yellow(),
    }
}

fn progress_bar(len: u64, label: &'static str, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let bar_style =
        ProgressStyle::with_template("{spinner} {msg:<10} [{bar:32}] {pos}/{len} {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
    ProgressBar::new(len).with_style(bar_style).with_message(label)
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_format {
        "json" => {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
        _ => {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

/// Cancel `token` on Ctrl+C or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, cancelling");
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_nested_commands() {
        let cli = Cli::try_parse_from([
            "m3u-doctor",
            "--data-dir",
            "/tmp/m3u",
            "repair",
            "tv.m3u",
            "--mode",
            "similar",
            "--threshold",
            "0.75",
            "--dry-run",
            "--channel",
            "espn",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/m3u")));
        match cli.command {
            Commands::Repair {
                mode,
                threshold,
                dry_run,
                channel,
                ..
            } => {
                assert_eq!(mode, Some(MatchMode::Similar));
                assert_eq!(threshold, Some(0.75));
                assert!(dry_run);
                assert_eq!(channel.as_deref(), Some("espn"));
            }
            _ => panic!("expected repair"),
        }

        let cli = Cli::try_parse_from([
            "m3u-doctor",
            "sources",
            "add",
            "premium",
            "https://lists.example.com/a.m3u",
            "--priority",
            "10",
            "--tag",
            "sports",
            "--tag",
            "hd",
        ])
        .unwrap();
        match cli.command {
            Commands::Sources {
                action: SourcesAction::Add { priority, tags, .. },
            } => {
                assert_eq!(priority, 10);
                assert_eq!(tags, vec!["sports", "hd"]);
            }
            _ => panic!("expected sources add"),
        }
    }

    #[test]
    fn duplicates_flag_excludes_json() {
        let cli = Cli::try_parse_from(["m3u-doctor", "check", "tv.m3u", "--duplicates"]).unwrap();
        assert!(matches!(cli.command, Commands::Check { duplicates: true, .. }));
        let clash =
            Cli::try_parse_from(["m3u-doctor", "check", "tv.m3u", "--duplicates", "--json"]);
        assert!(clash.is_err());
    }

    #[test]
    fn shared_links_are_grouped_by_url() {
        let playlist = Playlist::parse(
            "#EXTM3U\n#EXTINF:-1,CNN\nhttp://a/cnn\n#EXTINF:-1,BBC\nhttp://a/bbc\n\
             #EXTINF:-1,CNN Backup\nhttp://a/cnn\n",
        );
        let groups = duplicate_groups(&playlist);
        assert_eq!(groups, vec![("http://a/cnn".to_string(), vec!["CNN", "CNN Backup"])]);
    }

    #[test]
    fn channel_filter_narrows_repair_targets() {
        let playlist = Playlist::parse(
            "#EXTM3U\n#EXTINF:-1,ESPN\n\n#EXTINF:-1,ESPN 2\n\n#EXTINF:-1,CNN\n\n",
        );
        assert_eq!(repair_targets(&playlist, None).unwrap(), vec![0, 1, 2]);
        assert_eq!(repair_targets(&playlist, Some("espn")).unwrap(), vec![0, 1]);
        assert!(repair_targets(&playlist, Some("Disney")).is_err());
    }

    #[test]
    fn cli_rejects_unknown_mode() {
        let parsed = Cli::try_parse_from(["m3u-doctor", "repair", "tv.m3u", "--mode", "magic"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn threshold_targets_selected_mode() {
        let app = AppConfig::default();
        let s = resolve_settings(&app, Some(MatchMode::Similar), Some(0.5));
        assert_eq!(s.similarity_threshold, 0.5);
        assert_eq!(s.fuzzy_threshold, ResolveSettings::default().fuzzy_threshold);

        let s = resolve_settings(&app, None, Some(0.4));
        assert_eq!(s.match_mode, MatchMode::Fuzzy);
        assert_eq!(s.threshold(), 0.4);
    }

    #[tokio::test]
    async fn fmt_sorts_and_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.m3u");
        let output = dir.path().join("out.m3u");
        std::fs::write(
            &input,
            "#EXTM3U\n#EXTINF:-1,Zeta\nhttp://a/z\n#EXTINF:-1,alpha\nhttp://a/a\n",
        )
        .unwrap();

        run_fmt(&input, Some(output.clone()), Some(SortArg::Name))
            .await
            .unwrap();
        let written = Playlist::parse(&std::fs::read_to_string(&output).unwrap());
        let names: Vec<_> = written.channels().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "Zeta"]);
    }

    #[tokio::test]
    async fn blacklist_commands_persist_and_apply() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let list = dir.path().join("tv.m3u");
        std::fs::write(
            &list,
            "#EXTM3U\n#EXTINF:-1,Disney Channel\nhttp://a/d\n#EXTINF:-1,CNN\nhttp://a/c\n",
        )
        .unwrap();
        let app = AppConfig::default();

        run_blacklist(
            &app,
            &data,
            BlacklistAction::Add {
                name: Some("disney".into()),
                tvg_id: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(Blacklist::load(&data.join(BLACKLIST_FILE)).len(), 1);

        run_blacklist(
            &app,
            &data,
            BlacklistAction::Apply {
                playlist: list.clone(),
                output: None,
            },
        )
        .await
        .unwrap();
        let left = Playlist::parse(&std::fs::read_to_string(&list).unwrap());
        assert_eq!(left.len(), 1);
        assert_eq!(left.channels()[0].name, "CNN");

        assert!(run_blacklist(&app, &data, BlacklistAction::Remove { number: 0 })
            .await
            .is_err());
        run_blacklist(&app, &data, BlacklistAction::Remove { number: 1 })
            .await
            .unwrap();
        assert!(Blacklist::load(&data.join(BLACKLIST_FILE)).is_empty());
    }
}
