// SPDX-License-Identifier: MIT OR Apache-2.0
//! `joint` command line tool.
//!
//! Validates, searches, browses and plays Joint graph assets without opening
//! the editor.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use joint::{
    AssetRef, AssetStore, ExecutionEngine, ExecutionEvent, FileAssetStore, JointGraph, JointSettings, KeyKind,
    NodeId, ResumeOutcome, SearchIndex, Signal,
};
use joint_editor::watcher::changed_assets;
use joint_editor::{AssetEvent, AssetWatcher, EditorSettings, SearchTree, SearchTreeFilter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Joint graph tool
#[derive(Parser, Debug)]
#[command(name = "joint", version)]
#[command(about = "Validate, search and play Joint graph assets", long_about = None)]
struct Args {
    /// Editor settings file (RON)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load an asset and report structural problems
    Validate {
        /// Asset file (.joint or .json)
        asset: PathBuf,
    },
    /// Rank nodes of an asset against a query
    Search {
        /// Asset file
        asset: PathBuf,
        /// Query text
        query: String,
        /// Restrict matches to one key kind
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        /// Accept subsequence matches
        #[arg(long)]
        fuzzy: bool,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a graph from an entry node, feeding signals when it suspends
    Play {
        /// Asset file
        asset: PathBuf,
        /// Name of the entry node
        #[arg(long)]
        entry: String,
        /// Tags delivered in order whenever the run suspends
        #[arg(long = "signal")]
        signals: Vec<String>,
    },
    /// Print the outliner tree of an asset
    Tree {
        /// Asset file
        asset: PathBuf,
        /// Text filter
        #[arg(long)]
        filter: Option<String>,
        /// Required tags
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Require exact tag matches
        #[arg(long)]
        exact: bool,
        /// Only list matching nodes
        #[arg(long)]
        flatten: bool,
    },
    /// Report asset changes below a directory
    Watch {
        /// Directory to watch
        dir: PathBuf,
        /// Stop after this many seconds without events
        #[arg(long)]
        idle_secs: Option<u64>,
    },
    /// Print the active settings as RON
    Settings,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Name,
    Tag,
    Category,
}

impl From<KindArg> for KeyKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Name => KeyKind::Name,
            KindArg::Tag => KeyKind::Tag,
            KindArg::Category => KeyKind::Category,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("joint=info,joint_editor=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let settings = match &args.settings {
        Some(path) => EditorSettings::load(path).with_context(|| format!("reading {}", path.display()))?,
        None => EditorSettings::default(),
    };

    match args.command {
        Command::Validate { asset } => validate(&asset),
        Command::Search {
            asset,
            query,
            kind,
            fuzzy,
            json,
        } => search(&settings.runtime, &asset, &query, kind, fuzzy, json),
        Command::Play { asset, entry, signals } => play(&settings.runtime, &asset, &entry, &signals),
        Command::Tree {
            asset,
            filter,
            tags,
            exact,
            flatten,
        } => tree(&asset, filter, tags, exact, flatten),
        Command::Watch { dir, idle_secs } => watch(&settings, &dir, idle_secs),
        Command::Settings => {
            println!("{}", settings.to_ron()?);
            Ok(())
        }
    }
}

/// Split a file path into a store rooted at its directory and the asset name
fn open_store(path: &Path) -> Result<(FileAssetStore, AssetRef)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} is not an asset file", path.display()))?;
    let root = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    Ok((FileAssetStore::new(root), AssetRef::new(name)))
}

fn load(path: &Path) -> Result<JointGraph> {
    let (store, asset) = open_store(path)?;
    store.load(&asset).with_context(|| format!("loading {}", path.display()))
}

fn validate(path: &Path) -> Result<()> {
    let graph = load(path)?;
    println!(
        "{}: ok ({} nodes, {} roots, {} edges)",
        path.display(),
        graph.node_count(),
        graph.roots().len(),
        graph.edge_count()
    );
    Ok(())
}

fn search(
    settings: &JointSettings,
    path: &Path,
    query: &str,
    kind: Option<KindArg>,
    fuzzy: bool,
    json: bool,
) -> Result<()> {
    let graph = load(path)?;
    let mut config = settings.search.clone();
    config.fuzzy |= fuzzy;
    let index = SearchIndex::build(&graph, config);

    let hits = match kind {
        Some(kind) => index.hits_with(query, kind.into()),
        None => index.hits(query),
    };

    if json {
        let rows: Vec<_> = hits
            .iter()
            .map(|hit| {
                serde_json::json!({
                    "node": hit.node.to_string(),
                    "name": graph.node(hit.node).map(|n| n.name.as_str()),
                    "rank": format!("{:?}", hit.rank),
                    "key": hit.key,
                    "kind": hit.kind,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for hit in &hits {
            let name = graph.node(hit.node).map_or("?", |n| n.name.as_str());
            println!("{:<10} {:<24} {:?} \"{}\"", format!("{:?}", hit.rank), name, hit.kind, hit.key);
        }
        if hits.is_empty() {
            println!("No matches for \"{query}\"");
        }
    }
    Ok(())
}

fn play(settings: &JointSettings, path: &Path, entry: &str, signals: &[String]) -> Result<()> {
    let graph = Arc::new(load(path)?);
    let entry = graph
        .find_by_name(entry)
        .map(|n| n.id)
        .with_context(|| format!("no node named \"{entry}\""))?;

    let mut engine = ExecutionEngine::new(Arc::clone(&graph), settings.execution.clone());
    let names = Arc::clone(&graph);
    engine.subscribe(Box::new(move |event: &ExecutionEvent| {
        let name = |id: NodeId| names.node(id).map_or_else(|| id.to_string(), |n| n.name.clone());
        match event {
            ExecutionEvent::NodeBegin(node) => println!("> {}", name(*node)),
            ExecutionEvent::Suspended { node, wait } => println!("~ {} waits for {wait:?}", name(*node)),
            ExecutionEvent::Resumed { node } => println!("< {} resumed", name(*node)),
            ExecutionEvent::Aborted { reason: Some(reason) } => println!("! aborted: {reason}"),
            _ => {}
        }
    }));

    engine.start(entry)?;
    let mut pending = signals.iter();
    loop {
        let report = engine.run()?;
        if report.state.is_finished() {
            break;
        }
        if report.budget_exhausted {
            continue;
        }
        let Some(tag) = pending.next() else {
            bail!("run suspended with no signals left (waiting for {:?})", engine.pending_wait());
        };
        if engine.resume(Signal::new(tag.as_str()))? == ResumeOutcome::StillWaiting {
            println!("  signal {tag} ignored");
        }
    }

    println!("Finished: {:?}", engine.state());
    for (name, value) in engine.blackboard().variables() {
        println!("  {name} = {value:?}");
    }
    Ok(())
}

fn tree(path: &Path, filter: Option<String>, tags: Vec<String>, exact: bool, flatten: bool) -> Result<()> {
    let graph = load(path)?;
    let mut tree = SearchTree::build(&graph);
    tree.flatten = flatten;
    tree.set_filter(SearchTreeFilter {
        text: filter.unwrap_or_default(),
        tags: tags.into_iter().map(Into::into).collect(),
        exact_tags: exact,
    });
    for row in tree.visible() {
        println!("{}{} [{}]", "  ".repeat(row.depth), row.item.label, row.item.category);
    }
    Ok(())
}

fn watch(settings: &EditorSettings, dir: &Path, idle_secs: Option<u64>) -> Result<()> {
    let mut watcher = AssetWatcher::new(settings.watcher_config())?;
    watcher.watch(dir)?;
    let idle = idle_secs.map(Duration::from_secs);
    loop {
        let Some(first) = watcher.wait_event(idle.unwrap_or(Duration::from_secs(3600))) else {
            if idle.is_some() {
                return Ok(());
            }
            continue;
        };
        let mut events = vec![first];
        events.extend(watcher.poll_events());
        for path in changed_assets(&events) {
            println!("changed: {}", path.display());
        }
        for event in &events {
            match event {
                AssetEvent::Deleted(path) => println!("deleted: {}", path.display()),
                AssetEvent::Error(message) => tracing::warn!(%message, "Watcher error"),
                _ => {}
            }
        }
    }
}
