use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use termbook_cli::{init_tracing, load_settings, open_store, progress_bar, PrintSink};
use termbook_client::OfflineClient;
use termbook_store::{JsonDirSource, LoadOutcome};

fn usage(prog: &str) -> ! {
    eprintln!("Usage: {} <populate|count|window|search> [args...]", prog);
    eprintln!("  populate [dictionary_dir]");
    eprintln!("  count [collection]");
    eprintln!("  window <collection> [--scroll PX] [--viewport PX]");
    eprintln!("  search <term> [--limit N]");
    std::process::exit(1);
}

fn parse_args() -> (String, String, Vec<String>) {
    let mut args: Vec<String> = env::args().collect();
    let prog = args.remove(0);
    if args.is_empty() {
        usage(&prog);
    }
    let cmd = args.remove(0);
    (prog, cmd, args)
}

fn flag_value<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    let i = args.iter().position(|a| a == flag)?;
    match args.get(i + 1).map(|v| v.parse::<T>()) {
        Some(Ok(v)) => Some(v),
        _ => {
            eprintln!("Error: {} requires a number", flag);
            std::process::exit(1);
        }
    }
}

fn positional(args: &[String]) -> Option<&String> {
    let mut i = 0;
    while i < args.len() {
        if args[i].starts_with("--") {
            i += 2;
            continue;
        }
        return args.get(i);
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let settings = load_settings()?;
    let (prog, cmd, args) = parse_args();

    match cmd.as_str() {
        "populate" => {
            let dir = positional(&args).map(PathBuf::from).unwrap_or_else(|| settings.source_dir());
            println!("Populating from {}", dir.display());
            let store = open_store(&settings).await?;
            let source = JsonDirSource::new(&dir);
            for stray in source.unregistered_files(store.registry()) {
                println!("⚠️  {} matches no configured collection; skipped", stray.display());
            }

            let pb = progress_bar(store.registry().len() as u64, "collections");
            let loads = store.collections().map(|handle| {
                let (store, source, pb) = (&store, &source, pb.clone());
                async move {
                    pb.set_message(handle.name.to_string());
                    let outcome = store.load(handle.name.as_str(), source).await;
                    pb.inc(1);
                    (handle.name.clone(), outcome)
                }
            });
            let outcomes = join_all(loads).await;
            pb.finish_with_message("done");

            let mut failed = 0usize;
            for (name, outcome) in outcomes {
                match outcome {
                    Ok(LoadOutcome::Loaded(n)) => println!("  ✅ {:<20} loaded {} records", name, n),
                    Ok(LoadOutcome::Skipped { existing }) => {
                        println!("  ⏭️  {:<20} already has {} records", name, existing)
                    }
                    Ok(LoadOutcome::Empty) => println!("  ∅  {:<20} source is empty", name),
                    Err(e) => {
                        failed += 1;
                        println!("  ❌ {:<20} {}", name, e);
                    }
                }
            }
            if failed > 0 {
                println!("\n{} collection(s) failed; they stay empty and load on the next run.", failed);
            } else {
                println!("\n✅ Population complete");
            }
        }
        "count" => {
            let store = open_store(&settings).await?;
            let names: Vec<String> = match positional(&args) {
                Some(name) => vec![name.clone()],
                None => store.collections().map(|h| h.name.to_string()).collect(),
            };
            for name in names {
                println!("{:<20} {}", name, store.count(&name).await?);
            }
        }
        "window" => {
            let Some(collection) = positional(&args).cloned() else { usage(&prog) };
            let scroll: f64 = flag_value(&args, "--scroll").unwrap_or(0.0);
            let viewport: f64 = flag_value(&args, "--viewport").unwrap_or(450.0);
            let client = OfflineClient::start(settings, Arc::new(PrintSink), viewport).await?;
            client.windows().select_collection(Some(collection.as_str())).await?;
            if scroll > 0.0 {
                client.windows().on_scroll(scroll);
                client.windows().next_frame().await?;
            }
            client.shutdown().await;
        }
        "search" => {
            let Some(term) = positional(&args).cloned() else { usage(&prog) };
            let limit: Option<usize> = flag_value(&args, "--limit");
            let mut settings = settings;
            if let Some(limit) = limit {
                settings.store.search_limit = limit;
            }
            let client = OfflineClient::start(settings, Arc::new(PrintSink), 0.0).await?;
            let hits = client.search(&term).await?;
            println!("🔍 Found {} results for: \"{}\"", hits.len(), term);
            for (i, hit) in hits.iter().enumerate() {
                println!("\n  {}. [{}] {}", i + 1, hit.collection, hit.record.term);
                println!("     📝 {}", hit.record.definition);
            }
            client.shutdown().await;
        }
        _ => {
            eprintln!("Unknown command: {}", cmd);
            usage(&prog);
        }
    }
    Ok(())
}
