use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use termbook_cache::{CachePhase, InstallReport, Manifest};
use termbook_cli::{init_tracing, load_settings, open_cache, progress_bar};
use termbook_core::types::{GenerationTag, ResourceRequest};
use termbook_update::{Decision, DirReleaseSource, Reloader, UpdateNotifier, UpdatePrompt};

fn usage(prog: &str) -> ! {
    eprintln!("Usage: {} <release|install|activate|fetch|status|watch> [args...]", prog);
    eprintln!("  release [release_dir]    print the manifest and tag of a release");
    eprintln!("  install [release_dir]    stage a release as a new generation");
    eprintln!("  activate [tag]           activate a generation (staged one by default)");
    eprintln!("  fetch <url>              serve a resource through the cache");
    eprintln!("  status                   show active and staged generations");
    eprintln!("  watch                    poll for releases and offer updates");
    std::process::exit(1);
}

struct ConsolePrompt;

impl UpdatePrompt for ConsolePrompt {
    fn offer(&self, tag: &GenerationTag) {
        println!("\n🔔 A new version is available ({}). Reload now? [y/n]", tag);
    }
}

struct ConsoleReloader;

impl Reloader for ConsoleReloader {
    fn reload(&self) {
        println!("🔄 Reloading on the new version");
    }
}

fn print_report(report: &InstallReport) {
    println!("📦 {}: {}/{} resources stored", report.tag, report.stored.len(), report.total);
    for (url, reason) in &report.failed {
        println!("  ❌ {} ({})", url, reason);
    }
    if report.already_active {
        println!("  already active; nothing to do");
    } else if report.activated {
        println!("  ✅ first generation; activated");
    } else if report.is_complete() {
        println!("  ✅ staged; waiting for activation");
    } else {
        println!("  ⚠️  incomplete; it will not be activated");
    }
    if let Some(old) = &report.superseded {
        println!("  replaced earlier staged generation {}", old);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let settings = load_settings()?;

    let mut args: Vec<String> = env::args().collect();
    let prog = args.remove(0);
    if args.is_empty() {
        usage(&prog);
    }
    let cmd = args.remove(0);
    let release_dir = args.first().map(PathBuf::from).unwrap_or_else(|| settings.release_dir());
    let prefix = settings.cache.tag_prefix.clone();

    match cmd.as_str() {
        "release" => {
            let release = Manifest::from_release_dir(&release_dir, &prefix)?;
            println!("🏷️  {}", release.tag);
            println!("{}", release.manifest.to_json()?);
        }
        "install" => {
            let release = Manifest::from_release_dir(&release_dir, &prefix)?;
            let cache = open_cache(&settings).await?;
            let pb = progress_bar(release.manifest.len() as u64, "resources");
            println!("📦 Installing {}", release.tag);
            let report = cache
                .install_with_progress(&release.tag, &release.manifest, &|url, _| {
                    pb.set_message(url.to_string());
                    pb.inc(1);
                })
                .await?;
            pb.finish_and_clear();
            print_report(&report);
        }
        "activate" => {
            let cache = open_cache(&settings).await?;
            let activated = match args.first() {
                Some(tag) => {
                    let tag = GenerationTag::new(tag.as_str());
                    cache.activate(&tag).await?;
                    Some(tag)
                }
                None => cache.promote_staged().await?,
            };
            match activated {
                Some(tag) => println!("✅ {} is now active", tag),
                None => println!("Nothing complete is staged"),
            }
        }
        "fetch" => {
            let Some(url) = args.first() else { usage(&prog) };
            let cache = open_cache(&settings).await?;
            let (response, revalidation) = cache.fetch_with_revalidation(&ResourceRequest::get(url.as_str())).await?;
            println!("{} {} bytes", response.status, response.body.len());
            for (name, value) in &response.headers {
                println!("{}: {}", name, value);
            }
            println!("\n{}", String::from_utf8_lossy(&response.body));
            println!("\nrevalidation: {:?}", revalidation.settled().await);
        }
        "status" => {
            let cache = open_cache(&settings).await?;
            match cache.phase().await {
                CachePhase::NoCache => println!("No generation installed"),
                CachePhase::Installing { tag, .. } => println!("Installing {}", tag),
                CachePhase::Activating { tag } => println!("Activating {}", tag),
                CachePhase::Installed { active, staged } => {
                    match active {
                        Some(tag) => println!("active: {}", tag),
                        None => println!("active: none"),
                    }
                    match staged {
                        Some(s) if s.complete => println!("staged: {} (complete)", s.tag),
                        Some(s) => println!("staged: {} (missing {})", s.tag, s.missing.join(", ")),
                        None => println!("staged: none"),
                    }
                }
            }
        }
        "watch" => {
            let cache = open_cache(&settings).await?;
            let (directives, rx) = mpsc::channel(8);
            let listener = cache.spawn_directive_listener(rx);
            let notifier = UpdateNotifier::connect(
                cache.clone(),
                directives,
                Arc::new(DirReleaseSource::new(&release_dir, prefix)),
                Arc::new(ConsolePrompt),
                Arc::new(ConsoleReloader),
                Duration::from_secs(settings.update.poll_interval_secs),
            )
            .await;

            let (decide, decisions) = mpsc::channel(4);
            tokio::spawn(async move {
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let decision = match line.trim() {
                        "y" | "yes" => Decision::Accept,
                        "n" | "no" => Decision::Dismiss,
                        _ => continue,
                    };
                    if decide.send(decision).await.is_err() {
                        break;
                    }
                }
            });

            println!("👀 Watching {} (ctrl-c to stop)", release_dir.display());
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            let notifier = notifier.run(decisions, shutdown).await;
            drop(notifier);
            listener.abort();
        }
        _ => {
            eprintln!("Unknown command: {}", cmd);
            usage(&prog);
        }
    }
    Ok(())
}
