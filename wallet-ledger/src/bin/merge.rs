//! Merge copies of a wallet into the local ledger
//!
//! ```text
//! wallet-merge <wallet-id> <copy-file>...
//! ```

use anyhow::{bail, Context};
use serde::Serialize;
use std::path::PathBuf;
use wallet_ledger::{
    Config, DirWallets, Id, JoinOptions, JoinReport, Metrics, Patch, SeededPatch, Wallet,
    WalletStore,
};

#[derive(Serialize)]
struct Summary {
    wallet: Id,
    copies: Vec<CopySummary>,
    modified: bool,
    metrics: String,
}

#[derive(Serialize)]
struct CopySummary {
    source: PathBuf,
    report: JoinReport,
}

fn main() -> anyhow::Result<()> {
    let config = match std::env::var("WALLET_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => Config::from_env()?,
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(id) = args.next() else {
        bail!("usage: wallet-merge <wallet-id> <copy-file>...");
    };
    let id: Id = id.parse()?;
    let copies: Vec<PathBuf> = args.map(PathBuf::from).collect();
    if copies.is_empty() {
        bail!("nothing to merge into {}", id);
    }

    let wallets = DirWallets::new(&config.wallets_dir, &config.network);
    let metrics = Metrics::new()?;
    let options = JoinOptions::from_config(&config.merge);

    // held until the merged ledger is saved
    let local = wallets.acquire(&id)?;
    let target = local.path().to_path_buf();

    let mut sources: Vec<(PathBuf, Wallet)> = Vec::new();
    if local.exists() {
        sources.push((target.clone(), Wallet::clone(&local)));
    }
    for path in copies {
        let copy = Wallet::new(&path, &config.network);
        let owner = copy.id().with_context(|| format!("reading {}", path.display()))?;
        if owner != id {
            bail!("{} is a copy of {}, not of {}", path.display(), owner, id);
        }
        sources.push((path, copy));
    }

    let mut patch: Option<SeededPatch<'_, DirWallets>> = None;
    let mut summary = Summary {
        wallet: id.clone(),
        copies: vec![],
        modified: false,
        metrics: String::new(),
    };
    for (source, copy) in sources {
        let mut pull = |payer: &Id| {
            // no transport here: report what would have to be fetched
            tracing::warn!(%payer, "Paying wallet must be pulled before this merge can prove it");
        };
        let hook: Option<&mut dyn FnMut(&Id)> = if config.merge.pull {
            Some(&mut pull)
        } else {
            None
        };
        let report = match patch.as_mut() {
            Some(seeded) => seeded.join(&copy, &options, hook)?,
            None => {
                let (seeded, report) = Patch::new(&wallets)
                    .with_metrics(metrics.clone())
                    .join(&copy, &options, hook)?;
                patch = Some(seeded);
                report
            }
        };
        tracing::info!(
            source = %source.display(),
            merged = report.merged,
            rejected = report.rejections.len(),
            "Copy joined"
        );
        summary.copies.push(CopySummary { source, report });
    }

    if let Some(seeded) = patch {
        summary.modified = seeded.save(&target, true)?;
    }
    drop(local);

    summary.metrics = metrics.render()?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
