//! Add command handler: register a download.

use anyhow::{Context, Result, bail};
use chunkdl::download::HashAlgorithm;
use chunkdl::{DownloadEngine, NewDownload};
use tracing::warn;
use url::Url;

use crate::cli::AddArgs;

pub async fn run_add_command(engine: &DownloadEngine, args: &AddArgs) -> Result<()> {
    for url in std::iter::once(&args.url).chain(&args.mirrors) {
        let parsed = Url::parse(url).with_context(|| format!("invalid URL: {url}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("unsupported URL scheme for {url}: only http and https are supported");
        }
    }
    if HashAlgorithm::for_expected(&args.hash).is_none() {
        warn!(hash = %args.hash, "hash is neither MD5 nor SHA-256; the download cannot be verified");
    }

    let mut new = NewDownload::new(args.hash.trim(), &args.url, &args.dest)
        .with_mirrors(args.mirrors.clone());
    new.priority = args.priority;
    if let Some(size) = args.size {
        new = new.with_size(size);
    }
    if let Some(title) = &args.title {
        new = new.with_title(title);
    }

    let (id, created) = engine.add(&new).await?;
    if created {
        println!("Added download #{id}");
    } else {
        println!("Download #{id} already exists for hash {}", args.hash.trim());
    }
    Ok(())
}
