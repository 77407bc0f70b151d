use std::io::Write;

use anyhow::Context;
use bytes::Bytes;
use resload::Loader;

use super::exit_code_for;
use crate::cli::args::GetArgs;
use crate::exit_codes::EXIT_SUCCESS;

pub async fn run(loader: &Loader, args: GetArgs) -> anyhow::Result<i32> {
    let object = match loader.load(&args.url, None).await {
        Ok(object) => object,
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(exit_code_for(&e));
        }
    };

    let bytes = object
        .downcast::<Bytes>()
        .context("raw load did not yield bytes")?;

    match &args.out {
        Some(path) => {
            std::fs::write(path, &bytes[..])
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(url = %args.url, size = bytes.len(), out = %path.display(), "saved resource");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes[..])?;
            stdout.flush()?;
        }
    }

    Ok(EXIT_SUCCESS)
}
