use resload::Loader;

use super::exit_code_for;
use crate::cli::args::KeyArgs;
use crate::exit_codes::{EXIT_NOT_CACHED, EXIT_SUCCESS};

pub async fn inspect(loader: &Loader, args: KeyArgs) -> anyhow::Result<i32> {
    let entry = match loader.cached_entry(&args.url).await {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            eprintln!("not cached: {}", args.url);
            return Ok(EXIT_NOT_CACHED);
        }
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(exit_code_for(&e));
        }
    };

    let report = serde_json::json!({
        "url": args.url,
        "size": entry.size,
        "etag": entry.meta.etag,
        "content_type": entry.meta.content_type,
        "fetched_at": entry.meta.fetched_at,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(EXIT_SUCCESS)
}

pub async fn remove(loader: &Loader, args: KeyArgs) -> anyhow::Result<i32> {
    match loader.remove_from_cache(&args.url).await {
        Ok(()) => {
            tracing::info!(url = %args.url, "removed from cache");
            Ok(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("error: {}", e);
            Ok(exit_code_for(&e))
        }
    }
}

pub async fn clear(loader: &Loader) -> anyhow::Result<i32> {
    loader.clear_cache().await?;
    tracing::info!("cache cleared");
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::CacheArgs;
    use crate::cli::commands::build_loader;
    use crate::exit_codes::EXIT_CONFIG_ERROR;
    use tempfile::TempDir;

    fn loader(dir: &TempDir) -> Loader {
        let args = CacheArgs {
            cache_dir: Some(dir.path().to_path_buf()),
            memory_capacity: Some(0),
            concurrency: Some(1),
        };
        build_loader(&args, false).unwrap()
    }

    #[tokio::test]
    async fn test_inspect_missing_entry() {
        let dir = TempDir::new().unwrap();
        let code = inspect(
            &loader(&dir),
            KeyArgs {
                url: "https://example.com/none.png".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(code, EXIT_NOT_CACHED);
    }

    #[tokio::test]
    async fn test_remove_rejects_empty_key() {
        let dir = TempDir::new().unwrap();
        let code = remove(&loader(&dir), KeyArgs { url: " ".into() })
            .await
            .unwrap();
        assert_eq!(code, EXIT_CONFIG_ERROR);
    }

    #[tokio::test]
    async fn test_clear_empty_cache() {
        let dir = TempDir::new().unwrap();
        let loader = loader(&dir);
        assert_eq!(clear(&loader).await.unwrap(), EXIT_SUCCESS);
        assert!(loader.config().should_persist_to_disk);
        assert_eq!(loader.config().cache_dir.as_deref(), Some(dir.path()));
    }
}
