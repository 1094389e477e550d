//! 티어 상태 확인.

use super::{connect_database, partition_store};
use anyhow::Result;
use ohlcv_store::StoreConfig;

pub async fn health(config: &StoreConfig) -> Result<()> {
    let store = partition_store(config);
    let warm_ok = store.base_path().is_dir();
    println!(
        "warm : {} ({})",
        if warm_ok { "ok" } else { "missing" },
        store.base_path().display()
    );

    let hot_ok = match connect_database(config).await {
        Ok(db) => match db.health_check().await {
            Ok(ok) => ok,
            Err(e) => {
                println!("hot  : error ({})", e);
                false
            }
        },
        Err(e) => {
            println!("hot  : error ({:#})", e);
            false
        }
    };
    if hot_ok {
        println!("hot  : ok");
    }

    match &config.archive {
        Some(archive) => println!("cold : configured (bucket {})", archive.bucket),
        None => println!("cold : not configured"),
    }

    if warm_ok && hot_ok {
        Ok(())
    } else {
        anyhow::bail!("일부 티어를 사용할 수 없습니다")
    }
}
