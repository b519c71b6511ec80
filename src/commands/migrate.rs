use anyhow::Context;
use tracing::info;

use crate::config::Config;
use crate::db::Driver;
use crate::store::migrate::{migrate, Backend, MigrateOptions};

/// Copy pastes from a previous backend into the one configured now.
pub async fn run(config: Config, from_driver: Driver, from_source: String) -> anyhow::Result<()> {
    let src = Backend {
        driver: from_driver,
        source: from_source,
    };
    let dst = Backend {
        driver: config.database.driver,
        source: config.database.source.clone(),
    };
    let options = MigrateOptions::from(&config.database);

    let copied = migrate(&src, &dst, &options, |n| info!("{n} pastes copied so far"))
        .await
        .with_context(|| format!("migration from {} to {} failed", src.driver, dst.driver))?;

    info!("copied {copied} pastes into the {} database", dst.driver);
    Ok(())
}
