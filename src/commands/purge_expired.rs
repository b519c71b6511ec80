use tracing::info;

use crate::App;

pub async fn run(app: App) -> anyhow::Result<()> {
    let deleted = app.store.delete_expired().await?;
    let remaining = app.store.count().await?;
    info!("deleted {deleted} expired pastes, {remaining} remain");
    Ok(())
}
