use anyhow::Context;

use crate::controllers::paste;
use crate::App;

pub async fn run(app: App, id: &str) -> anyhow::Result<()> {
    paste::delete(&app, id)
        .await
        .with_context(|| format!("failed to delete paste {id}"))
}
