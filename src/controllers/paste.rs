use std::net::IpAddr;

use tracing::info;

use crate::error::ApiError;
use crate::models::{NewPaste, Paste, PasteSummary};
use crate::App;

pub async fn create(app: &App, ip: IpAddr, new: NewPaste) -> crate::ApiResult<Paste> {
    app.rate_limits.new_pastes.check_and_use(ip).await?;

    let paste = app.store.create(new).await?;
    info!(
        "new paste: id='{id}', size={size}, one_use={one_use}",
        id = paste.id,
        size = paste.body.len(),
        one_use = paste.one_use,
    );
    Ok(paste)
}

pub async fn fetch(app: &App, ip: IpAddr, id: &str) -> crate::ApiResult<Paste> {
    app.rate_limits.get_pastes.check_and_use(ip).await?;
    Ok(app.store.get(id).await?)
}

pub async fn list(
    app: &App,
    ip: IpAddr,
    limit: i64,
    offset: i64,
) -> crate::ApiResult<Vec<PasteSummary>> {
    app.rate_limits.get_pastes.check_and_use(ip).await?;
    Ok(app.store.list(limit, offset).await?)
}

/// Replace the contents of an editable paste, keeping its identity.
pub async fn update(app: &App, ip: IpAddr, id: &str, changes: NewPaste) -> crate::ApiResult<()> {
    app.rate_limits.new_pastes.check_and_use(ip).await?;

    let existing = app.store.find(id).await?;
    if !existing.is_editable {
        return Err(ApiError::NotEditable);
    }

    let paste = changes.into_paste(existing.id, existing.create_time);
    app.store.update(&paste).await?;
    info!("updated paste: id='{id}'");
    Ok(())
}

/// Remove a paste on behalf of the operator; never exposed over HTTP.
pub async fn delete(app: &App, id: &str) -> crate::ApiResult<()> {
    app.store.delete(id).await?;
    info!("deleted paste: id='{id}'");
    Ok(())
}
