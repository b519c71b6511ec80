use serde::{Deserialize, Serialize};

use crate::models::Paste;

#[derive(Debug, Serialize)]
pub struct CreatedPaste {
    pub id: String,
    pub create_time: i64,
    pub delete_time: i64,
}

impl From<&Paste> for CreatedPaste {
    fn from(paste: &Paste) -> Self {
        CreatedPaste {
            id: paste.id.clone(),
            create_time: paste.create_time,
            delete_time: paste.delete_time,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
