use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A stored paste.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Paste {
    pub id: String,
    pub title: String,
    pub body: String,
    pub syntax: String,
    pub create_time: i64,
    pub delete_time: i64,
    pub one_use: bool,
    pub author: String,
    pub author_email: String,
    pub author_url: String,
    pub is_file: bool,
    pub file_name: String,
    pub mime_type: String,
    pub is_editable: bool,
    pub is_private: bool,
    pub is_url: bool,
    pub original_url: String,
}

impl Paste {
    /// Whether the paste has passed its delete time at `now`.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.delete_time > 0 && self.delete_time < now
    }
}

/// Client-supplied fields of a paste; the store assigns the rest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewPaste {
    pub title: String,
    pub body: String,
    pub syntax: String,
    /// Unix seconds; `0` keeps the paste forever.
    pub delete_time: i64,
    pub one_use: bool,
    pub author: String,
    pub author_email: String,
    pub author_url: String,
    pub is_file: bool,
    pub file_name: String,
    pub mime_type: String,
    pub is_editable: bool,
    pub is_private: bool,
    pub is_url: bool,
    pub original_url: String,
}

impl NewPaste {
    pub(crate) fn into_paste(self, id: String, create_time: i64) -> Paste {
        Paste {
            id,
            title: self.title,
            body: self.body,
            syntax: self.syntax,
            create_time,
            delete_time: self.delete_time.max(0),
            one_use: self.one_use,
            author: self.author,
            author_email: self.author_email,
            author_url: self.author_url,
            is_file: self.is_file,
            file_name: self.file_name,
            mime_type: self.mime_type,
            is_editable: self.is_editable,
            is_private: self.is_private,
            is_url: self.is_url,
            original_url: self.original_url,
        }
    }
}

/// Listing projection of a paste, without its body.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct PasteSummary {
    pub id: String,
    pub title: String,
    pub syntax: String,
    pub create_time: i64,
    pub delete_time: i64,
    pub author: String,
    pub is_file: bool,
    pub file_name: String,
    pub is_url: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_ignores_zero_delete_time() {
        let mut paste = NewPaste::default().into_paste("00".into(), 100);
        assert!(!paste.is_expired_at(i64::MAX));

        paste.delete_time = 150;
        assert!(!paste.is_expired_at(150));
        assert!(paste.is_expired_at(151));
    }

    #[test]
    fn negative_delete_time_is_never() {
        let new = NewPaste {
            delete_time: -20,
            ..Default::default()
        };
        assert_eq!(new.into_paste("00".into(), 100).delete_time, 0);
    }
}
