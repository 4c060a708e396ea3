use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::*;
use crate::types::TriageCorrection;

const CORRECTION_COLUMNS: &str = "id, workspace_id, conversation_id, original_classification,
        new_classification, original_requires_reply, new_requires_reply, sender_email,
        sender_domain, corrected_by, created_at";

fn map_correction_row(row: &Row<'_>) -> rusqlite::Result<TriageCorrection> {
    Ok(TriageCorrection {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        conversation_id: row.get(2)?,
        original_classification: row.get(3)?,
        new_classification: row.get(4)?,
        original_requires_reply: row.get::<_, i32>(5)? != 0,
        new_requires_reply: row.get::<_, i32>(6)? != 0,
        sender_email: row.get(7)?,
        sender_domain: row.get(8)?,
        corrected_by: row.get(9)?,
        created_at: row.get(10)?,
    })
}

impl TriageDb {
    // =========================================================================
    // Triage corrections (append-only)
    // =========================================================================

    pub fn insert_correction(&self, new: &NewCorrection) -> Result<TriageCorrection, DbError> {
        let id = format!("tc-{}", Uuid::new_v4());
        self.conn.execute(
            "INSERT INTO triage_corrections (
                id, workspace_id, conversation_id, original_classification, new_classification,
                original_requires_reply, new_requires_reply, sender_email, sender_domain,
                corrected_by, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id,
                new.workspace_id,
                new.conversation_id,
                new.original_classification,
                new.new_classification,
                new.original_requires_reply as i32,
                new.new_requires_reply as i32,
                new.sender_email,
                new.sender_domain,
                new.corrected_by,
                now_ts(),
            ],
        )?;
        self.get_correction(&id)?
            .ok_or(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn get_correction(&self, id: &str) -> Result<Option<TriageCorrection>, DbError> {
        let sql = format!("SELECT {CORRECTION_COLUMNS} FROM triage_corrections WHERE id = ?1");
        let correction = self
            .conn
            .query_row(&sql, params![id], map_correction_row)
            .optional()?;
        Ok(correction)
    }

    /// Number of corrections recorded for senders at `domain` in a workspace.
    pub fn count_domain_corrections(
        &self,
        workspace_id: &str,
        domain: &str,
    ) -> Result<i64, DbError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM triage_corrections
             WHERE workspace_id = ?1 AND sender_domain = ?2",
            params![workspace_id, domain],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Correction history for one conversation, oldest first.
    pub fn corrections_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<TriageCorrection>, DbError> {
        let sql = format!(
            "SELECT {CORRECTION_COLUMNS} FROM triage_corrections
             WHERE conversation_id = ?1
             ORDER BY created_at, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![conversation_id], map_correction_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;
    use crate::types::NewConversation;

    fn seed(db: &TriageDb, id: &str, sender: &str) {
        db.insert_conversation(&NewConversation {
            id: Some(id.into()),
            workspace_id: "w1".into(),
            sender_email: sender.into(),
            body: "body".into(),
            ..NewConversation::default()
        })
        .unwrap();
    }

    fn correction(conv: &str, domain: &str, label: &str) -> NewCorrection {
        NewCorrection {
            workspace_id: "w1".into(),
            conversation_id: conv.into(),
            original_classification: Some("customer_inquiry".into()),
            new_classification: label.into(),
            original_requires_reply: true,
            new_requires_reply: false,
            sender_email: format!("billing@{domain}"),
            sender_domain: Some(domain.into()),
            corrected_by: "alice".into(),
        }
    }

    #[test]
    fn test_count_is_scoped_to_workspace_and_domain() {
        let db = test_db();
        seed(&db, "c1", "billing@vendorx.com");
        seed(&db, "c2", "billing@vendory.com");
        db.insert_correction(&correction("c1", "vendorx.com", "supplier_invoice"))
            .unwrap();
        db.insert_correction(&correction("c1", "vendorx.com", "supplier_invoice"))
            .unwrap();
        db.insert_correction(&correction("c2", "vendory.com", "spam"))
            .unwrap();

        assert_eq!(db.count_domain_corrections("w1", "vendorx.com").unwrap(), 2);
        assert_eq!(db.count_domain_corrections("w1", "vendory.com").unwrap(), 1);
        assert_eq!(db.count_domain_corrections("w2", "vendorx.com").unwrap(), 0);
    }

    #[test]
    fn test_history_is_ordered() {
        let db = test_db();
        seed(&db, "c1", "billing@vendorx.com");
        let first = db
            .insert_correction(&correction("c1", "vendorx.com", "spam"))
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = db
            .insert_correction(&correction("c1", "vendorx.com", "supplier_invoice"))
            .unwrap();

        let history = db.corrections_for_conversation("c1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, first.id);
        assert_eq!(history[1].id, second.id);
        assert_eq!(history[1].new_classification, "supplier_invoice");
    }

    #[test]
    fn test_correction_requires_existing_conversation() {
        let db = test_db();
        assert!(db
            .insert_correction(&correction("missing", "vendorx.com", "spam"))
            .is_err());
    }
}
