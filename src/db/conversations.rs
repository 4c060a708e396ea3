use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::*;
use crate::sender::{extract_email_address, parse_sender};
use crate::types::{
    Channel, ClassificationSource, Conversation, ConversationStatus, DecisionBucket,
    NewConversation, ReviewOutcome,
};

const CONVERSATION_COLUMNS: &str = "id, workspace_id, channel, sender_email, sender_domain, subject,
        body, classification, requires_reply, decision_bucket, confidence,
        classification_source, needs_review, status, resolved_at, reviewed_at,
        reviewed_by, review_outcome, sentiment, draft_reply, version, created_at, updated_at";

fn map_conversation_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        channel: Channel::from_str_lossy(&row.get::<_, String>(2)?),
        sender_email: row.get(3)?,
        sender_domain: row.get(4)?,
        subject: row.get(5)?,
        body: row.get(6)?,
        classification: row.get(7)?,
        requires_reply: row.get::<_, i32>(8)? != 0,
        decision_bucket: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| DecisionBucket::parse(&s)),
        confidence: row.get(10)?,
        classification_source: row
            .get::<_, Option<String>>(11)?
            .and_then(|s| ClassificationSource::parse(&s)),
        needs_review: row.get::<_, i32>(12)? != 0,
        status: ConversationStatus::from_str_lossy(&row.get::<_, String>(13)?),
        resolved_at: row.get(14)?,
        reviewed_at: row.get(15)?,
        reviewed_by: row.get(16)?,
        review_outcome: row
            .get::<_, Option<String>>(17)?
            .and_then(|s| ReviewOutcome::parse(&s)),
        sentiment: row.get(18)?,
        draft_reply: row.get(19)?,
        version: row.get(20)?,
        created_at: row.get(21)?,
        updated_at: row.get(22)?,
    })
}

impl TriageDb {
    // =========================================================================
    // Conversations
    // =========================================================================

    /// Insert a freshly ingested conversation.
    ///
    /// A `Name <addr>` sender is stored as the bare address, and
    /// `sender_domain` is set only when the address parses.
    pub fn insert_conversation(&self, new: &NewConversation) -> Result<Conversation, DbError> {
        let id = new
            .id
            .clone()
            .unwrap_or_else(|| format!("conv-{}", Uuid::new_v4()));
        let now = now_ts();
        let created_at = new.created_at.clone().unwrap_or_else(|| now.clone());
        let (sender_email, sender_domain) = match parse_sender(&new.sender_email) {
            Ok(identity) => (identity.address, Some(identity.domain)),
            Err(_) => (extract_email_address(&new.sender_email), None),
        };

        self.conn.execute(
            "INSERT INTO conversations (
                id, workspace_id, channel, sender_email, sender_domain, subject, body,
                created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                new.workspace_id,
                new.channel.as_str(),
                sender_email,
                sender_domain,
                new.subject,
                new.body,
                created_at,
                now,
            ],
        )?;

        self.get_conversation(&id)?
            .ok_or(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, DbError> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1");
        let conversation = self
            .conn
            .query_row(&sql, params![id], map_conversation_row)
            .optional()?;
        Ok(conversation)
    }

    /// One page of a workspace's conversations, oldest first.
    ///
    /// Ordered by `(created_at, id)` so pages are stable across runs.
    pub fn list_conversations_page(
        &self,
        workspace_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Conversation>, DbError> {
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE workspace_id = ?1
             ORDER BY created_at, id
             LIMIT ?2 OFFSET ?3"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![workspace_id, limit as i64, offset as i64],
            map_conversation_row,
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Compare-and-set the pipeline's triage fields.
    ///
    /// Returns `false` without writing when the row's version no longer
    /// matches `expected_version` (another writer got there first).
    pub fn apply_triage(
        &self,
        id: &str,
        expected_version: i64,
        update: &TriageUpdate,
    ) -> Result<bool, DbError> {
        let rows = self.conn.execute(
            "UPDATE conversations SET
                classification = ?1,
                requires_reply = ?2,
                decision_bucket = ?3,
                confidence = ?4,
                classification_source = ?5,
                needs_review = ?6,
                sentiment = COALESCE(?7, sentiment),
                draft_reply = COALESCE(?8, draft_reply),
                version = version + 1,
                updated_at = ?9
             WHERE id = ?10 AND version = ?11",
            params![
                update.classification,
                update.requires_reply as i32,
                update.bucket.as_str(),
                update.confidence,
                update.source.as_str(),
                update.needs_review as i32,
                update.sentiment,
                update.draft_reply,
                now_ts(),
                id,
                expected_version,
            ],
        )?;
        Ok(rows == 1)
    }

    /// Compare-and-set a human review outcome onto a conversation.
    pub fn apply_review(
        &self,
        id: &str,
        expected_version: i64,
        update: &ReviewUpdate,
    ) -> Result<bool, DbError> {
        let rows = self.conn.execute(
            "UPDATE conversations SET
                classification = ?1,
                requires_reply = ?2,
                decision_bucket = ?3,
                confidence = NULL,
                classification_source = 'human',
                needs_review = 0,
                status = ?4,
                resolved_at = ?5,
                reviewed_at = ?6,
                reviewed_by = ?7,
                review_outcome = ?8,
                version = version + 1,
                updated_at = ?6
             WHERE id = ?9 AND version = ?10",
            params![
                update.classification,
                update.requires_reply as i32,
                update.bucket.as_str(),
                update.status.as_str(),
                update.resolved_at,
                update.reviewed_at,
                update.reviewed_by,
                update.outcome.as_str(),
                id,
                expected_version,
            ],
        )?;
        Ok(rows == 1)
    }
}
