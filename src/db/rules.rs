use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::*;
use crate::types::{AutomationLevel, NewSenderRule, SenderRule};

const RULE_COLUMNS: &str = "id, workspace_id, pattern, default_classification,
        default_requires_reply, is_active, hit_count, automation_level, tone_preference,
        created_from_correction_id, created_at, updated_at";

fn map_rule_row(row: &Row<'_>) -> rusqlite::Result<SenderRule> {
    Ok(SenderRule {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        pattern: row.get(2)?,
        default_classification: row.get(3)?,
        default_requires_reply: row.get::<_, i32>(4)? != 0,
        is_active: row.get::<_, i32>(5)? != 0,
        hit_count: row.get(6)?,
        automation_level: AutomationLevel::from_str_lossy(&row.get::<_, String>(7)?),
        tone_preference: row.get(8)?,
        created_from_correction_id: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

impl TriageDb {
    // =========================================================================
    // Sender rules
    // =========================================================================

    /// Active rules whose pattern is exactly one of `patterns`.
    ///
    /// Read-only; callers decide precedence and whether the rule is applied.
    pub fn find_active_rules(
        &self,
        workspace_id: &str,
        patterns: &[&str],
    ) -> Result<Vec<SenderRule>, DbError> {
        let mut results = Vec::new();
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM sender_rules
             WHERE workspace_id = ?1 AND pattern = ?2 AND is_active = 1"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        for pattern in patterns {
            if let Some(rule) = stmt
                .query_row(params![workspace_id, pattern], map_rule_row)
                .optional()?
            {
                results.push(rule);
            }
        }
        Ok(results)
    }

    /// The rule for a pattern regardless of whether it is active.
    pub fn get_rule_by_pattern(
        &self,
        workspace_id: &str,
        pattern: &str,
    ) -> Result<Option<SenderRule>, DbError> {
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM sender_rules WHERE workspace_id = ?1 AND pattern = ?2"
        );
        let rule = self
            .conn
            .query_row(&sql, params![workspace_id, pattern], map_rule_row)
            .optional()?;
        Ok(rule)
    }

    pub fn get_rule(&self, id: &str) -> Result<Option<SenderRule>, DbError> {
        let sql = format!("SELECT {RULE_COLUMNS} FROM sender_rules WHERE id = ?1");
        let rule = self
            .conn
            .query_row(&sql, params![id], map_rule_row)
            .optional()?;
        Ok(rule)
    }

    pub fn list_rules(
        &self,
        workspace_id: &str,
        include_inactive: bool,
    ) -> Result<Vec<SenderRule>, DbError> {
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM sender_rules
             WHERE workspace_id = ?1 AND (is_active = 1 OR ?2)
             ORDER BY pattern"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![workspace_id, include_inactive], map_rule_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Plain insert of a new active rule.
    ///
    /// Fails with a UNIQUE violation when any rule already holds the pattern;
    /// see [`DbError::is_unique_violation`].
    pub fn insert_rule(&self, rule: &NewSenderRule) -> Result<SenderRule, DbError> {
        let id = format!("rule-{}", Uuid::new_v4());
        let now = now_ts();
        self.conn.execute(
            "INSERT INTO sender_rules (
                id, workspace_id, pattern, default_classification, default_requires_reply,
                is_active, hit_count, automation_level, tone_preference,
                created_from_correction_id, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, 1, 0, ?6, ?7, ?8, ?9, ?9)",
            params![
                id,
                rule.workspace_id,
                rule.pattern,
                rule.default_classification,
                rule.default_requires_reply as i32,
                rule.automation_level.as_str(),
                rule.tone_preference,
                rule.created_from_correction_id,
                now,
            ],
        )?;
        self.get_rule(&id)?
            .ok_or(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    /// Insert or overwrite the rule for `(workspace_id, pattern)`.
    ///
    /// An existing row is reactivated, its classification fields overwritten
    /// and its hit count reset. Automation level and tone are left alone
    /// (see [`TriageDb::set_rule_settings`]). `updated_at` never moves
    /// backwards. The original `created_from_correction_id` is kept. Returns the stored rule
    /// and whether no active rule held the pattern beforehand.
    pub fn upsert_rule(&self, rule: &NewSenderRule) -> Result<(SenderRule, bool), DbError> {
        let had_active = self
            .get_rule_by_pattern(&rule.workspace_id, &rule.pattern)?
            .is_some_and(|r| r.is_active);

        let id = format!("rule-{}", Uuid::new_v4());
        let now = now_ts();
        self.conn.execute(
            "INSERT INTO sender_rules (
                id, workspace_id, pattern, default_classification, default_requires_reply,
                is_active, hit_count, automation_level, tone_preference,
                created_from_correction_id, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, 1, 0, ?6, ?7, ?8, ?9, ?9)
             ON CONFLICT (workspace_id, pattern) DO UPDATE SET
                default_classification = excluded.default_classification,
                default_requires_reply = excluded.default_requires_reply,
                is_active = 1,
                hit_count = 0,
                created_from_correction_id = COALESCE(
                    sender_rules.created_from_correction_id,
                    excluded.created_from_correction_id
                ),
                updated_at = MAX(sender_rules.updated_at, excluded.updated_at)",
            params![
                id,
                rule.workspace_id,
                rule.pattern,
                rule.default_classification,
                rule.default_requires_reply as i32,
                rule.automation_level.as_str(),
                rule.tone_preference,
                rule.created_from_correction_id,
                now,
            ],
        )?;

        let stored = self
            .get_rule_by_pattern(&rule.workspace_id, &rule.pattern)?
            .ok_or(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))?;
        Ok((stored, !had_active))
    }

    /// Update the non-classification settings of a rule.
    pub fn set_rule_settings(
        &self,
        rule_id: &str,
        automation_level: AutomationLevel,
        tone_preference: Option<&str>,
    ) -> Result<bool, DbError> {
        let rows = self.conn.execute(
            "UPDATE sender_rules SET
                automation_level = ?1,
                tone_preference = ?2,
                updated_at = MAX(updated_at, ?3)
             WHERE id = ?4",
            params![automation_level.as_str(), tone_preference, now_ts(), rule_id],
        )?;
        Ok(rows == 1)
    }

    /// Count one application of a rule.
    pub fn increment_rule_hit(&self, rule_id: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE sender_rules SET hit_count = hit_count + 1 WHERE id = ?1",
            params![rule_id],
        )?;
        Ok(())
    }

    /// Deactivate a rule. Returns `false` if it was not active.
    pub fn deactivate_rule(&self, rule_id: &str) -> Result<bool, DbError> {
        let rows = self.conn.execute(
            "UPDATE sender_rules SET is_active = 0, updated_at = MAX(updated_at, ?1)
             WHERE id = ?2 AND is_active = 1",
            params![now_ts(), rule_id],
        )?;
        Ok(rows == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;

    fn rule(pattern: &str, label: &str) -> NewSenderRule {
        NewSenderRule {
            workspace_id: "w1".into(),
            pattern: pattern.into(),
            default_classification: label.into(),
            default_requires_reply: false,
            ..NewSenderRule::default()
        }
    }

    fn active_count(db: &TriageDb, pattern: &str) -> i64 {
        db.conn_ref()
            .query_row(
                "SELECT COUNT(*) FROM sender_rules
                 WHERE workspace_id = 'w1' AND pattern = ?1 AND is_active = 1",
                params![pattern],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn test_upsert_creates_then_overwrites() {
        let db = test_db();
        let (first, created) = db
            .upsert_rule(&rule("*@vendorx.com", "supplier_invoice"))
            .unwrap();
        assert!(created);
        db.increment_rule_hit(&first.id).unwrap();
        db.increment_rule_hit(&first.id).unwrap();
        assert_eq!(db.get_rule(&first.id).unwrap().unwrap().hit_count, 2);

        let (second, created) = db
            .upsert_rule(&rule("*@vendorx.com", "supplier_question"))
            .unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.default_classification, "supplier_question");
        assert_eq!(second.hit_count, 0);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(active_count(&db, "*@vendorx.com"), 1);
    }

    #[test]
    fn test_insert_rule_duplicate_is_unique_violation() {
        let db = test_db();
        db.insert_rule(&rule("ap@vendorx.com", "supplier_invoice"))
            .unwrap();
        let err = db
            .insert_rule(&rule("ap@vendorx.com", "supplier_invoice"))
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn test_find_active_rules_skips_inactive() {
        let db = test_db();
        let r = db.insert_rule(&rule("*@vendorx.com", "spam")).unwrap();
        assert_eq!(db.find_active_rules("w1", &["*@vendorx.com"]).unwrap().len(), 1);

        assert!(db.deactivate_rule(&r.id).unwrap());
        assert!(!db.deactivate_rule(&r.id).unwrap());
        assert!(db.find_active_rules("w1", &["*@vendorx.com"]).unwrap().is_empty());
        assert_eq!(db.list_rules("w1", true).unwrap().len(), 1);
        assert!(db.list_rules("w1", false).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_reactivates_and_reports_created() {
        let db = test_db();
        let r = db.insert_rule(&rule("*@vendorx.com", "spam")).unwrap();
        db.deactivate_rule(&r.id).unwrap();

        let (stored, created) = db
            .upsert_rule(&rule("*@vendorx.com", "supplier_invoice"))
            .unwrap();
        assert!(created);
        assert!(stored.is_active);
        assert_eq!(stored.id, r.id);
    }

    #[test]
    fn test_upsert_leaves_settings_alone() {
        let db = test_db();
        let (r, _) = db.upsert_rule(&rule("*@vendorx.com", "spam")).unwrap();
        assert!(db
            .set_rule_settings(&r.id, AutomationLevel::Auto, Some("formal"))
            .unwrap());

        let (stored, _) = db
            .upsert_rule(&rule("*@vendorx.com", "supplier_invoice"))
            .unwrap();
        assert_eq!(stored.automation_level, AutomationLevel::Auto);
        assert_eq!(stored.tone_preference.as_deref(), Some("formal"));
    }

    #[test]
    fn test_upsert_keeps_origin_correction() {
        let db = test_db();
        db.conn_ref()
            .execute_batch("PRAGMA foreign_keys = OFF;")
            .unwrap();
        let mut first = rule("*@vendorx.com", "spam");
        first.created_from_correction_id = Some("tc-1".into());
        db.upsert_rule(&first).unwrap();

        let mut second = rule("*@vendorx.com", "supplier_invoice");
        second.created_from_correction_id = Some("tc-2".into());
        let (stored, _) = db.upsert_rule(&second).unwrap();
        assert_eq!(stored.created_from_correction_id.as_deref(), Some("tc-1"));
    }
}
