use core_types::{
    AuditEntry, EntityKind, FeedSource, NewAuditEntry, NewSlideNote, NewUsageEvent, NoteFeedEntry,
    NoteId, SlideId, SlideNote, UsageEvent, UsageEventId, UserId,
};
use rusqlite::{Row, params};
use uuid::Uuid;

use crate::StoreTx;
use crate::codec::{
    encode_metadata, get_date, get_enum, get_metadata, get_opt_metadata, get_uuid, parse_uuid,
    query_all, query_optional,
};
use crate::error::{StoreError, StoreResult, classify};

// Notes, usage events and audit entries are insert-only; the schema triggers reject
// any UPDATE (and DELETE on audit_log) that bypasses this module.

const NOTE_COLUMNS: &str = "id, slide_id, author_user_id, note_type, body, created_at";
const USAGE_COLUMNS: &str =
    "id, slide_id, used_by_user_id, usage_type, context, metadata_json, used_at";
const AUDIT_COLUMNS: &str =
    "id, actor_user_id, entity_type, entity_id, action, before_json, after_json, created_at";

fn note_from_row(row: &Row<'_>) -> StoreResult<SlideNote> {
    Ok(SlideNote {
        id: get_uuid(row, "id")?,
        slide_id: get_uuid(row, "slide_id")?,
        author_user_id: get_uuid(row, "author_user_id")?,
        note_type: get_enum(row, "note_type")?,
        body: row.get("body")?,
        created_at: get_date(row, "created_at")?,
    })
}

fn usage_from_row(row: &Row<'_>) -> StoreResult<UsageEvent> {
    Ok(UsageEvent {
        id: get_uuid(row, "id")?,
        slide_id: get_uuid(row, "slide_id")?,
        used_by_user_id: get_uuid(row, "used_by_user_id")?,
        usage_type: get_enum(row, "usage_type")?,
        context: row.get("context")?,
        metadata: get_metadata(row, "metadata_json")?,
        used_at: get_date(row, "used_at")?,
    })
}

fn audit_from_row(row: &Row<'_>) -> StoreResult<AuditEntry> {
    Ok(AuditEntry {
        id: get_uuid(row, "id")?,
        actor_user_id: get_uuid(row, "actor_user_id")?,
        entity_type: get_enum(row, "entity_type")?,
        entity_id: row.get("entity_id")?,
        action: get_enum(row, "action")?,
        before: get_opt_metadata(row, "before_json")?,
        after: get_opt_metadata(row, "after_json")?,
        created_at: get_date(row, "created_at")?,
    })
}

fn feed_from_row(row: &Row<'_>) -> StoreResult<NoteFeedEntry> {
    let note_id: Option<String> = row.get("note_id")?;
    Ok(NoteFeedEntry {
        slide_id: get_uuid(row, "slide_id")?,
        source: get_enum::<FeedSource>(row, "source")?,
        note_id: note_id
            .map(|value| parse_uuid("slide_note_feed.note_id", &value))
            .transpose()?,
        note_type: get_enum(row, "note_type")?,
        body: row.get("body")?,
        author_user_id: get_uuid(row, "author_user_id")?,
        created_at: get_date(row, "created_at")?,
    })
}

impl StoreTx<'_> {
    pub fn append_note(&self, new: &NewSlideNote) -> StoreResult<SlideNote> {
        let id = Uuid::new_v4();
        self.conn
            .execute(
                r#"
                INSERT INTO slide_notes (id, slide_id, author_user_id, note_type, body)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    id.to_string(),
                    new.slide_id.to_string(),
                    new.author_user_id.to_string(),
                    new.note_type.as_str(),
                    new.body,
                ],
            )
            .map_err(|err| classify(err, Some("slide_notes"), id))?;
        self.get_note(id)
    }

    pub fn get_note(&self, id: NoteId) -> StoreResult<SlideNote> {
        query_optional(
            self.conn,
            &format!("SELECT {NOTE_COLUMNS} FROM slide_notes WHERE id = ?1"),
            [id.to_string()],
            note_from_row,
        )?
        .ok_or_else(|| StoreError::not_found("slide_note", id))
    }

    pub fn list_notes(&self, slide: SlideId) -> StoreResult<Vec<SlideNote>> {
        query_all(
            self.conn,
            &format!(
                "SELECT {NOTE_COLUMNS} FROM slide_notes WHERE slide_id = ?1 ORDER BY created_at, rowid"
            ),
            [slide.to_string()],
            note_from_row,
        )
    }

    pub fn list_notes_by_author(&self, author: UserId) -> StoreResult<Vec<SlideNote>> {
        query_all(
            self.conn,
            &format!(
                "SELECT {NOTE_COLUMNS} FROM slide_notes WHERE author_user_id = ?1 ORDER BY created_at, rowid"
            ),
            [author.to_string()],
            note_from_row,
        )
    }

    pub fn append_usage_event(&self, new: &NewUsageEvent) -> StoreResult<UsageEvent> {
        let id = Uuid::new_v4();
        self.conn
            .execute(
                r#"
                INSERT INTO slide_usage_events
                    (id, slide_id, used_by_user_id, usage_type, context, metadata_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    id.to_string(),
                    new.slide_id.to_string(),
                    new.used_by_user_id.to_string(),
                    new.usage_type.as_str(),
                    new.context,
                    encode_metadata(&new.metadata)?,
                ],
            )
            .map_err(|err| classify(err, Some("slide_usage_events"), id))?;
        self.get_usage_event(id)
    }

    pub fn get_usage_event(&self, id: UsageEventId) -> StoreResult<UsageEvent> {
        query_optional(
            self.conn,
            &format!("SELECT {USAGE_COLUMNS} FROM slide_usage_events WHERE id = ?1"),
            [id.to_string()],
            usage_from_row,
        )?
        .ok_or_else(|| StoreError::not_found("slide_usage_event", id))
    }

    pub fn list_usage_events(&self, slide: SlideId) -> StoreResult<Vec<UsageEvent>> {
        query_all(
            self.conn,
            &format!(
                "SELECT {USAGE_COLUMNS} FROM slide_usage_events WHERE slide_id = ?1 ORDER BY used_at, rowid"
            ),
            [slide.to_string()],
            usage_from_row,
        )
    }

    pub fn append_audit(&self, new: &NewAuditEntry) -> StoreResult<AuditEntry> {
        let id = Uuid::new_v4();
        let before = new.before.as_ref().map(encode_metadata).transpose()?;
        let after = new.after.as_ref().map(encode_metadata).transpose()?;
        self.conn
            .execute(
                r#"
                INSERT INTO audit_log
                    (id, actor_user_id, entity_type, entity_id, action, before_json, after_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    id.to_string(),
                    new.actor_user_id.to_string(),
                    new.entity_type.as_str(),
                    new.entity_id,
                    new.action.as_str(),
                    before,
                    after,
                ],
            )
            .map_err(|err| classify(err, Some("audit_log"), id))?;
        query_optional(
            self.conn,
            &format!("SELECT {AUDIT_COLUMNS} FROM audit_log WHERE id = ?1"),
            [id.to_string()],
            audit_from_row,
        )?
        .ok_or_else(|| StoreError::not_found("audit_log", id))
    }

    /// History of one entity, oldest first.
    pub fn list_audit_for_entity(
        &self,
        entity_type: EntityKind,
        entity_id: &str,
    ) -> StoreResult<Vec<AuditEntry>> {
        query_all(
            self.conn,
            &format!(
                "SELECT {AUDIT_COLUMNS} FROM audit_log WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY created_at, rowid"
            ),
            params![entity_type.as_str(), entity_id],
            audit_from_row,
        )
    }

    pub fn list_audit_by_actor(&self, actor: UserId) -> StoreResult<Vec<AuditEntry>> {
        query_all(
            self.conn,
            &format!(
                "SELECT {AUDIT_COLUMNS} FROM audit_log WHERE actor_user_id = ?1 ORDER BY created_at, rowid"
            ),
            [actor.to_string()],
            audit_from_row,
        )
    }

    /// Imaging notes stored on the slide merged with its appended notes, oldest first.
    pub fn note_feed(&self, slide: SlideId) -> StoreResult<Vec<NoteFeedEntry>> {
        query_all(
            self.conn,
            r#"
            SELECT slide_id, source, note_id, note_type, body, author_user_id, created_at
            FROM slide_note_feed
            WHERE slide_id = ?1
            ORDER BY created_at, seq
            "#,
            [slide.to_string()],
            feed_from_row,
        )
    }
}

#[cfg(test)]
mod tests {
    use core_types::{AuditAction, Metadata, NoteType, UsageType};
    use serde_json::json;

    use crate::error::ConstraintRule;
    use crate::test_util::store_with_fixture;
    use crate::StoreResult;

    use super::*;

    fn note(slide: SlideId, author: UserId, note_type: NoteType, body: &str) -> NewSlideNote {
        NewSlideNote {
            slide_id: slide,
            author_user_id: author,
            note_type,
            body: body.to_string(),
        }
    }

    #[test]
    fn feed_merges_imaging_notes_with_appended_notes() {
        let (store, fixture) = store_with_fixture();
        store
            .write(|tx| -> StoreResult<()> {
                let mut slide = fixture.slide.clone();
                slide.imaging_notes = Some("Strong GFAP signal in CA1".to_string());
                tx.update_slide(&slide)?;
                tx.append_note(&note(fixture.slide.id, fixture.owner.id, NoteType::General, "first"))?;
                tx.append_note(&note(fixture.slide.id, fixture.owner.id, NoteType::Analysis, "second"))?;
                Ok(())
            })
            .expect("populate");

        let feed = store.read(|tx| tx.note_feed(fixture.slide.id)).expect("feed");
        assert_eq!(feed.len(), 3);

        let imaging: Vec<_> = feed.iter().filter(|e| e.source == FeedSource::Slide).collect();
        assert_eq!(imaging.len(), 1);
        assert_eq!(imaging[0].note_type, NoteType::Imaging);
        assert_eq!(imaging[0].note_id, None);
        assert_eq!(imaging[0].body, "Strong GFAP signal in CA1");

        let bodies: Vec<_> = feed
            .iter()
            .filter(|e| e.source == FeedSource::Note)
            .map(|e| e.body.as_str())
            .collect();
        assert_eq!(bodies, vec!["first", "second"]);
    }

    #[test]
    fn blank_imaging_notes_are_left_out_of_feed() {
        let (store, fixture) = store_with_fixture();
        store
            .write(|tx| {
                let mut slide = fixture.slide.clone();
                slide.imaging_notes = Some("   ".to_string());
                tx.update_slide(&slide)
            })
            .expect("update");
        let feed = store.read(|tx| tx.note_feed(fixture.slide.id)).expect("feed");
        assert!(feed.is_empty());
    }

    #[test]
    fn raw_updates_of_append_only_rows_are_rejected() {
        let (store, fixture) = store_with_fixture();
        let (note_id, event_id, audit_id) = store
            .write(|tx| -> StoreResult<_> {
                let note = tx.append_note(&note(fixture.slide.id, fixture.owner.id, NoteType::General, "n"))?;
                let event = tx.append_usage_event(&NewUsageEvent {
                    slide_id: fixture.slide.id,
                    used_by_user_id: fixture.owner.id,
                    usage_type: UsageType::CellCounting,
                    context: Some("QuPath".to_string()),
                    metadata: Metadata::new(),
                })?;
                let audit = tx.append_audit(&NewAuditEntry {
                    actor_user_id: fixture.owner.id,
                    entity_type: EntityKind::Slide,
                    entity_id: fixture.slide.id.to_string(),
                    action: AuditAction::Create,
                    before: None,
                    after: Some(Metadata::new()),
                })?;
                Ok((note.id, event.id, audit.id))
            })
            .expect("append");

        let attempts = [
            ("UPDATE slide_notes SET body = 'edited' WHERE id = ?1", note_id),
            ("UPDATE slide_usage_events SET context = 'edited' WHERE id = ?1", event_id),
            ("UPDATE audit_log SET entity_id = 'edited' WHERE id = ?1", audit_id),
            ("DELETE FROM audit_log WHERE id = ?1", audit_id),
        ];
        for (sql, id) in attempts {
            let err = store
                .write(|tx| -> StoreResult<usize> { Ok(tx.conn.execute(sql, [id.to_string()])?) })
                .unwrap_err();
            assert_eq!(err.constraint_rule(), Some(ConstraintRule::AppendOnly), "{sql}");
        }

        let note = store.read(|tx| tx.get_note(note_id)).expect("note");
        assert_eq!(note.body, "n");
    }

    #[test]
    fn audit_snapshots_round_trip_as_open_maps() {
        let (store, fixture) = store_with_fixture();
        let mut after = Metadata::new();
        after.insert("label".to_string(), json!("S-001"));
        after.insert("nested".to_string(), json!({ "a": [1, 2] }));
        store
            .write(|tx| {
                tx.append_audit(&NewAuditEntry {
                    actor_user_id: fixture.owner.id,
                    entity_type: EntityKind::Slide,
                    entity_id: fixture.slide.id.to_string(),
                    action: AuditAction::Update,
                    before: None,
                    after: Some(after.clone()),
                })
            })
            .expect("append");

        let history = store
            .read(|tx| tx.list_audit_for_entity(EntityKind::Slide, &fixture.slide.id.to_string()))
            .expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].before, None);
        assert_eq!(history[0].after.as_ref(), Some(&after));

        let by_actor = store
            .read(|tx| tx.list_audit_by_actor(fixture.owner.id))
            .expect("by actor");
        assert_eq!(by_actor.len(), 1);
    }
}
