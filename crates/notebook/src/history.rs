use core_types::{
    AuditEntry, EntityKind, Metadata, NewSlideNote, NewUsageEvent, NoteFeedEntry, NoteType,
    Session, SlideId, SlideNote, StorageLocation, UsageEvent, UsageType,
};
use tracing::debug;

use crate::policy::authorize_admin;
use crate::slides::load_slide;
use crate::{Notebook, Permission, Result, audit_created};

impl Notebook {
    /// Appends a note. Viewers need `can_add_notes`; everyone who can edit slides may
    /// always add notes.
    pub fn add_note(
        &self,
        session: &Session,
        slide: SlideId,
        note_type: NoteType,
        body: &str,
    ) -> Result<SlideNote> {
        self.store.write(|tx| {
            load_slide(tx, session, Permission::AddNote, slide)?;
            let note = tx.append_note(&NewSlideNote {
                slide_id: slide,
                author_user_id: session.user_id,
                note_type,
                body: body.to_string(),
            })?;
            audit_created(tx, session, EntityKind::SlideNote, note.id, &note)?;
            debug!(slide_id = %slide, note_id = %note.id, "appended note");
            Ok(note)
        })
    }

    pub fn list_notes(&self, session: &Session, slide: SlideId) -> Result<Vec<SlideNote>> {
        self.store.read(|tx| {
            load_slide(tx, session, Permission::Read, slide)?;
            Ok(tx.list_notes(slide)?)
        })
    }

    pub fn note_feed(&self, session: &Session, slide: SlideId) -> Result<Vec<NoteFeedEntry>> {
        self.store.read(|tx| {
            load_slide(tx, session, Permission::Read, slide)?;
            Ok(tx.note_feed(slide)?)
        })
    }

    pub fn record_usage(
        &self,
        session: &Session,
        slide: SlideId,
        usage_type: UsageType,
        context: Option<&str>,
        metadata: Metadata,
    ) -> Result<UsageEvent> {
        self.store.write(|tx| {
            load_slide(tx, session, Permission::MutateSlides, slide)?;
            let event = tx.append_usage_event(&NewUsageEvent {
                slide_id: slide,
                used_by_user_id: session.user_id,
                usage_type,
                context: context.map(str::to_string),
                metadata,
            })?;
            audit_created(tx, session, EntityKind::UsageEvent, event.id, &event)?;
            Ok(event)
        })
    }

    pub fn list_usage_events(&self, session: &Session, slide: SlideId) -> Result<Vec<UsageEvent>> {
        self.store.read(|tx| {
            load_slide(tx, session, Permission::Read, slide)?;
            Ok(tx.list_usage_events(slide)?)
        })
    }

    /// Full history of one entity. Admin mode only.
    pub fn audit_trail(
        &self,
        session: &Session,
        entity_type: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<AuditEntry>> {
        authorize_admin(session, "audit log")?;
        Ok(self
            .store
            .read(|tx| tx.list_audit_for_entity(entity_type, entity_id))?)
    }

    /// Changes made by the session user.
    pub fn my_audit(&self, session: &Session) -> Result<Vec<AuditEntry>> {
        Ok(self
            .store
            .read(|tx| tx.list_audit_by_actor(session.user_id))?)
    }

    pub fn remember_storage_location(
        &self,
        session: &Session,
        location: &str,
    ) -> Result<StorageLocation> {
        Ok(self
            .store
            .write(|tx| tx.remember_storage_location(session.user_id, location))?)
    }

    pub fn recent_storage_locations(&self, session: &Session) -> Result<Vec<StorageLocation>> {
        let limit = self.settings.recent_locations;
        Ok(self
            .store
            .read(|tx| tx.list_storage_locations(session.user_id, limit))?)
    }
}
