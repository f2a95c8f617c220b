pub mod enums;
pub mod metadata;
pub mod records;
pub mod session;

use uuid::Uuid;

pub use enums::{
    AntibodyRole, AppRole, AssetType, AuditAction, EntityKind, ExperimentStatus, FeedSource,
    MemberRole, NoteType, ParseEnumError, SlideStatus, UsageType,
};
pub use metadata::{Metadata, overlay, snapshot};
pub use records::{
    Antibody, AntibodyUsage, AuditEntry, EduCondition, Experiment, ExperimentExport,
    ExperimentMember, NewAntibody, NewAuditEntry, NewEduCondition, NewExperiment,
    NewExperimentExport, NewMember, NewSlide, NewSlideAsset, NewSlideNote, NewTreatmentGroup,
    NewUsageEvent, NewUser, NoteFeedEntry, ProtocolDefaults, ProtocolSettings, Slide,
    SlideAntibody, SlideAsset, SlideNote, StorageLocation, TreatmentGroup, UsageEvent, User,
};
pub use session::{AppMode, Session};

pub type UserId = Uuid;
pub type ExperimentId = Uuid;
pub type TreatmentGroupId = Uuid;
pub type SlideId = Uuid;
pub type AntibodyId = Uuid;
pub type EduConditionId = Uuid;
pub type AssetId = Uuid;
pub type NoteId = Uuid;
pub type UsageEventId = Uuid;
pub type AuditId = Uuid;
pub type ExportId = Uuid;
