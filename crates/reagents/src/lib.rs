//! Antibody panel rules, dilution fractions, master-mix planning and catalog import.

mod catalog;
mod fraction;
mod master_mix;
mod primary;
mod secondary;

use std::path::PathBuf;

use thiserror::Error;

pub use catalog::{load_primaries, load_secondaries, read_primaries, read_secondaries};
pub use fraction::{fraction_text, parse_fraction};
pub use master_mix::{
    AntibodyVolume, BLOCK_VOLUME_UL, ChannelVolume, MixAntibody, PrimaryMix, PrimaryMixPlan,
    PrimaryPlan, SecondaryMix, SecondaryMixPlan, SecondaryPlan, plan_primary, plan_secondary,
    render_primary_protocol, render_secondary_protocol,
};
pub use primary::{PrimaryAntibody, find_valid_default_set, is_valid_primary_selection};
pub use secondary::{
    ChannelSuggestion, DEFAULT_CHANNELS, EDU_CHANNEL, PrimaryRequirements, SecondaryAntibody,
    channels_for, secondary_is_compatible, suggest_secondary_by_channel,
};

#[derive(Debug, Error)]
pub enum ReagentError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed catalog csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("catalog is missing required column `{column}`")]
    MissingColumn { column: &'static str },
}

pub type Result<T> = std::result::Result<T, ReagentError>;
