//! Protocol resolution, panel checks and master-mix grouping for an experiment's slides.

use std::collections::BTreeMap;

use core_types::{
    Antibody, AntibodyRole, Experiment, ExperimentId, Metadata, Session, Slide, SlideId, overlay,
};
use reagents::{
    ChannelSuggestion, ChannelVolume, MixAntibody, PrimaryAntibody, PrimaryMix, SecondaryAntibody,
    SecondaryMix, channels_for, find_valid_default_set, is_valid_primary_selection,
    parse_fraction, plan_primary, plan_secondary, render_primary_protocol,
    render_secondary_protocol, secondary_is_compatible, suggest_secondary_by_channel,
};
use serde::Serialize;
use serde_json::Value;
use storage_sqlite::StoreTx;

use crate::policy::authorize;
use crate::slides::load_slide;
use crate::{Notebook, Permission, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecondaryCheck {
    pub name: String,
    pub fluorophore: String,
    /// Compatible with the primaries and with the secondaries listed before it.
    pub compatible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelReport {
    pub slide_id: SlideId,
    pub serum_type: String,
    pub uses_edu: bool,
    pub primaries: Vec<String>,
    pub primaries_valid: bool,
    pub secondaries: Vec<SecondaryCheck>,
    pub suggestions: Vec<ChannelSuggestion>,
}

fn text(protocol: &Metadata, key: &str) -> Option<String> {
    protocol
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn number(protocol: &Metadata, key: &str) -> Option<f64> {
    protocol.get(key).and_then(Value::as_f64)
}

/// Dilution of one antibody on a slide: the slide's own dilution, else the catalog
/// stock concentration, else zero.
fn dilution(usage: Option<&str>, antibody: &Antibody) -> f64 {
    usage
        .and_then(parse_fraction)
        .or_else(|| antibody.stock_concentration.as_deref().and_then(parse_fraction))
        .unwrap_or(0.0)
}

struct SlidePanel {
    primaries: Vec<(Antibody, f64)>,
    secondaries: Vec<(Antibody, f64)>,
}

fn slide_panel(tx: &StoreTx<'_>, slide: SlideId) -> Result<SlidePanel> {
    let load = |role: AntibodyRole| -> Result<Vec<(Antibody, f64)>> {
        tx.list_slide_antibodies(role, slide)?
            .into_iter()
            .map(|link| -> Result<(Antibody, f64)> {
                let antibody = tx.get_antibody(link.antibody_id)?;
                let value = dilution(link.usage.dilution.as_deref(), &antibody);
                Ok((antibody, value))
            })
            .collect()
    };
    Ok(SlidePanel {
        primaries: load(AntibodyRole::Primary)?,
        secondaries: load(AntibodyRole::Secondary)?,
    })
}

impl Notebook {
    fn experiment_protocol(&self, tx: &StoreTx<'_>, experiment: ExperimentId) -> Result<Metadata> {
        let base = self.settings.protocol.to_metadata();
        Ok(match tx.get_protocol_defaults(experiment)? {
            Some(defaults) => overlay(&base, &defaults.settings.to_metadata()),
            None => base,
        })
    }

    pub(crate) fn slide_protocol(&self, tx: &StoreTx<'_>, slide: &Slide) -> Result<Metadata> {
        let base = self.experiment_protocol(tx, slide.experiment_id)?;
        Ok(overlay(&base, &slide.experiment_overrides))
    }

    /// Experiment defaults (or the configured fallback) overlaid with the slide's
    /// overrides.
    pub fn effective_protocol(&self, session: &Session, slide: SlideId) -> Result<Metadata> {
        self.store.read(|tx| {
            let slide = load_slide(tx, session, Permission::Read, slide)?;
            self.slide_protocol(tx, &slide)
        })
    }

    pub fn check_panel(&self, session: &Session, slide: SlideId) -> Result<PanelReport> {
        self.store.read(|tx| {
            let slide = load_slide(tx, session, Permission::Read, slide)?;
            let protocol = self.slide_protocol(tx, &slide)?;
            let serum_type = text(&protocol, "serum_type").unwrap_or_default();
            let uses_edu = protocol
                .get("uses_edu")
                .and_then(Value::as_bool)
                .unwrap_or(false)
                || !tx.list_edu_conditions(slide.id)?.is_empty();

            let panel = slide_panel(tx, slide.id)?;
            let primaries: Vec<PrimaryAntibody> =
                panel.primaries.iter().map(|(ab, _)| ab.into()).collect();

            let mut selected: Vec<SecondaryAntibody> = Vec::new();
            let mut secondaries = Vec::with_capacity(panel.secondaries.len());
            for (antibody, _) in &panel.secondaries {
                let candidate = SecondaryAntibody::from(antibody);
                let compatible = secondary_is_compatible(&candidate, &selected, &primaries);
                secondaries.push(SecondaryCheck {
                    name: candidate.name.clone(),
                    fluorophore: candidate.fluorophore.clone(),
                    compatible,
                });
                selected.push(candidate);
            }

            let catalog: Vec<SecondaryAntibody> = tx
                .list_antibodies(Some(AntibodyRole::Secondary))?
                .iter()
                .map(SecondaryAntibody::from)
                .collect();
            let suggestions =
                suggest_secondary_by_channel(&channels_for(uses_edu), &catalog, &primaries);

            Ok(PanelReport {
                slide_id: slide.id,
                primaries_valid: is_valid_primary_selection(&primaries, &serum_type),
                primaries: primaries.into_iter().map(|p| p.name).collect(),
                serum_type,
                uses_edu,
                secondaries,
                suggestions,
            })
        })
    }

    /// Greedy default primary panel from the catalog for `serum_type`.
    pub fn default_primary_panel(&self, serum_type: Option<&str>) -> Result<Vec<String>> {
        let serum = serum_type
            .map(str::to_string)
            .or_else(|| self.settings.protocol.serum_type.clone())
            .unwrap_or_default();
        let catalog: Vec<PrimaryAntibody> = self
            .store
            .read(|tx| tx.list_antibodies(Some(AntibodyRole::Primary)))?
            .iter()
            .map(PrimaryAntibody::from)
            .collect();
        Ok(find_valid_default_set(&catalog, &serum, self.settings.panel_width))
    }

    /// Groups the experiment's slides by identical primary panel. Mix ids are `MM1`,
    /// `MM2`, ... in slide order; slides without primaries are left out.
    pub fn primary_master_mixes(
        &self,
        session: &Session,
        experiment: ExperimentId,
    ) -> Result<Vec<PrimaryMix>> {
        self.store.read(|tx| {
            let parent = tx.get_experiment(experiment)?;
            authorize(tx, session, Permission::Read, &parent)?;
            primary_mixes(tx, &parent)
        })
    }

    /// Groups the experiment's slides by identical secondary set. Mix ids are `SM1`,
    /// `SM2`, ... in slide order.
    pub fn secondary_master_mixes(
        &self,
        session: &Session,
        experiment: ExperimentId,
    ) -> Result<Vec<SecondaryMix>> {
        self.store.read(|tx| {
            let parent = tx.get_experiment(experiment)?;
            authorize(tx, session, Permission::Read, &parent)?;
            secondary_mixes(tx, &parent)
        })
    }

    /// Primary and secondary bench protocols for the whole experiment.
    pub fn protocol_text(&self, session: &Session, experiment: ExperimentId) -> Result<String> {
        self.store.read(|tx| {
            let parent = tx.get_experiment(experiment)?;
            authorize(tx, session, Permission::Read, &parent)?;
            let protocol = self.experiment_protocol(tx, experiment)?;

            let primary = plan_primary(
                &primary_mixes(tx, &parent)?,
                number(&protocol, "primary_volume_ul").unwrap_or(0.0),
                &text(&protocol, "primary_incubation").unwrap_or_default(),
            );
            let secondary = plan_secondary(
                &secondary_mixes(tx, &parent)?,
                number(&protocol, "secondary_volume_ul").unwrap_or(0.0),
                &text(&protocol, "secondary_incubation").unwrap_or_default(),
            );
            Ok(format!(
                "{}\n{}",
                render_primary_protocol(&primary),
                render_secondary_protocol(&secondary)
            ))
        })
    }
}

/// Assigns `{prefix}N` ids to distinct keys in first-seen order.
struct MixGrouper<K, V> {
    prefix: &'static str,
    order: Vec<K>,
    groups: BTreeMap<K, (String, u32, V)>,
}

impl<K: Ord + Clone, V> MixGrouper<K, V> {
    fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            order: Vec::new(),
            groups: BTreeMap::new(),
        }
    }

    fn add(&mut self, key: K, value: V) {
        if let Some((_, count, _)) = self.groups.get_mut(&key) {
            *count += 1;
            return;
        }
        let id = format!("{}{}", self.prefix, self.order.len() + 1);
        self.order.push(key.clone());
        self.groups.insert(key, (id, 1, value));
    }

    fn finish(mut self) -> Vec<(String, u32, V)> {
        self.order
            .iter()
            .filter_map(|key| self.groups.remove(key))
            .collect()
    }
}

pub(crate) fn primary_mixes(
    tx: &StoreTx<'_>,
    experiment: &Experiment,
) -> Result<Vec<PrimaryMix>> {
    let mut grouper = MixGrouper::new("MM");
    for slide in tx.list_slides_by_experiment(experiment.id)? {
        let mut antibodies: Vec<MixAntibody> = slide_panel(tx, slide.id)?
            .primaries
            .into_iter()
            .map(|(ab, concentration)| MixAntibody {
                name: ab.name,
                concentration,
            })
            .collect();
        if antibodies.is_empty() {
            continue;
        }
        antibodies.sort_by(|a, b| a.name.cmp(&b.name));
        let key: Vec<String> = antibodies.iter().map(|ab| ab.name.clone()).collect();
        grouper.add(key, antibodies);
    }
    Ok(grouper
        .finish()
        .into_iter()
        .map(|(mix_id, slide_count, antibodies)| PrimaryMix {
            mix_id,
            slide_count,
            antibodies,
        })
        .collect())
}

fn secondary_mixes(tx: &StoreTx<'_>, experiment: &Experiment) -> Result<Vec<SecondaryMix>> {
    let mut grouper = MixGrouper::new("SM");
    for slide in tx.list_slides_by_experiment(experiment.id)? {
        let mut channels: Vec<ChannelVolume> = slide_panel(tx, slide.id)?
            .secondaries
            .into_iter()
            .map(|(ab, concentration)| ChannelVolume {
                channel: ab.fluorophore.clone().unwrap_or_default(),
                secondary: ab.name,
                concentration,
                volume_ul: 0.0,
            })
            .collect();
        if channels.is_empty() {
            continue;
        }
        channels.sort_by(|a, b| a.secondary.cmp(&b.secondary));
        let key: Vec<String> = channels.iter().map(|c| c.secondary.clone()).collect();
        grouper.add(key, channels);
    }
    Ok(grouper
        .finish()
        .into_iter()
        .map(|(mix_id, slide_count, channels)| SecondaryMix {
            mix_id,
            slide_count,
            channels,
        })
        .collect())
}
