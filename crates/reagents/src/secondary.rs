use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::primary::PrimaryAntibody;

/// Imaging channels in the order secondaries are added to a mix.
pub const DEFAULT_CHANNELS: [&str; 3] = ["A488", "Cy3", "A647"];

/// The far-red channel is taken by the EdU click reaction when EdU is used.
pub const EDU_CHANNEL: &str = "A647";

pub fn channels_for(uses_edu: bool) -> Vec<&'static str> {
    DEFAULT_CHANNELS
        .into_iter()
        .filter(|channel| !(uses_edu && *channel == EDU_CHANNEL))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryAntibody {
    pub name: String,
    pub concentration_text: String,
    /// Host species, lower-cased.
    pub raised_in: String,
    /// Species the secondary binds, lower-cased.
    pub anti: String,
    pub fluorophore: String,
    /// `igg1`, `igg2a`, `igg2b` or empty for subtype-agnostic anti-mouse.
    pub mouse_subtype: String,
}

impl SecondaryAntibody {
    pub fn new(
        name: impl Into<String>,
        raised_in: &str,
        anti: &str,
        fluorophore: &str,
    ) -> Self {
        let name = name.into();
        Self {
            mouse_subtype: infer_mouse_subtype(&name).to_string(),
            name,
            concentration_text: String::new(),
            raised_in: raised_in.trim().to_ascii_lowercase(),
            anti: anti.trim().to_ascii_lowercase(),
            fluorophore: fluorophore.trim().to_string(),
        }
    }

    fn target_key(&self) -> String {
        target_key(&self.anti, &self.mouse_subtype)
    }

    fn on_channel(&self, channel: &str) -> bool {
        self.fluorophore.eq_ignore_ascii_case(channel)
    }
}

fn target_key(anti: &str, mouse_subtype: &str) -> String {
    if anti == "mouse" {
        let subtype = if mouse_subtype.is_empty() { "any" } else { mouse_subtype };
        format!("mouse:{subtype}")
    } else {
        anti.to_string()
    }
}

/// Reads the IgG subtype out of a secondary's catalog name.
pub(crate) fn infer_mouse_subtype(name: &str) -> &'static str {
    let compact: String = name
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    if compact.contains("igg1") {
        "igg1"
    } else if compact.contains("igg2a") {
        "igg2a"
    } else if compact.contains("igg2b") {
        "igg2b"
    } else {
        ""
    }
}

fn normalize_mouse_subtype(value: &str) -> &'static str {
    let token: String = value
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    match token.as_str() {
        "#1" | "igg1" => "igg1",
        "#2a" | "igg2a" => "igg2a",
        "#2b" | "igg2b" => "igg2b",
        _ => "",
    }
}

/// What a primary panel demands of its secondaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimaryRequirements {
    pub hosts: BTreeSet<String>,
    pub mouse_subtypes: BTreeSet<String>,
    pub non_mouse_targets: BTreeSet<String>,
    pub has_mouse: bool,
}

impl PrimaryRequirements {
    pub fn from_panel(primaries: &[PrimaryAntibody]) -> Self {
        let mut requirements = Self::default();
        for primary in primaries {
            let host = primary.animal.trim().to_ascii_lowercase();
            if host.is_empty() {
                continue;
            }
            if host == "mouse" {
                requirements.has_mouse = true;
                let subtype = normalize_mouse_subtype(&primary.igg_subtype);
                if !subtype.is_empty() {
                    requirements.mouse_subtypes.insert(subtype.to_string());
                }
            } else {
                requirements.non_mouse_targets.insert(host.clone());
            }
            requirements.hosts.insert(host);
        }
        requirements
    }

    /// Targets in suggestion order: non-mouse hosts alphabetically, then mouse subtypes.
    fn targets(&self) -> Vec<(String, String)> {
        let mut targets: Vec<(String, String)> = self
            .non_mouse_targets
            .iter()
            .map(|host| (host.clone(), String::new()))
            .collect();
        if self.has_mouse {
            if self.mouse_subtypes.is_empty() {
                targets.push(("mouse".to_string(), String::new()));
            } else {
                targets.extend(
                    self.mouse_subtypes
                        .iter()
                        .map(|subtype| ("mouse".to_string(), subtype.clone())),
                );
            }
        }
        targets
    }
}

/// Whether `candidate` can join `selected` on a slide stained with `primaries`.
pub fn secondary_is_compatible(
    candidate: &SecondaryAntibody,
    selected: &[SecondaryAntibody],
    primaries: &[PrimaryAntibody],
) -> bool {
    let requirements = PrimaryRequirements::from_panel(primaries);
    is_compatible(candidate, selected, &requirements)
}

fn is_compatible(
    candidate: &SecondaryAntibody,
    selected: &[SecondaryAntibody],
    requirements: &PrimaryRequirements,
) -> bool {
    if requirements.hosts.contains(&candidate.raised_in) {
        return false;
    }

    if candidate.anti == "mouse" {
        if !requirements.has_mouse {
            return false;
        }
        if !requirements.mouse_subtypes.is_empty()
            && !requirements.mouse_subtypes.contains(&candidate.mouse_subtype)
        {
            return false;
        }
    } else if !requirements.non_mouse_targets.contains(&candidate.anti) {
        return false;
    }

    let key = candidate.target_key();
    if selected.iter().any(|s| s.target_key() == key) {
        return false;
    }
    !selected
        .iter()
        .any(|s| s.fluorophore.eq_ignore_ascii_case(&candidate.fluorophore))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSuggestion {
    pub channel: String,
    pub secondary: Option<String>,
}

/// For each channel, the first compatible secondary that covers a still-unmet target.
pub fn suggest_secondary_by_channel(
    channels: &[&str],
    secondaries: &[SecondaryAntibody],
    primaries: &[PrimaryAntibody],
) -> Vec<ChannelSuggestion> {
    let requirements = PrimaryRequirements::from_panel(primaries);
    let targets = requirements.targets();
    let mut selected: Vec<SecondaryAntibody> = Vec::new();
    let mut suggestions = Vec::with_capacity(channels.len());

    for channel in channels {
        let mut assigned = None;
        for (target, subtype) in &targets {
            let used: HashSet<String> = selected.iter().map(|s| s.target_key()).collect();
            if used.contains(&target_key(target, subtype)) {
                continue;
            }
            let pick = secondaries.iter().find(|sec| {
                sec.on_channel(channel)
                    && sec.anti == *target
                    && (subtype.is_empty() || sec.mouse_subtype == *subtype)
                    && is_compatible(sec, &selected, &requirements)
            });
            if let Some(sec) = pick {
                selected.push(sec.clone());
                assigned = Some(sec.name.clone());
                break;
            }
        }
        suggestions.push(ChannelSuggestion {
            channel: channel.to_string(),
            secondary: assigned,
        });
    }

    suggestions
}
