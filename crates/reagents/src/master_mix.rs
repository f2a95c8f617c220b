use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::fraction::fraction_text;
use crate::secondary::DEFAULT_CHANNELS;

/// PBT-N used to block one slide.
pub const BLOCK_VOLUME_UL: f64 = 500.0;
const PBTN_SAFETY: f64 = 1.2;
const PRIMARY_MIX_SAFETY: f64 = 1.1;
const SECONDARY_MIX_SAFETY: f64 = 1.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixAntibody {
    pub name: String,
    /// Dilution as a decimal, e.g. `0.002` for 1/500.
    pub concentration: f64,
}

/// Slides sharing one identical primary panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryMix {
    pub mix_id: String,
    pub slide_count: u32,
    pub antibodies: Vec<MixAntibody>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AntibodyVolume {
    pub name: String,
    pub concentration: f64,
    pub base_ul: f64,
    pub safe_ul: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrimaryMixPlan {
    pub mix_id: String,
    pub slide_count: u32,
    pub total_volume_ul: f64,
    pub antibodies: Vec<AntibodyVolume>,
    pub pbtn_base_ul: f64,
    pub pbtn_safe_ul: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrimaryPlan {
    pub total_slides: u32,
    pub primary_volume_ul: f64,
    pub incubation: String,
    pub block_total_ul: f64,
    pub primary_total_ul: f64,
    pub pbtn_base_ul: f64,
    pub pbtn_safe_ul: f64,
    pub mixes: Vec<PrimaryMixPlan>,
}

pub fn plan_primary(mixes: &[PrimaryMix], primary_volume_ul: f64, incubation: &str) -> PrimaryPlan {
    let total_slides: u32 = mixes.iter().map(|m| m.slide_count).sum();
    let block_total_ul = f64::from(total_slides) * BLOCK_VOLUME_UL;
    let primary_total_ul = f64::from(total_slides) * primary_volume_ul;
    let pbtn_base_ul = block_total_ul + primary_total_ul;

    let mixes = mixes
        .iter()
        .map(|mix| {
            let total_volume_ul = f64::from(mix.slide_count) * primary_volume_ul;
            let antibodies: Vec<AntibodyVolume> = mix
                .antibodies
                .iter()
                .map(|ab| {
                    let base_ul = total_volume_ul * ab.concentration;
                    AntibodyVolume {
                        name: ab.name.clone(),
                        concentration: ab.concentration,
                        base_ul,
                        safe_ul: base_ul * PRIMARY_MIX_SAFETY,
                    }
                })
                .collect();
            let antibody_sum: f64 = antibodies.iter().map(|ab| ab.base_ul).sum();
            let pbtn_base_ul = (total_volume_ul - antibody_sum).max(0.0);
            PrimaryMixPlan {
                mix_id: mix.mix_id.clone(),
                slide_count: mix.slide_count,
                total_volume_ul,
                antibodies,
                pbtn_base_ul,
                pbtn_safe_ul: pbtn_base_ul * PRIMARY_MIX_SAFETY,
            }
        })
        .collect();

    PrimaryPlan {
        total_slides,
        primary_volume_ul,
        incubation: incubation.to_string(),
        block_total_ul,
        primary_total_ul,
        pbtn_base_ul,
        pbtn_safe_ul: pbtn_base_ul * PBTN_SAFETY,
        mixes,
    }
}

pub fn render_primary_protocol(plan: &PrimaryPlan) -> String {
    let mut out = String::new();
    let n = plan.total_slides;
    let _ = writeln!(out, "IHC Protocol");
    let _ = writeln!(out);
    let _ = writeln!(out, "1) Prepare PBT-N");
    let _ = writeln!(
        out,
        "- Block volume: {:.1} uL ({n} slides x {BLOCK_VOLUME_UL:.0} uL)",
        plan.block_total_ul
    );
    let _ = writeln!(
        out,
        "- Primary solution volume: {:.1} uL ({n} slides x {:.1} uL)",
        plan.primary_total_ul, plan.primary_volume_ul
    );
    let _ = writeln!(out, "- Base PBT-N needed: {:.1} uL", plan.pbtn_base_ul);
    let _ = writeln!(
        out,
        "- Prepare with safety factor x{PBTN_SAFETY}: {:.1} uL",
        plan.pbtn_safe_ul
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "2) Block slides");
    let _ = writeln!(out, "- Incubate slides at RT for 1 hour.");
    let _ = writeln!(out);
    let _ = writeln!(out, "3) Prepare master mixes");
    let _ = writeln!(
        out,
        "- For each mix: antibody volume = concentration(decimal) x total mix volume."
    );
    let _ = writeln!(
        out,
        "- Then apply safety factor x{PRIMARY_MIX_SAFETY} to each antibody volume and to PBT-N volume."
    );
    let _ = writeln!(out);

    for mix in &plan.mixes {
        let _ = writeln!(
            out,
            "{} ({} slides, base total {:.1} uL)",
            mix.mix_id, mix.slide_count, mix.total_volume_ul
        );
        for ab in &mix.antibodies {
            let _ = writeln!(
                out,
                "- {}: conc={:.6} ({}), antibody={:.3} uL, with x{PRIMARY_MIX_SAFETY} -> {:.3} uL",
                ab.name,
                ab.concentration,
                fraction_text(ab.concentration),
                ab.base_ul,
                ab.safe_ul
            );
        }
        let _ = writeln!(
            out,
            "- PBT-N: {:.3} uL, with x{PRIMARY_MIX_SAFETY} -> {:.3} uL",
            mix.pbtn_base_ul, mix.pbtn_safe_ul
        );
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "4) Add master mixes to slides");
    let _ = write!(
        out,
        "- Add master mix to slides and incubate using the selected method: {}.",
        plan.incubation
    );
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelVolume {
    pub channel: String,
    pub secondary: String,
    pub concentration: f64,
    #[serde(default)]
    pub volume_ul: f64,
}

/// Slides sharing one set of secondaries, keyed by channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryMix {
    pub mix_id: String,
    pub slide_count: u32,
    pub channels: Vec<ChannelVolume>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecondaryMixPlan {
    pub mix_id: String,
    pub slide_count: u32,
    pub total_volume_ul: f64,
    pub channels: Vec<ChannelVolume>,
    pub pbt_ul: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecondaryPlan {
    pub total_slides: u32,
    pub secondary_volume_ul: f64,
    pub incubation: String,
    pub block_total_ul: f64,
    pub block_safe_ul: f64,
    pub mixes: Vec<SecondaryMixPlan>,
}

fn channel_rank(channel: &str) -> usize {
    DEFAULT_CHANNELS
        .iter()
        .position(|c| c.eq_ignore_ascii_case(channel))
        .unwrap_or(DEFAULT_CHANNELS.len())
}

pub fn plan_secondary(
    mixes: &[SecondaryMix],
    secondary_volume_ul: f64,
    incubation: &str,
) -> SecondaryPlan {
    let total_slides: u32 = mixes.iter().map(|m| m.slide_count).sum();
    let block_total_ul = f64::from(total_slides) * BLOCK_VOLUME_UL;

    let mixes = mixes
        .iter()
        .map(|mix| {
            let total_volume_ul =
                f64::from(mix.slide_count) * secondary_volume_ul * SECONDARY_MIX_SAFETY;
            let mut channels: Vec<ChannelVolume> = mix
                .channels
                .iter()
                .filter(|c| !c.secondary.trim().is_empty())
                .map(|c| ChannelVolume {
                    volume_ul: total_volume_ul * c.concentration,
                    ..c.clone()
                })
                .collect();
            channels.sort_by_key(|c| channel_rank(&c.channel));
            let secondary_sum: f64 = channels.iter().map(|c| c.volume_ul).sum();
            SecondaryMixPlan {
                mix_id: mix.mix_id.clone(),
                slide_count: mix.slide_count,
                total_volume_ul,
                pbt_ul: (total_volume_ul - secondary_sum).max(0.0),
                channels,
            }
        })
        .collect();

    SecondaryPlan {
        total_slides,
        secondary_volume_ul,
        incubation: incubation.to_string(),
        block_total_ul,
        block_safe_ul: block_total_ul * PBTN_SAFETY,
        mixes,
    }
}

pub fn render_secondary_protocol(plan: &SecondaryPlan) -> String {
    let mut out = String::new();
    let n = plan.total_slides;
    let _ = writeln!(out, "Secondary IHC Protocol");
    let _ = writeln!(out);
    let _ = writeln!(out, "1) Block all slides in PBT-N");
    let _ = writeln!(
        out,
        "- Base PBT-N block volume: {n} slides x {BLOCK_VOLUME_UL:.0} uL = {:.1} uL",
        plan.block_total_ul
    );
    let _ = writeln!(
        out,
        "- Prepare with safety factor x{PBTN_SAFETY}: {:.1} uL",
        plan.block_safe_ul
    );
    let _ = writeln!(out, "- Incubate for 30 min to 1 hr.");
    let _ = writeln!(out);
    let _ = writeln!(out, "2) Prepare secondary master mixes");

    for mix in &plan.mixes {
        let _ = writeln!(out, "{} ({} slides)", mix.mix_id, mix.slide_count);
        let _ = writeln!(
            out,
            "- Total mix volume: {} x {:.1} uL x {SECONDARY_MIX_SAFETY} = {:.1} uL",
            mix.slide_count, plan.secondary_volume_ul, mix.total_volume_ul
        );
        for channel in &mix.channels {
            let _ = writeln!(
                out,
                "- {} ({}): {:.6} ({}) -> {:.3} uL",
                channel.channel,
                channel.secondary,
                channel.concentration,
                fraction_text(channel.concentration),
                channel.volume_ul
            );
        }
        let _ = writeln!(out, "- Add PBT first: {:.3} uL", mix.pbt_ul);
        let _ = writeln!(
            out,
            "- Then add secondaries in order: {}.",
            DEFAULT_CHANNELS.join(", ")
        );
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "3) Add secondary mixes to slides");
    let _ = write!(
        out,
        "- Incubate using preset method: {}.",
        plan.incubation
    );
    out
}
