use std::collections::HashSet;

use serde::{Deserialize, Serialize};

const POLYCLONAL_MARKERS: &[&str] = &["", "na", "n/a"];

/// A primary antibody as seen by the panel rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryAntibody {
    pub name: String,
    pub concentration: Option<f64>,
    /// Host species, lower-cased.
    pub animal: String,
    pub catalog_number: String,
    pub igg_subtype: String,
}

impl PrimaryAntibody {
    pub fn is_mouse(&self) -> bool {
        self.animal.trim().eq_ignore_ascii_case("mouse")
    }

    /// Monoclonal antibodies carry an IgG subtype; blank or `n/a` means polyclonal.
    pub fn is_monoclonal(&self) -> bool {
        let token = self.igg_subtype.trim().to_ascii_lowercase();
        !POLYCLONAL_MARKERS.contains(&token.as_str())
    }

    fn subtype_key(&self) -> String {
        self.igg_subtype.trim().to_ascii_lowercase()
    }
}

/// Whether `selected` can share one slide blocked with `serum_type` serum.
///
/// No primary may be raised in the serum species, each non-mouse host may appear once,
/// and at most two mouse primaries are allowed. Two mouse primaries must both be
/// monoclonal with different IgG subtypes so subtype-specific secondaries can tell
/// them apart.
pub fn is_valid_primary_selection(selected: &[PrimaryAntibody], serum_type: &str) -> bool {
    let serum = serum_type.trim().to_ascii_lowercase();
    let mut hosts = HashSet::new();
    let mut mouse_subtypes = HashSet::new();
    let mut mouse_count = 0;

    for antibody in selected {
        let animal = antibody.animal.trim().to_ascii_lowercase();
        if animal == serum {
            return false;
        }

        if antibody.is_mouse() {
            mouse_count += 1;
            if mouse_count > 2 {
                return false;
            }
            if mouse_count == 2 && !antibody.is_monoclonal() {
                return false;
            }
            if !mouse_subtypes.insert(antibody.subtype_key()) {
                return false;
            }
            continue;
        }

        if !hosts.insert(animal) {
            return false;
        }
    }

    if mouse_count == 2 {
        let mice: Vec<_> = selected.iter().filter(|ab| ab.is_mouse()).collect();
        if !mice.iter().all(|ab| ab.is_monoclonal()) {
            return false;
        }
    }

    true
}

/// Greedy first-fit pick of up to `width` compatible primaries, in catalog order.
pub fn find_valid_default_set(
    antibodies: &[PrimaryAntibody],
    serum_type: &str,
    width: usize,
) -> Vec<String> {
    let serum = serum_type.trim().to_ascii_lowercase();
    let mut chosen: Vec<PrimaryAntibody> = Vec::with_capacity(width);
    for antibody in antibodies
        .iter()
        .filter(|ab| ab.animal.trim().to_ascii_lowercase() != serum)
    {
        if chosen.len() == width {
            break;
        }
        chosen.push(antibody.clone());
        if !is_valid_primary_selection(&chosen, serum_type) {
            chosen.pop();
        }
    }
    chosen.into_iter().map(|ab| ab.name).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn primary(name: &str, animal: &str, subtype: &str) -> PrimaryAntibody {
        PrimaryAntibody {
            name: name.to_string(),
            concentration: None,
            animal: animal.to_string(),
            catalog_number: String::new(),
            igg_subtype: subtype.to_string(),
        }
    }

    #[test]
    fn serum_host_is_rejected() {
        let panel = [primary("GFAP", "goat", "")];
        assert!(!is_valid_primary_selection(&panel, "Goat"));
        assert!(is_valid_primary_selection(&panel, "donkey"));
    }

    #[test]
    fn non_mouse_hosts_must_be_unique() {
        let panel = [primary("GFAP", "rabbit", ""), primary("Iba1", "rabbit", "")];
        assert!(!is_valid_primary_selection(&panel, "goat"));
    }

    #[test]
    fn two_mouse_primaries_need_distinct_monoclonal_subtypes() {
        let ok = [primary("NeuN", "mouse", "IgG1"), primary("Olig2", "mouse", "IgG2a")];
        assert!(is_valid_primary_selection(&ok, "goat"));

        let same = [primary("NeuN", "mouse", "IgG1"), primary("Olig2", "mouse", "igg1")];
        assert!(!is_valid_primary_selection(&same, "goat"));

        let polyclonal = [primary("NeuN", "mouse", "n/a"), primary("Olig2", "mouse", "IgG2a")];
        assert!(!is_valid_primary_selection(&polyclonal, "goat"));

        let three = [
            primary("NeuN", "mouse", "IgG1"),
            primary("Olig2", "mouse", "IgG2a"),
            primary("Sox2", "mouse", "IgG2b"),
        ];
        assert!(!is_valid_primary_selection(&three, "goat"));
    }

    #[test]
    fn default_set_is_greedy_first_fit() {
        let catalog = [
            primary("GFAP", "rabbit", ""),
            primary("Iba1", "rabbit", ""),
            primary("Sox9", "goat", ""),
            primary("NeuN", "mouse", "IgG1"),
            primary("Olig2", "chicken", ""),
        ];
        assert_eq!(
            find_valid_default_set(&catalog, "goat", 3),
            vec!["GFAP", "NeuN", "Olig2"]
        );
        assert_eq!(find_valid_default_set(&catalog, "goat", 1), vec!["GFAP"]);
    }
}
